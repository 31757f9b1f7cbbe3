use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use dnr_compiler::{index_rules, write_ruleset, IndexedRuleset};
use dnr_core::RulesetMatcher;

#[derive(Debug, Clone)]
pub struct CompileStats {
    pub input_bytes: usize,
    pub index_ms: f64,
    pub total_ms: f64,
}

/// Index a JSON rule file and write `rules.dnr` into `output_dir`.
pub fn compile_ruleset(input: &Path, output_dir: &Path) -> Result<(PathBuf, IndexedRuleset, CompileStats), String> {
    let start = Instant::now();

    let content = fs::read_to_string(input)
        .map_err(|e| format!("Failed to read '{}': {}", input.display(), e))?;

    let index_start = Instant::now();
    let ruleset = index_rules(&content).map_err(|e| format!("Failed to index '{}': {}", input.display(), e))?;
    let index_time = index_start.elapsed();

    RulesetMatcher::from_bytes(ruleset.data.clone(), ruleset.checksum)
        .map_err(|e| format!("Generated ruleset failed verification: {}", e))?;

    let path = write_ruleset(output_dir, &ruleset).map_err(|e| e.to_string())?;

    let stats = CompileStats {
        input_bytes: content.len(),
        index_ms: index_time.as_secs_f64() * 1000.0,
        total_ms: start.elapsed().as_secs_f64() * 1000.0,
    };
    Ok((path, ruleset, stats))
}

/// Accepts `0x`-prefixed hex or decimal.
pub fn parse_checksum(value: &str) -> Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|e| format!("Invalid checksum '{}': {}", value, e))
}

/// Split a `PATH=CHECKSUM` argument.
pub fn parse_ruleset_arg(value: &str) -> Result<(PathBuf, u32), String> {
    let (path, checksum) = value
        .rsplit_once('=')
        .ok_or_else(|| format!("Expected PATH=CHECKSUM, got '{}'", value))?;
    if path.is_empty() {
        return Err(format!("Missing path in '{}'", value));
    }
    Ok((PathBuf::from(path), parse_checksum(checksum)?))
}
