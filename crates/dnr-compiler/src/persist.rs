//! Ruleset persistence
//!
//! One provider directory holds one `rules.dnr` file. The checksum is not
//! written next to it; callers keep it in their own configuration store.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use dnr_core::RULESET_FILE_NAME;

use crate::builder::IndexedRuleset;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Failed to create '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Path of the ruleset file inside a provider directory.
pub fn ruleset_path(dir: &Path) -> PathBuf {
    dir.join(RULESET_FILE_NAME)
}

/// Write an indexed ruleset into `dir`, creating it if needed.
pub fn write_ruleset(dir: &Path, ruleset: &IndexedRuleset) -> Result<PathBuf, PersistenceError> {
    fs::create_dir_all(dir).map_err(|source| PersistenceError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = ruleset_path(dir);
    fs::write(&path, &ruleset.data).map_err(|source| PersistenceError::Write {
        path: path.clone(),
        source,
    })?;

    info!(
        "Wrote {} rules to {} (checksum {:#010x})",
        ruleset.rule_count,
        path.display(),
        ruleset.checksum
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use dnr_core::matcher::{LoadResult, RulesetMatcher};

    use super::*;
    use crate::builder::index_rules;

    const RULES: &str = r#"[{"id": 1, "condition": {"urlFilter": "ads"}, "action": {"type": "block"}}]"#;

    #[test]
    fn written_ruleset_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let provider_dir = dir.path().join("provider-a");
        let ruleset = index_rules(RULES).unwrap();

        let path = write_ruleset(&provider_dir, &ruleset).unwrap();
        assert_eq!(path, provider_dir.join("rules.dnr"));

        let matcher = RulesetMatcher::load(&path, ruleset.checksum).unwrap();
        assert_eq!(matcher.rule_count(), 1);

        let stale = RulesetMatcher::load(&path, ruleset.checksum.wrapping_add(1));
        assert_eq!(LoadResult::of(&stale), LoadResult::VerificationFailure);
    }

    #[test]
    fn unwritable_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();

        let ruleset = index_rules(RULES).unwrap();
        let err = write_ruleset(&blocker.join("nested"), &ruleset).unwrap_err();
        assert!(matches!(err, PersistenceError::CreateDir { .. }));
    }
}
