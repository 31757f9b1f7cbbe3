//! DNR CLI
//!
//! CLI tool for compiling declarative rule batches, inspecting the resulting
//! rulesets and evaluating requests against them.

mod ruleset;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use clap::{Parser, Subcommand};
use log::{debug, info};
use tracing_subscriber::filter::LevelFilter;

use dnr_core::hash::crc32;
use dnr_core::snapshot::{SectionId, Snapshot, SnapshotLayout};
use dnr_core::{ProviderId, RuleAction, RulesetMatcher};
use dnr_service::{EvaluationRequest, FilteringService, ProviderActivation, RulesetSource, ServiceConfig};

use crate::ruleset::{compile_ruleset, parse_checksum, parse_ruleset_arg};

#[derive(Parser)]
#[command(name = "dnr-cli")]
#[command(about = "Declarative request-filtering ruleset compiler and tools")]
struct Cli {
    /// Service configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a JSON rule batch into a ruleset
    Compile {
        /// JSON rule file
        #[arg(short, long)]
        input: PathBuf,

        /// Provider directory to write rules.dnr into
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Print index statistics as JSON
        #[arg(short, long)]
        verbose: bool,
    },

    /// Verify a ruleset against its checksum
    Validate {
        /// Ruleset file to validate
        #[arg(short, long)]
        input: PathBuf,

        /// Expected checksum (hex with 0x prefix, or decimal)
        #[arg(short, long)]
        checksum: String,
    },

    /// Dump ruleset layout
    Info {
        /// Ruleset file to inspect
        #[arg(short, long)]
        input: PathBuf,

        /// Expected checksum; when omitted only the structure is checked
        #[arg(short, long)]
        checksum: Option<String>,
    },

    /// Evaluate one request against one or more rulesets
    Evaluate {
        /// PATH=CHECKSUM, one per provider, oldest first
        #[arg(short, long = "ruleset", required = true)]
        rulesets: Vec<String>,

        /// Request URL
        #[arg(short, long)]
        url: String,

        /// Initiator origin
        #[arg(long)]
        initiator: Option<String>,

        /// Resource type, e.g. script or main_frame
        #[arg(short = 't', long = "type", default_value = "other")]
        resource_type: String,

        #[arg(long)]
        third_party: bool,

        /// Evaluate as a private browsing request
        #[arg(long)]
        private: bool,

        /// Let every given ruleset apply to private requests
        #[arg(long)]
        private_enabled: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|mut config| {
        if let Some(level) = cli.log_level {
            config.log_level = level;
        }
        init_logging(&config);

        match cli.command {
            Commands::Compile {
                input,
                output,
                verbose,
            } => cmd_compile(&input, &output, verbose),
            Commands::Validate { input, checksum } => cmd_validate(&input, &checksum),
            Commands::Info { input, checksum } => cmd_info(&input, checksum.as_deref()),
            Commands::Evaluate {
                rulesets,
                url,
                initiator,
                resource_type,
                third_party,
                private,
                private_enabled,
            } => {
                let mut request = EvaluationRequest::new(url, &resource_type)
                    .third_party(third_party)
                    .private(private);
                if let Some(initiator) = initiator {
                    request = request.with_initiator(initiator);
                }
                cmd_evaluate(&config, &rulesets, request, private_enabled)
            }
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<ServiceConfig, String> {
    match path {
        Some(path) => ServiceConfig::from_json_file(path).map_err(|e| e.to_string()),
        None => Ok(ServiceConfig::default()),
    }
}

fn init_logging(config: &ServiceConfig) {
    let level = config.log_level.parse().unwrap_or(LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    debug!("Logging initialized at level: {}", config.log_level);
}

fn cmd_compile(input: &Path, output: &Path, verbose: bool) -> Result<(), String> {
    let (path, ruleset, stats) = compile_ruleset(input, output)?;

    println!("Compiled '{}' to '{}'", input.display(), path.display());
    println!("  Rules:     {}", ruleset.rule_count);
    println!("  Checksum:  {:#010x}", ruleset.checksum);
    println!("  Size:      {} bytes ({:.1} KB)", ruleset.data.len(), ruleset.data.len() as f64 / 1024.0);
    println!(
        "  Time:      {:.1}ms (index: {:.1}ms)",
        stats.total_ms, stats.index_ms
    );

    if verbose {
        let json = serde_json::to_string_pretty(&ruleset.stats)
            .map_err(|e| format!("Failed to serialize stats: {}", e))?;
        println!("{json}");
    }

    Ok(())
}

fn cmd_validate(input: &Path, checksum: &str) -> Result<(), String> {
    let checksum = parse_checksum(checksum)?;
    let matcher = RulesetMatcher::load(input, checksum)
        .map_err(|e| format!("Invalid ruleset ({}): {}", e.load_result(), e))?;

    println!("Ruleset '{}' is valid", input.display());
    println!("  Rules:     {}", matcher.rule_count());
    println!("  Size:      {} bytes", matcher.size_bytes());

    Ok(())
}

fn cmd_info(input: &Path, checksum: Option<&str>) -> Result<(), String> {
    let bytes = fs::read(input).map_err(|e| format!("Failed to read '{}': {}", input.display(), e))?;

    let computed = crc32(&bytes);
    if let Some(expected) = checksum {
        let expected = parse_checksum(expected)?;
        if expected != computed {
            return Err(format!(
                "Checksum mismatch: expected {:#010x}, computed {:#010x}",
                expected, computed
            ));
        }
    }

    let layout = SnapshotLayout::parse(&bytes).map_err(|e| format!("Invalid ruleset: {}", e))?;
    let snapshot = Snapshot::new(&bytes, &layout);

    println!("Ruleset: {}", input.display());
    println!("  Magic:       DNR1");
    println!("  Version:     {}", layout.version);
    println!("  Checksum:    {:#010x}", computed);
    println!("  Total size:  {} bytes ({:.1} KB)", bytes.len(), bytes.len() as f64 / 1024.0);
    println!();

    println!("Sections:");
    for id in SectionId::ALL {
        let section = layout.section_info(id);
        println!("  {:<18} offset {:>8}  length {:>8}", format!("{:?}", id), section.offset, section.length);
    }
    println!();

    println!("Rules:");
    println!("  Count:       {}", snapshot.rules().count);
    println!("  Domains:     {}", snapshot.domains().count);
    println!("  Redirects:   {}", snapshot.redirects().count);
    println!();

    println!("Pattern indices:");
    for (name, action) in [
        ("Block", RuleAction::Block),
        ("Allow", RuleAction::Allow),
        ("Redirect", RuleAction::Redirect),
    ] {
        let index = snapshot.pattern_index(action);
        println!(
            "  {:<10} {} n-grams, {} fallback rules",
            name, index.key_count, index.fallback_count
        );
    }

    Ok(())
}

fn cmd_evaluate(
    config: &ServiceConfig,
    rulesets: &[String],
    request: EvaluationRequest,
    private_enabled: bool,
) -> Result<(), String> {
    let sources = rulesets
        .iter()
        .map(String::as_str)
        .map(parse_ruleset_arg)
        .collect::<Result<Vec<_>, _>>()?;

    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start runtime: {}", e))?;

    runtime.block_on(async {
        let service = FilteringService::start(config).map_err(|e| e.to_string())?;
        let monitor = service.monitor();
        let base = SystemTime::now();

        for (i, (path, checksum)) in sources.into_iter().enumerate() {
            let activation = ProviderActivation {
                provider_id: ProviderId::new(format!("provider-{}", i + 1)),
                activation_time: base + Duration::from_millis(i as u64),
                private_enabled,
                ruleset: Some(RulesetSource { path, checksum }),
            };
            monitor.on_provider_activated(activation).await.map_err(|e| e.to_string())?;
        }
        monitor.flush().await.map_err(|e| e.to_string())?;

        let active = service.evaluator().matcher_count().await.map_err(|e| e.to_string())?;
        info!("{} of {} rulesets active", active, rulesets.len());

        let decision = service.evaluate(request).await.map_err(|e| e.to_string())?;
        println!("{:?}", decision);

        service.shutdown().await.map_err(|e| e.to_string())?;
        Ok(())
    })
}
