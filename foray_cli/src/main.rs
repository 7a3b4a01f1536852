use foray_core::{
    CampaignConfig, CampaignDriver, EntryPoint, HarnessRegistry, InstrumentedLoader,
    TargetDescriptor, TargetUnit, TraceKeyedGuidance, TrialExecutor, record_probe,
};

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Launches one coverage-guided fuzzing campaign", long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Target unit name, e.g. demo.codec
    #[clap(long)]
    unit: Option<String>,
    /// Entry point name on the target unit
    #[clap(long)]
    entry: Option<String>,
    #[clap(short, long)]
    budget: Option<u64>,
    #[clap(long)]
    results_dir: Option<PathBuf>,
    /// Comma-separated name prefixes excluded from instrumentation
    #[clap(long)]
    excludes: Option<String>,
    /// Comma-separated name prefixes forcibly included
    #[clap(long)]
    includes: Option<String>,
    /// Halt the campaign at the first finding
    #[clap(long)]
    stop_on_finding: bool,
    /// Exit nonzero when a completed campaign recorded findings
    #[clap(long)]
    fail_on_finding: bool,
    #[clap(long, default_value = "info")]
    log: String,
}

/// Built-in demonstration target: a toy frame decoder with planted defects.
/// 'L' frames with a bad length panic; all-zero 'Z' frames hang.
fn demo_decode(data: &[u8]) {
    record_probe(0x01);
    let Some((&tag, body)) = data.split_first() else {
        return;
    };
    match tag {
        b'L' => {
            record_probe(0x02);
            let Some(&declared) = body.first() else {
                return;
            };
            if usize::from(declared) == body.len() - 1 {
                record_probe(0x03);
                if declared > 8 {
                    panic!("oversized frame accepted: declared {declared} bytes");
                }
            }
        }
        b'Z' => {
            record_probe(0x04);
            if body.len() > 3 && body.iter().all(|&byte| byte == 0) {
                loop {
                    std::thread::sleep(Duration::from_millis(25));
                }
            }
        }
        _ => {
            if body.len() > 4 {
                record_probe(0x05);
            }
        }
    }
}

fn demo_checksum(data: &[u8]) {
    record_probe(0x10);
    let sum: u32 = data.iter().map(|&byte| u32::from(byte)).sum();
    if sum % 255 == 0 && !data.is_empty() {
        record_probe(0x11);
    }
}

fn builtin_registry(root: &Path) -> HarnessRegistry {
    let mut registry = HarnessRegistry::new();
    registry.register(
        root,
        TargetUnit::new("demo.codec")
            .with_entry(EntryPoint::public("decode", demo_decode))
            .with_entry(EntryPoint::public("checksum", demo_checksum)),
    );
    registry
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = match &cli.config_file {
        Some(config_path) => {
            println!("Loading configuration from specified path: {config_path:?}");
            CampaignConfig::load_from_file(config_path)?
        }
        None => {
            // No config file specified via CLI, try the conventional one.
            let default_config_path = PathBuf::from("foray.toml");
            if default_config_path.exists() {
                println!(
                    "No config file specified via CLI, loading default: {default_config_path:?}",
                );
                CampaignConfig::load_from_file(&default_config_path)?
            } else {
                CampaignConfig::default()
            }
        }
    };

    if let Some(unit) = cli.unit {
        config.target.unit = unit;
    }
    if let Some(entry) = cli.entry {
        config.target.entry = entry;
    }
    if let Some(budget) = cli.budget {
        config.campaign.budget = budget;
    }
    if let Some(results_dir) = cli.results_dir {
        config.output.results_dir = results_dir;
    }
    if cli.excludes.is_some() {
        config.target.excludes = cli.excludes;
    }
    if cli.includes.is_some() {
        config.target.includes = cli.includes;
    }
    if cli.stop_on_finding {
        config.campaign.stop_on_finding = true;
    }

    config.validate()?;
    println!("Effective configuration: {config:#?}");

    let Some(primary_root) = config.target.search_path.first() else {
        anyhow::bail!("artifact search path must name at least one root");
    };
    let registry = builtin_registry(primary_root);
    let loader = InstrumentedLoader::new(
        config.target.search_path.clone(),
        config.filter_set(),
        Arc::new(registry),
    )?;

    let mut guidance =
        TraceKeyedGuidance::new(config.campaign.budget, config.output.results_dir.clone())?
            .with_rng_seed(config.campaign.rng_seed)
            .stop_on_finding(config.campaign.stop_on_finding);
    if let Some(seed_paths) = &config.output.seed_paths {
        let loaded = guidance.load_seeds(seed_paths)?;
        println!("Loaded {loaded} initial seed input(s).");
    }

    let executor = TrialExecutor::new(Duration::from_millis(config.target.timeout_ms));
    let driver = CampaignDriver::new(guidance, executor);
    let target = TargetDescriptor::new(&config.target.unit, &config.target.entry);

    println!(
        "Starting campaign against {}::{} with a budget of {} trials...",
        config.target.unit, config.target.entry, config.campaign.budget
    );
    let start_time = Instant::now();
    let summary = driver.run(&loader, &target)?;
    let elapsed = start_time.elapsed();

    println!("Campaign finished in {elapsed:.2?}.");
    println!(
        "Trials: {}, Findings: {}, Corpus Size: {}{}",
        summary.trials,
        summary.findings,
        summary.corpus_size,
        if summary.stopped_on_finding {
            " (halted on first finding)"
        } else {
            ""
        }
    );
    println!(
        "Artifacts recorded under {:?}",
        config.output.results_dir
    );

    if cli.fail_on_finding && summary.findings > 0 {
        anyhow::bail!("campaign recorded {} finding(s)", summary.findings);
    }

    Ok(())
}
