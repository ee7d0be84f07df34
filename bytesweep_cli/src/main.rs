use bytesweep_core::config::BytesweepConfig;
use bytesweep_core::executor::TestHarness;
use bytesweep_core::mutator::MutationEngine;
use bytesweep_core::registry::{CrashRegistry, Report};
use bytesweep_core::run_campaign;
use bytesweep_core::seed::Seed;

use anyhow::Context;
use clap::Parser;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

/// Mutation fuzzer: sweeps every byte value of a seed file, then applies
/// randomized corruption, and reports each distinct failure of the target once.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Number of randomized corruption iterations to run after the value sweep.
    #[clap(value_parser = clap::value_parser!(u64).range(1..))]
    iterations: u64,
}

fn load_config() -> Result<BytesweepConfig, anyhow::Error> {
    let default_config_path = PathBuf::from(BytesweepConfig::DEFAULT_FILE_NAME);
    if default_config_path.exists() {
        info!("Loading configuration from {default_config_path:?}");
        Ok(BytesweepConfig::load_from_file(&default_config_path)?)
    } else {
        info!(
            "No {} found in the working directory, using built-in defaults.",
            BytesweepConfig::DEFAULT_FILE_NAME
        );
        Ok(BytesweepConfig::default())
    }
}

fn write_summary(path: &Path, report: &Report) -> Result<(), anyhow::Error> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write summary to {path:?}"))?;
    info!("Wrote summary to {path:?}");
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config()?;
    debug!("Effective configuration: {config:#?}");

    let seed = Seed::load(&config.campaign.seed_file)?;
    info!(
        "Loaded {} byte seed from {:?}",
        seed.len(),
        config.campaign.seed_file
    );

    let mut engine = MutationEngine::with_rng_seed(seed, config.campaign.rng_seed);
    let target = config
        .target
        .build_target()
        .context("Invalid target settings")?;
    let mut harness = TestHarness::new(target, config.target.staging_paths());
    let mut registry = CrashRegistry::new(config.crashes.evidence_store());

    let stats = run_campaign(&mut engine, &mut harness, &mut registry, cli.iterations)
        .context("Campaign aborted")?;
    info!(
        "Campaign finished in {:.2?}: {} executions, {} unique failures",
        stats.elapsed,
        stats.executions(),
        registry.len()
    );

    let report = registry.report();
    if report.silent_failures > 0 {
        warn!(
            "{} failing executions produced no diagnostic output and were not recorded",
            report.silent_failures
        );
    }
    print!("{report}");

    if let Some(summary_path) = &config.crashes.summary_file {
        write_summary(summary_path, &report)?;
    }

    Ok(())
}
