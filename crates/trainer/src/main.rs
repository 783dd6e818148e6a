use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tch::Device;

use trainer::{load_config, run};

/// Train a factorization model and evaluate its best checkpoint.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the YAML run configuration
    #[arg(short, long)]
    config: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)
        .with_context(|| format!("loading config from {:?}", args.config))?;

    let default_filter = if config.verbose() { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let device = Device::cuda_if_available();
    log::info!("Using device: {:?}", device);

    let summary = run(config, device).context("training run failed")?;

    let overall = &summary.metrics.overall;
    println!(
        "Best checkpoint: {}",
        summary.best_checkpoint.display()
    );
    println!(
        "Exact match {:.2}% over {} test numbers ({} optimizer steps)",
        100.0 * overall.exact_match_rate(),
        overall.n_examples,
        summary.nb_steps
    );
    Ok(())
}
