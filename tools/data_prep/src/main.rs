use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

use trainer::config::DataConfig;
use trainer::dataset::DataSplit;

/// Writes a random train/test split of integers below 2^max_pow.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Every generated number is below 2^max_pow (at most 64)
    #[arg(long)]
    max_pow: u32,

    /// Output prefix (completed with `2^<max_pow>.json`) or explicit .json file
    #[arg(long, default_value = "data/")]
    data_loc: String,

    #[arg(long, default_value_t = 10_000)]
    n_train: usize,

    #[arg(long, default_value_t = 1_000)]
    n_test: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

/// Draws `n_train + n_test` distinct numbers in `[2, 2^max_pow)`.
fn sample_split(max_pow: u32, n_train: usize, n_test: usize, seed: u64) -> Result<DataSplit> {
    if !(2..=64).contains(&max_pow) {
        bail!("max_pow must be between 2 and 64, got {max_pow}");
    }
    let upper = if max_pow == 64 {
        u64::MAX
    } else {
        (1u64 << max_pow) - 1
    };
    let wanted = n_train + n_test;
    if (wanted as u128) > (upper as u128 - 1) {
        bail!("cannot draw {wanted} distinct numbers below 2^{max_pow}");
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut seen = HashSet::with_capacity(wanted);
    let mut numbers = Vec::with_capacity(wanted);
    while numbers.len() < wanted {
        let n = rng.gen_range(2..=upper);
        if seen.insert(n) {
            numbers.push(n);
        }
    }

    let test = numbers.split_off(n_train);
    Ok(DataSplit {
        train: numbers,
        test,
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let data = DataConfig {
        data_loc: Some(cli.data_loc.clone()),
        max_pow: Some(cli.max_pow),
        ..Default::default()
    };
    let path = data.resolve_data_path()?;

    let split = sample_split(cli.max_pow, cli.n_train, cli.n_test, cli.seed)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    split
        .save(&path)
        .with_context(|| format!("writing {:?}", path))?;

    log::info!(
        "Wrote {} train and {} test numbers to {:?}",
        split.train.len(),
        split.test.len(),
        path
    );
    Ok(())
}
