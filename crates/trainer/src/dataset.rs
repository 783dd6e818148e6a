use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tch::{Device, Tensor};
use tokenizer::{InputPadding, Tokenizer};

use crate::config::{Config, LoaderOptions};
use crate::error::{require, ConfigError, PipelineError, Result};
use crate::factor_map::GlobalFactorMapping;

/// On-disk train/test split: `{"train": [...], "test": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSplit {
    pub train: Vec<u64>,
    pub test: Vec<u64>,
}

impl DataSplit {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| PipelineError::data_access(path, err))?;
        let split: DataSplit = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| PipelineError::data_access(path, err))?;

        if let Some(n) = split.train.iter().chain(&split.test).find(|&&n| n < 2) {
            return Err(PipelineError::data_access(
                path,
                format!("{n} has no factorization"),
            ));
        }
        Ok(split)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer(file, self)?;
        Ok(())
    }
}

pub fn load_data_file(config: &Config) -> Result<DataSplit> {
    DataSplit::load(&config.data.resolve_data_path()?)
}

/// The held-out numbers alone, resolved the same way as for training.
pub fn load_test_split(config: &Config) -> Result<Vec<u64>> {
    Ok(load_data_file(config)?.test)
}

#[derive(Debug, Clone)]
struct Example {
    number: u64,
    input: Vec<i64>,
    target: Vec<i64>,
}

/// One batch of encoded examples.
#[derive(Debug)]
pub struct Batch {
    pub numbers: Vec<u64>,
    /// [batch, max_input_size]
    pub input: Tensor,
    /// [batch, max_decode_size], starting with the start symbol.
    pub target: Tensor,
}

/// Sized batch source over a pre-encoded split.
#[derive(Debug, Clone)]
pub struct DataLoader {
    examples: Vec<Example>,
    input_width: usize,
    target_width: usize,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: u64,
}

impl DataLoader {
    /// Number of batches per pass.
    pub fn len(&self) -> usize {
        if self.drop_last {
            self.examples.len() / self.batch_size
        } else {
            self.examples.len().div_ceil(self.batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_examples(&self) -> usize {
        self.examples.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches for one pass. With shuffling, the order depends only on the
    /// loader seed and `epoch`.
    pub fn batches(&self, epoch: usize, device: Device) -> impl Iterator<Item = Batch> + '_ {
        let mut order: Vec<usize> = (0..self.examples.len()).collect();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }

        let n_batches = self.len();
        let batch_size = self.batch_size;
        (0..n_batches).map(move |i| {
            let end = ((i + 1) * batch_size).min(order.len());
            self.collate(&order[i * batch_size..end], device)
        })
    }

    fn collate(&self, indices: &[usize], device: Device) -> Batch {
        let rows = indices.len() as i64;
        let mut numbers = Vec::with_capacity(indices.len());
        let mut inputs = Vec::with_capacity(indices.len() * self.input_width);
        let mut targets = Vec::with_capacity(indices.len() * self.target_width);
        for &i in indices {
            let example = &self.examples[i];
            numbers.push(example.number);
            inputs.extend_from_slice(&example.input);
            targets.extend_from_slice(&example.target);
        }

        let input = Tensor::from_slice(&inputs)
            .view([rows, self.input_width as i64])
            .to(device);
        let target = Tensor::from_slice(&targets)
            .view([rows, self.target_width as i64])
            .to(device);

        Batch {
            numbers,
            input,
            target,
        }
    }
}

/// Encodes `split` into a loader. Inputs follow the configured padding
/// policy; targets are the canonical factors from `factor_map`.
pub fn prepare_dataloader(
    split: &[u64],
    config: &Config,
    options: &LoaderOptions,
    tokenizer: &Tokenizer,
    factor_map: &GlobalFactorMapping,
) -> Result<DataLoader> {
    let padding: InputPadding = config.data.padding()?;
    let input_width = require(&config.data.max_input_size, "data.max_input_size")?;
    let target_width = require(&config.data.max_decode_size, "data.max_decode_size")?;
    let batch_size = require(&options.batch_size, "loader.batch_size")?;

    let examples = split
        .iter()
        .map(|&number| {
            let factors = factor_map.get(number).ok_or_else(|| {
                PipelineError::data_access(
                    factor_map.source(),
                    format!("no factorization recorded for {number}"),
                )
            })?;
            Ok(Example {
                number,
                input: tokenizer.encode_number(number, padding, input_width)?,
                target: tokenizer.encode_factors(factors, target_width)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(DataLoader {
        examples,
        input_width,
        target_width,
        batch_size,
        shuffle: options.shuffle.unwrap_or(false),
        drop_last: options.drop_last.unwrap_or(false),
        seed: config.seed(),
    })
}

/// Resolves the data file and checks that `factor_map` was built from it.
pub fn check_factor_map_source(
    config: &Config,
    factor_map: &GlobalFactorMapping,
) -> Result<PathBuf> {
    let path = config.data.resolve_data_path()?;
    if factor_map.source() != path {
        return Err(ConfigError::InvalidField {
            field: "data.data_loc",
            reason: format!(
                "factor mapping was built from {:?} but the split is read from {:?}",
                factor_map.source(),
                path
            ),
        }
        .into());
    }
    Ok(path)
}

/// Train and test loaders from the configured data file.
///
/// `factor_map` must have been built from that same file.
pub fn get_datasets(
    config: &Config,
    tokenizer: &Tokenizer,
    factor_map: &GlobalFactorMapping,
) -> Result<(DataLoader, DataLoader)> {
    let path = check_factor_map_source(config, factor_map)?;
    log::info!("Loading data from {:?}", path);
    let split = DataSplit::load(&path)?;
    let train = prepare_dataloader(&split.train, config, config.train_loader()?, tokenizer, factor_map)?;
    let test = prepare_dataloader(&split.test, config, config.test_loader()?, tokenizer, factor_map)?;
    log::info!(
        "{} train examples in {} batches, {} test examples in {} batches",
        train.n_examples(),
        train.len(),
        test.n_examples(),
        test.len()
    );
    Ok((train, test))
}
