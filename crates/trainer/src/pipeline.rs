//! The run driver: one training run followed by evaluation of the best
//! checkpoint, as an explicit sequence of stages.

use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tch::Device;
use tokenizer::Tokenizer;

use crate::build::{get_model_opt_scheduler, TrainableModel};
use crate::checkpoint::{restore_checkpoint, select_best};
use crate::config::{backfill, Config};
use crate::dataset::get_datasets;
use crate::derive::{derive_sizes, derive_step_count, derive_tokenizer_fields};
use crate::error::{PipelineError, Result};
use crate::factor_map::GlobalFactorMapping;
use crate::metrics::{compute_factorization_metrics, FactorizationMetrics};
use crate::train::run_training;

pub const CONFIG_FILE: &str = "config.yaml";
pub const VOCAB_FILE: &str = "vocab.json";
pub const MODEL_CONFIG_FILE: &str = "model_config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Stage {
    RawConfig,
    Backfilled,
    TokenizerReady,
    SizesDerived,
    FactorMapReady,
    DataReady,
    StepCountDerived,
    DirsReady,
    ModelReady,
    Trained,
    BestCheckpointLoaded,
    Evaluated,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        use Stage::*;
        match self {
            RawConfig => Some(Backfilled),
            Backfilled => Some(TokenizerReady),
            TokenizerReady => Some(SizesDerived),
            SizesDerived => Some(FactorMapReady),
            FactorMapReady => Some(DataReady),
            DataReady => Some(StepCountDerived),
            StepCountDerived => Some(DirsReady),
            DirsReady => Some(ModelReady),
            ModelReady => Some(Trained),
            Trained => Some(BestCheckpointLoaded),
            BestCheckpointLoaded => Some(Evaluated),
            Evaluated => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks the current stage and only lets it move to its successor.
#[derive(Debug)]
pub struct StageTracker {
    current: Stage,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self {
            current: Stage::RawConfig,
        }
    }
}

impl StageTracker {
    pub fn current(&self) -> Stage {
        self.current
    }

    pub fn advance(&mut self, to: Stage) -> Result<()> {
        if self.current.next() != Some(to) {
            return Err(PipelineError::StageOrder {
                from: self.current,
                to,
            });
        }
        log::debug!("Stage {} -> {}", self.current, to);
        self.current = to;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub nb_steps: usize,
    pub best_checkpoint: PathBuf,
    pub metrics: FactorizationMetrics,
}

/// Reads a config file and fills its defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    backfill(Config::from_file(path)?)
}

/// Trains a model as configured, restores its best checkpoint and evaluates
/// it on the test split. `config` may be raw; it is backfilled first.
pub fn run(config: Config, device: Device) -> Result<RunSummary> {
    let mut stages = StageTracker::default();

    let mut config = backfill(config)?;
    stages.advance(Stage::Backfilled)?;
    tch::manual_seed(config.seed() as i64);

    let tokenizer = Tokenizer::new();
    derive_tokenizer_fields(&mut config, &tokenizer)?;
    stages.advance(Stage::TokenizerReady)?;

    derive_sizes(&mut config)?;
    stages.advance(Stage::SizesDerived)?;

    let data_path = config.data.resolve_data_path()?;
    log::info!("Building factor mapping from {:?}", data_path);
    let factor_map = GlobalFactorMapping::from_data_path(&data_path)?;
    log::info!("Factor mapping holds {} numbers", factor_map.len());
    stages.advance(Stage::FactorMapReady)?;

    let (train_loader, test_loader) = get_datasets(&config, &tokenizer, &factor_map)?;
    stages.advance(Stage::DataReady)?;

    let nb_steps = derive_step_count(&mut config, train_loader.len())?;
    log::info!("Training for {} steps", nb_steps);
    stages.advance(Stage::StepCountDerived)?;

    let save_path = config.save_path()?;
    fs::create_dir_all(config.checkpoint_dir()?)?;
    config.save(save_path.join(CONFIG_FILE))?;
    tokenizer.save(save_path.join(VOCAB_FILE))?;
    stages.advance(Stage::DirsReady)?;

    let (mut trainable, mut optimizer, mut scheduler) = get_model_opt_scheduler(&config, device)?;
    write_model_config(&trainable, &save_path)?;
    stages.advance(Stage::ModelReady)?;

    let history = run_training(
        &trainable,
        &mut optimizer,
        &mut scheduler,
        &tokenizer,
        &train_loader,
        &test_loader,
        device,
        &config,
    )?;
    log::info!("Training finished after {} epochs", history.len());
    stages.advance(Stage::Trained)?;

    let best_checkpoint = select_best(&history, &config.checkpoint_dir()?)?;
    restore_checkpoint(&mut trainable.vs, &best_checkpoint)?;
    stages.advance(Stage::BestCheckpointLoaded)?;

    let metrics =
        compute_factorization_metrics(&trainable.model, &tokenizer, device, &config, &factor_map)?;
    stages.advance(Stage::Evaluated)?;

    Ok(RunSummary {
        nb_steps,
        best_checkpoint,
        metrics,
    })
}

fn write_model_config(trainable: &TrainableModel, save_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(trainable.config())?;
    fs::write(save_path.join(MODEL_CONFIG_FILE), json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_form_a_single_chain() {
        let mut stage = Stage::RawConfig;
        let mut count = 1;
        while let Some(next) = stage.next() {
            assert!(next > stage);
            stage = next;
            count += 1;
        }
        assert_eq!(stage, Stage::Evaluated);
        assert_eq!(count, 12);
    }

    #[test]
    fn tracker_accepts_only_the_successor() {
        let mut stages = StageTracker::default();
        stages.advance(Stage::Backfilled).unwrap();

        let err = stages.advance(Stage::DataReady).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StageOrder {
                from: Stage::Backfilled,
                to: Stage::DataReady
            }
        ));
        assert!(matches!(
            stages.advance(Stage::Backfilled),
            Err(PipelineError::StageOrder { .. })
        ));
        assert_eq!(stages.current(), Stage::Backfilled);

        stages.advance(Stage::TokenizerReady).unwrap();
        assert_eq!(stages.current(), Stage::TokenizerReady);
    }

    #[test]
    fn stage_order_message_names_both_stages() {
        let err = StageTracker::default()
            .advance(Stage::Trained)
            .unwrap_err();
        assert_eq!(err.to_string(), "Stage Trained cannot follow stage RawConfig");
    }
}
