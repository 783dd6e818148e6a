//! Training and evaluation driver for the factorization model.
//!
//! [`pipeline::run`] takes a YAML [`Config`] from raw form to a trained,
//! evaluated model: defaults are backfilled, derived sizes are computed, the
//! data is loaded against a [`GlobalFactorMapping`], the model is trained
//! with per-epoch checkpoints, and the best checkpoint is scored on the test
//! split.

pub mod build;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod derive;
pub mod error;
pub mod factor_map;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod train;

pub use config::{backfill, Config};
pub use error::{ConfigError, PipelineError, Result};
pub use factor_map::GlobalFactorMapping;
pub use pipeline::{load_config, run, RunSummary, Stage};
