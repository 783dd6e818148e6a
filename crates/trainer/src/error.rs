use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Stage;

/// Problems with the run configuration itself.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unsupported optimizer type `{0}` (expected one of: adam, adamw)")]
    UnsupportedOptimizer(String),

    #[error(
        "unsupported scheduler type `{0}` \
         (expected one of: linear_schedule_with_warmup, constant_schedule_with_warmup)"
    )]
    UnsupportedScheduler(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Cannot use data file {path:?}: {reason}")]
    DataAccess { path: PathBuf, reason: String },

    #[error("No checkpoint found under {0:?}")]
    NoCheckpointFound(PathBuf),

    #[error("Stage {to} cannot follow stage {from}")]
    StageOrder { from: Stage, to: Stage },

    #[error(transparent)]
    Tokenizer(#[from] tokenizer::TokenizerError),

    #[error(transparent)]
    Model(#[from] factorizer_core::ModelError),

    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),

    #[error("Generation error: {0}")]
    Generation(#[source] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn data_access(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::DataAccess {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_configuration_error(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Reads a field that backfill guarantees, naming it when absent.
pub(crate) fn require<T: Clone>(value: &Option<T>, field: &'static str) -> Result<T> {
    value
        .clone()
        .ok_or(PipelineError::Configuration(ConfigError::MissingField(field)))
}
