//! Run configuration: the YAML document a training run is driven by.
//!
//! Every field is optional at the serde level so that a partial document can
//! be loaded; [`backfill`] then fills documented defaults and reports missing
//! required fields by their dotted path. Fields computed from other fields
//! (`data.max_input_size`, `data.max_decode_size`, `tokenizer`,
//! `scheduler.nb_steps`) are written by the functions in [`crate::derive`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokenizer::InputPadding;

use crate::build::OptimizerKind;
use crate::error::{require, ConfigError, PipelineError, Result};
use crate::scheduler::SchedulerKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub data: DataConfig,
    pub loader: LoaderConfig,
    pub model_args: ModelArgs,
    pub optimizer: OptimizerConfig,
    pub scheduler: SchedulerConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<TokenizerInfo>,
    pub io: IoConfig,
    pub metrics: MetricsConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    /// Either an explicit `*.json` file or a prefix completed by [`data_file_name`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_loc: Option<String>,
    /// Every number in the corpus is below `2^max_pow`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pow: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_padding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_input_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_decode_size: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub train: Option<LoaderOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<LoaderOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shuffle: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drop_last: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_embd: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_head: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_enc_layer: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_dec_layer: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dim_feedforward: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_norm_epsilon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_bias: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Tag as written in the file; parsed with [`OptimizerKind::from_str`].
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub opt_args: OptimizerArgs,
    /// Gradient-norm clipping threshold; no clipping when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_grad_norm: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beta1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beta2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_decay: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_warmup_steps: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nb_epochs: Option<usize>,
    /// `nb_epochs * len(train_loader)`, known only once the loader exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nb_steps: Option<usize>,
}

/// Written from the tokenizer instance, never from the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenizerInfo {
    pub n_tokens: usize,
    pub pad_token_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IoConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    /// Evaluate only the first `max_examples` test numbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_examples: Option<usize>,
}

/// File name of the split for numbers below `2^max_pow`.
pub fn data_file_name(max_pow: u32) -> String {
    format!("2^{max_pow}.json")
}

impl DataConfig {
    pub fn max_pow(&self) -> Result<u32> {
        require(&self.max_pow, "data.max_pow")
    }

    pub fn padding(&self) -> Result<InputPadding> {
        let tag = require(&self.input_padding, "data.input_padding")?;
        InputPadding::from_str(&tag).map_err(|err| {
            ConfigError::InvalidField {
                field: "data.input_padding",
                reason: err.to_string(),
            }
            .into()
        })
    }

    /// The one place the data-file naming convention is applied.
    ///
    /// A `data_loc` ending in `.json` is used as is; anything else is treated
    /// as a prefix and concatenated with `2^<max_pow>.json`.
    pub fn resolve_data_path(&self) -> Result<PathBuf> {
        let loc = require(&self.data_loc, "data.data_loc")?;
        if loc.ends_with(".json") {
            Ok(PathBuf::from(loc))
        } else {
            Ok(PathBuf::from(format!("{loc}{}", data_file_name(self.max_pow()?))))
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn verbose(&self) -> bool {
        self.verbose.unwrap_or(false)
    }

    pub fn seed(&self) -> u64 {
        self.seed.unwrap_or(0)
    }

    pub fn save_path(&self) -> Result<PathBuf> {
        require(&self.io.save_path, "io.save_path")
    }

    pub fn checkpoint_dir(&self) -> Result<PathBuf> {
        Ok(crate::checkpoint::checkpoint_dir(&self.save_path()?))
    }

    pub fn train_loader(&self) -> Result<&LoaderOptions> {
        self.loader
            .train
            .as_ref()
            .ok_or(ConfigError::MissingField("loader.train").into())
    }

    pub fn test_loader(&self) -> Result<&LoaderOptions> {
        self.loader
            .test
            .as_ref()
            .ok_or(ConfigError::MissingField("loader.test").into())
    }

    pub fn optimizer_kind(&self) -> Result<OptimizerKind> {
        let tag = require(&self.optimizer.kind, "optimizer.type")?;
        Ok(tag.parse::<OptimizerKind>()?)
    }

    pub fn scheduler_kind(&self) -> Result<SchedulerKind> {
        let tag = require(&self.scheduler.kind, "scheduler.type")?;
        Ok(tag.parse::<SchedulerKind>()?)
    }
}

/// Fills every omitted optional field with its default and checks that the
/// required ones are present.
///
/// Explicitly set fields are never touched, so running it again on its own
/// output returns the same configuration.
pub fn backfill(mut config: Config) -> Result<Config> {
    // data
    require(&config.data.data_loc, "data.data_loc")?;
    config.data.max_pow()?;
    config
        .data
        .input_padding
        .get_or_insert_with(|| InputPadding::default().to_string());
    config.data.padding()?;

    // loader
    let train = config.loader.train.get_or_insert_with(LoaderOptions::default);
    let train_batch = require(&train.batch_size, "loader.train.batch_size")?;
    check_positive(train_batch, "loader.train.batch_size")?;
    train.shuffle.get_or_insert(true);
    train.drop_last.get_or_insert(false);

    let test = config.loader.test.get_or_insert_with(LoaderOptions::default);
    let test_batch = *test.batch_size.get_or_insert(train_batch);
    check_positive(test_batch, "loader.test.batch_size")?;
    test.shuffle.get_or_insert(false);
    test.drop_last.get_or_insert(false);

    // model_args: architecture-significant fields have no defaults
    let args = &mut config.model_args;
    let n_embd = require(&args.n_embd, "model_args.n_embd")?;
    require(&args.n_head, "model_args.n_head")?;
    require(&args.n_enc_layer, "model_args.n_enc_layer")?;
    require(&args.n_dec_layer, "model_args.n_dec_layer")?;
    if args.dim_feedforward.is_none() {
        log::info!("model_args.dim_feedforward not set, using 4 * n_embd = {}", 4 * n_embd);
        args.dim_feedforward = Some(4 * n_embd);
    }
    args.dropout.get_or_insert(0.1);
    args.layer_norm_epsilon.get_or_insert(1e-5);
    args.use_bias.get_or_insert(true);

    // optimizer
    let optimizer_kind = config.optimizer_kind()?;
    let opt_args = &mut config.optimizer.opt_args;
    let lr = *opt_args.lr.get_or_insert(1e-3);
    if !(lr > 0.0) {
        return Err(invalid("optimizer.opt_args.lr", format!("must be positive, got {lr}")));
    }
    opt_args.beta1.get_or_insert(0.9);
    opt_args.beta2.get_or_insert(0.999);
    opt_args.eps.get_or_insert(1e-8);
    opt_args
        .weight_decay
        .get_or_insert(optimizer_kind.default_weight_decay());
    if let Some(max_norm) = config.optimizer.max_grad_norm {
        if !(max_norm > 0.0) {
            return Err(invalid(
                "optimizer.max_grad_norm",
                format!("must be positive, got {max_norm}"),
            ));
        }
    }

    // scheduler
    config.scheduler_kind()?;
    config.scheduler.n_warmup_steps.get_or_insert(0);
    require(&config.scheduler.nb_epochs, "scheduler.nb_epochs")?;

    // io
    config.save_path()?;

    // metrics
    let metrics = &mut config.metrics;
    check_positive(*metrics.batch_size.get_or_insert(256), "metrics.batch_size")?;
    let temperature = *metrics.temperature.get_or_insert(0.0);
    if !(temperature >= 0.0) {
        return Err(invalid(
            "metrics.temperature",
            format!("must be non-negative, got {temperature}"),
        ));
    }
    metrics.top_k.get_or_insert(0);

    config.seed.get_or_insert(0);
    config.verbose.get_or_insert(false);

    Ok(config)
}

fn check_positive(value: usize, field: &'static str) -> Result<()> {
    if value == 0 {
        return Err(invalid(field, "must be at least 1"));
    }
    Ok(())
}

fn invalid(field: &'static str, reason: impl ToString) -> PipelineError {
    ConfigError::InvalidField {
        field,
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const MINIMAL: &str = r#"
data:
  data_loc: data/
  max_pow: 10
loader:
  train:
    batch_size: 10
model_args:
  n_embd: 16
  n_head: 2
  n_enc_layer: 1
  n_dec_layer: 1
optimizer:
  type: adam
scheduler:
  type: linear_schedule_with_warmup
  nb_epochs: 2
io:
  save_path: runs/test/
"#;

    pub(crate) fn minimal() -> Config {
        Config::from_yaml(MINIMAL).unwrap()
    }

    #[test]
    fn backfill_fills_defaults() {
        let config = backfill(minimal()).unwrap();
        assert_eq!(config.data.input_padding.as_deref(), Some("pad"));
        let test = config.loader.test.as_ref().unwrap();
        assert_eq!(test.batch_size, Some(10));
        assert_eq!(test.shuffle, Some(false));
        assert_eq!(config.model_args.dim_feedforward, Some(64));
        assert_eq!(config.optimizer.opt_args.lr, Some(1e-3));
        assert_eq!(config.optimizer.opt_args.weight_decay, Some(0.0));
        assert_eq!(config.scheduler.n_warmup_steps, Some(0));
        assert_eq!(config.metrics.temperature, Some(0.0));
        assert_eq!(config.verbose, Some(false));
        // Derived fields stay absent.
        assert_eq!(config.data.max_input_size, None);
        assert_eq!(config.scheduler.nb_steps, None);
        assert!(config.tokenizer.is_none());
    }

    #[test]
    fn backfill_is_idempotent() {
        let once = backfill(minimal()).unwrap();
        let twice = backfill(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn backfill_keeps_explicit_values() {
        let mut config = minimal();
        config.data.input_padding = Some("Zeros".to_string());
        config.optimizer.kind = Some("AdamW".to_string());
        config.optimizer.opt_args.lr = Some(3e-4);
        config.model_args.dropout = Some(0.0);
        config.model_args.dim_feedforward = Some(24);
        config.loader.test = Some(LoaderOptions {
            batch_size: Some(7),
            shuffle: Some(true),
            drop_last: None,
        });
        config.verbose = Some(true);

        let filled = backfill(config).unwrap();
        assert_eq!(filled.data.input_padding.as_deref(), Some("Zeros"));
        assert_eq!(filled.optimizer.kind.as_deref(), Some("AdamW"));
        assert_eq!(filled.optimizer.opt_args.lr, Some(3e-4));
        assert_eq!(filled.optimizer.opt_args.weight_decay, Some(0.01));
        assert_eq!(filled.model_args.dropout, Some(0.0));
        assert_eq!(filled.model_args.dim_feedforward, Some(24));
        let test = filled.loader.test.as_ref().unwrap();
        assert_eq!((test.batch_size, test.shuffle), (Some(7), Some(true)));
        assert_eq!(filled.verbose, Some(true));
    }

    #[test]
    fn missing_required_field_is_named() {
        let mut config = minimal();
        config.model_args.n_enc_layer = None;
        let err = backfill(config).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Configuration(ConfigError::MissingField("model_args.n_enc_layer"))
        ));
        assert!(err.to_string().contains("model_args.n_enc_layer"));

        let mut config = minimal();
        config.io.save_path = None;
        assert!(matches!(
            backfill(config),
            Err(PipelineError::Configuration(ConfigError::MissingField("io.save_path")))
        ));
    }

    #[test]
    fn unsupported_optimizer_fails_backfill() {
        let mut config = minimal();
        config.optimizer.kind = Some("sgd".to_string());
        assert!(matches!(
            backfill(config),
            Err(PipelineError::Configuration(ConfigError::UnsupportedOptimizer(tag))) if tag == "sgd"
        ));
    }

    #[test]
    fn unsupported_scheduler_fails_backfill() {
        let mut config = minimal();
        config.scheduler.kind = Some("cosine".to_string());
        assert!(matches!(
            backfill(config),
            Err(PipelineError::Configuration(ConfigError::UnsupportedScheduler(_)))
        ));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = minimal();
        config.loader.train.as_mut().unwrap().batch_size = Some(0);
        assert!(matches!(
            backfill(config),
            Err(PipelineError::Configuration(ConfigError::InvalidField {
                field: "loader.train.batch_size",
                ..
            }))
        ));

        let mut config = minimal();
        config.data.input_padding = Some("left".to_string());
        assert!(backfill(config).unwrap_err().is_configuration_error());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let yaml = MINIMAL.replace("max_pow: 10", "max_pow: 10\n  max_power: 12");
        assert!(matches!(Config::from_yaml(&yaml), Err(PipelineError::Yaml(_))));
    }

    #[test]
    fn data_path_from_prefix() {
        let config = minimal();
        assert_eq!(
            config.data.resolve_data_path().unwrap(),
            PathBuf::from("data/2^10.json")
        );
    }

    #[test]
    fn data_path_explicit_json() {
        let mut config = minimal();
        config.data.data_loc = Some("corpus/custom.json".to_string());
        config.data.max_pow = None;
        assert_eq!(
            config.data.resolve_data_path().unwrap(),
            PathBuf::from("corpus/custom.json")
        );
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config = backfill(minimal()).unwrap();
        config.save(&path).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), config);
    }
}
