use std::fmt;
use std::str::FromStr;
use tch::nn::{self, OptimizerConfig};
use tch::Device;

use factorizer_core::{Factorizer, FactorizerConfig};

use crate::config::Config;
use crate::error::{require, ConfigError, Result};
use crate::scheduler::LrScheduler;

/// Optimizers selectable by `optimizer.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    Adam,
    AdamW,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::Adam => "adam",
            OptimizerKind::AdamW => "adamw",
        }
    }

    /// Weight decay used when `opt_args.weight_decay` is omitted.
    pub fn default_weight_decay(&self) -> f64 {
        match self {
            OptimizerKind::Adam => 0.0,
            OptimizerKind::AdamW => 0.01,
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "adamw" => Ok(OptimizerKind::AdamW),
            _ => Err(ConfigError::UnsupportedOptimizer(s.to_string())),
        }
    }
}

/// A model together with the variable store that owns its parameters.
pub struct TrainableModel {
    pub vs: nn::VarStore,
    pub model: Factorizer,
}

impl TrainableModel {
    pub fn config(&self) -> &FactorizerConfig {
        &self.model.config
    }

    pub fn n_parameters(&self) -> i64 {
        self.vs
            .trainable_variables()
            .iter()
            .map(|t| t.numel() as i64)
            .sum()
    }
}

/// Model hyperparameters from `model_args`, `tokenizer` and `data`.
pub fn model_config(config: &Config) -> Result<FactorizerConfig> {
    let args = &config.model_args;
    let tokenizer = require(&config.tokenizer, "tokenizer")?;
    let max_decode_size = require(&config.data.max_decode_size, "data.max_decode_size")?;

    Ok(FactorizerConfig {
        n_tokens: tokenizer.n_tokens as i64,
        pad_token_id: tokenizer.pad_token_id,
        max_decode_size: max_decode_size as i64,
        n_embd: require(&args.n_embd, "model_args.n_embd")?,
        n_head: require(&args.n_head, "model_args.n_head")?,
        n_enc_layer: require(&args.n_enc_layer, "model_args.n_enc_layer")?,
        n_dec_layer: require(&args.n_dec_layer, "model_args.n_dec_layer")?,
        dim_feedforward: require(&args.dim_feedforward, "model_args.dim_feedforward")?,
        dropout: require(&args.dropout, "model_args.dropout")?,
        layer_norm_epsilon: require(&args.layer_norm_epsilon, "model_args.layer_norm_epsilon")?,
        use_bias: require(&args.use_bias, "model_args.use_bias")?,
    })
}

/// Builds the model with its parameters allocated on `device`.
pub fn get_model(config: &Config, device: Device) -> Result<TrainableModel> {
    let model_config = model_config(config)?;
    let vs = nn::VarStore::new(device);
    let model = Factorizer::new(&vs.root(), &model_config)?;
    Ok(TrainableModel { vs, model })
}

pub fn get_optimizer(config: &Config, vs: &nn::VarStore) -> Result<nn::Optimizer> {
    let args = &config.optimizer.opt_args;
    let lr = require(&args.lr, "optimizer.opt_args.lr")?;
    let beta1 = require(&args.beta1, "optimizer.opt_args.beta1")?;
    let beta2 = require(&args.beta2, "optimizer.opt_args.beta2")?;
    let eps = require(&args.eps, "optimizer.opt_args.eps")?;
    let wd = require(&args.weight_decay, "optimizer.opt_args.weight_decay")?;

    let kind = config.optimizer_kind()?;
    let optimizer = match kind {
        OptimizerKind::Adam => nn::Adam {
            beta1,
            beta2,
            wd,
            eps,
            ..Default::default()
        }
        .build(vs, lr)?,
        OptimizerKind::AdamW => nn::AdamW {
            beta1,
            beta2,
            wd,
            eps,
            ..Default::default()
        }
        .build(vs, lr)?,
    };
    log::info!("Using {} optimizer, lr {:.2e}, weight decay {}", kind, lr, wd);
    Ok(optimizer)
}

/// Builds the schedule for `optimizer` and applies its step-0 learning rate.
///
/// Requires `scheduler.nb_steps`, so the training loader must exist first.
pub fn get_scheduler(config: &Config, optimizer: &mut nn::Optimizer) -> Result<LrScheduler> {
    let kind = config.scheduler_kind()?;
    let base_lr = require(&config.optimizer.opt_args.lr, "optimizer.opt_args.lr")?;
    let n_warmup_steps = require(&config.scheduler.n_warmup_steps, "scheduler.n_warmup_steps")?;
    let nb_steps = require(&config.scheduler.nb_steps, "scheduler.nb_steps")?;
    let scheduler = LrScheduler::new(kind, base_lr, n_warmup_steps, nb_steps);
    scheduler.start(optimizer);
    Ok(scheduler)
}

/// Model, then an optimizer over its variables, then the schedule driving
/// that optimizer.
pub fn get_model_opt_scheduler(
    config: &Config,
    device: Device,
) -> Result<(TrainableModel, nn::Optimizer, LrScheduler)> {
    let trainable = get_model(config, device)?;
    let mut optimizer = get_optimizer(config, &trainable.vs)?;
    let scheduler = get_scheduler(config, &mut optimizer)?;
    log::info!(
        "Built model with {} parameters, {} schedule over {} steps",
        trainable.n_parameters(),
        scheduler.kind(),
        scheduler.nb_steps()
    );
    Ok((trainable, optimizer, scheduler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{backfill, tests::minimal};
    use crate::derive::{derive_sizes, derive_step_count, derive_tokenizer_fields};
    use crate::error::PipelineError;
    use tokenizer::Tokenizer;

    fn derived_config() -> Config {
        let mut config = backfill(minimal()).unwrap();
        derive_sizes(&mut config).unwrap();
        derive_tokenizer_fields(&mut config, &Tokenizer::new()).unwrap();
        derive_step_count(&mut config, 10).unwrap();
        config
    }

    #[test]
    fn optimizer_tags() {
        assert_eq!("adam".parse::<OptimizerKind>().unwrap(), OptimizerKind::Adam);
        assert_eq!("AdamW".parse::<OptimizerKind>().unwrap(), OptimizerKind::AdamW);
        assert!(matches!(
            "sgd".parse::<OptimizerKind>(),
            Err(ConfigError::UnsupportedOptimizer(tag)) if tag == "sgd"
        ));
    }

    #[test]
    fn model_config_reads_derived_fields() {
        let config = derived_config();
        let model_config = model_config(&config).unwrap();
        assert_eq!(model_config.n_tokens, 14);
        assert_eq!(model_config.pad_token_id, 0);
        assert_eq!(model_config.max_decode_size, 21);
        assert_eq!(model_config.dim_feedforward, 64);
    }

    #[test]
    fn model_needs_tokenizer_fields() {
        let mut config = backfill(minimal()).unwrap();
        derive_sizes(&mut config).unwrap();
        assert!(matches!(
            get_model(&config, Device::Cpu),
            Err(PipelineError::Configuration(ConfigError::MissingField("tokenizer")))
        ));
    }

    #[test]
    fn scheduler_needs_step_count() {
        let mut config = derived_config();
        config.scheduler.nb_steps = None;
        let trainable = get_model(&config, Device::Cpu).unwrap();
        let mut optimizer = get_optimizer(&config, &trainable.vs).unwrap();
        assert!(matches!(
            get_scheduler(&config, &mut optimizer),
            Err(PipelineError::Configuration(ConfigError::MissingField("scheduler.nb_steps")))
        ));
    }

    #[test]
    fn scheduler_sets_the_warmup_rate_on_its_optimizer() {
        let mut config = derived_config();
        config.scheduler.n_warmup_steps = Some(4);
        let trainable = get_model(&config, Device::Cpu).unwrap();
        let mut optimizer = get_optimizer(&config, &trainable.vs).unwrap();
        let mut scheduler = get_scheduler(&config, &mut optimizer).unwrap();
        assert_eq!(scheduler.current_step(), 0);
        assert_eq!(scheduler.current_lr(), 0.0);

        scheduler.step(&mut optimizer);
        assert_eq!(scheduler.current_step(), 1);
        assert!((scheduler.current_lr() - 0.25e-3).abs() < 1e-12);
    }

    #[test]
    fn builds_on_requested_device() {
        let config = derived_config();
        let (trainable, _opt, scheduler) = get_model_opt_scheduler(&config, Device::Cpu).unwrap();
        assert_eq!(trainable.vs.device(), Device::Cpu);
        assert!(trainable.n_parameters() > 0);
        assert_eq!(scheduler.nb_steps(), 20);
    }

    #[test]
    fn both_optimizers_build() {
        let mut config = derived_config();
        for tag in ["adam", "adamw"] {
            config.optimizer.kind = Some(tag.to_string());
            let trainable = get_model(&config, Device::Cpu).unwrap();
            assert!(get_optimizer(&config, &trainable.vs).is_ok());
        }
    }
}
