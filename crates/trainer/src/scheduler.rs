use std::fmt;
use std::str::FromStr;
use tch::nn;

use crate::error::ConfigError;

/// Learning-rate schedules selectable by `scheduler.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    /// Linear warmup from 0, then linear decay to 0 at the last step.
    LinearWithWarmup,
    /// Linear warmup from 0, then the base rate.
    ConstantWithWarmup,
}

impl SchedulerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerKind::LinearWithWarmup => "linear_schedule_with_warmup",
            SchedulerKind::ConstantWithWarmup => "constant_schedule_with_warmup",
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear_schedule_with_warmup" => Ok(SchedulerKind::LinearWithWarmup),
            "constant_schedule_with_warmup" => Ok(SchedulerKind::ConstantWithWarmup),
            _ => Err(ConfigError::UnsupportedScheduler(s.to_string())),
        }
    }
}

/// Per-step learning rate, applied to a tch optimizer.
#[derive(Debug, Clone)]
pub struct LrScheduler {
    kind: SchedulerKind,
    base_lr: f64,
    n_warmup_steps: usize,
    nb_steps: usize,
    step: usize,
}

impl LrScheduler {
    pub fn new(kind: SchedulerKind, base_lr: f64, n_warmup_steps: usize, nb_steps: usize) -> Self {
        Self {
            kind,
            base_lr,
            n_warmup_steps,
            nb_steps,
            step: 0,
        }
    }

    pub fn kind(&self) -> SchedulerKind {
        self.kind
    }

    pub fn nb_steps(&self) -> usize {
        self.nb_steps
    }

    /// Multiplier applied to the base rate at `step`.
    pub fn factor_at(&self, step: usize) -> f64 {
        if step < self.n_warmup_steps {
            return step as f64 / self.n_warmup_steps.max(1) as f64;
        }
        match self.kind {
            SchedulerKind::ConstantWithWarmup => 1.0,
            SchedulerKind::LinearWithWarmup => {
                let remaining = self.nb_steps.saturating_sub(step) as f64;
                let decay_steps = self.nb_steps.saturating_sub(self.n_warmup_steps).max(1) as f64;
                (remaining / decay_steps).max(0.0)
            }
        }
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        self.base_lr * self.factor_at(step)
    }

    pub fn current_lr(&self) -> f64 {
        self.lr_at(self.step)
    }

    pub fn current_step(&self) -> usize {
        self.step
    }

    /// Sets the rate for the first optimizer step.
    pub fn start(&self, opt: &mut nn::Optimizer) {
        opt.set_lr(self.current_lr());
    }

    /// Advances one step and sets the rate for the next optimizer step.
    pub fn step(&mut self, opt: &mut nn::Optimizer) {
        self.step += 1;
        opt.set_lr(self.current_lr());
    }
}
