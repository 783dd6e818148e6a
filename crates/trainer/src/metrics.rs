use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use tch::Device;

use factorizer_core::Factorizer;
use inference::{Generator, SamplingParams};
use tokenizer::Tokenizer;

use crate::config::Config;
use crate::dataset::{check_factor_map_source, DataSplit};
use crate::error::{require, PipelineError, Result};
use crate::factor_map::{is_prime, GlobalFactorMapping};

pub const METRICS_FILE: &str = "metrics.json";

/// Outcome counts over a set of predictions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricCounts {
    pub n_examples: usize,
    /// Prediction equals the canonical factorization.
    pub exact_match: usize,
    /// Predicted factors multiply back to the number.
    pub correct_product: usize,
    /// Every predicted factor is prime.
    pub all_prime: usize,
    /// Output did not parse as a factor sequence.
    pub malformed: usize,
}

impl MetricCounts {
    fn add(&mut self, score: &PredictionScore) {
        self.n_examples += 1;
        self.exact_match += score.exact_match as usize;
        self.correct_product += score.correct_product as usize;
        self.all_prime += score.all_prime as usize;
        self.malformed += score.malformed as usize;
    }

    fn rate(&self, count: usize) -> f64 {
        if self.n_examples == 0 {
            0.0
        } else {
            count as f64 / self.n_examples as f64
        }
    }

    pub fn exact_match_rate(&self) -> f64 {
        self.rate(self.exact_match)
    }

    pub fn correct_product_rate(&self) -> f64 {
        self.rate(self.correct_product)
    }

    pub fn all_prime_rate(&self) -> f64 {
        self.rate(self.all_prime)
    }

    pub fn malformed_rate(&self) -> f64 {
        self.rate(self.malformed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorizationMetrics {
    pub overall: MetricCounts,
    /// Keyed by the true number of prime factors (with multiplicity).
    pub by_n_factors: BTreeMap<usize, MetricCounts>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PredictionScore {
    pub exact_match: bool,
    pub correct_product: bool,
    pub all_prime: bool,
    pub malformed: bool,
}

/// Scores one prediction for `number` against its canonical `factors`.
pub fn score_prediction(number: u64, factors: &[u64], prediction: Option<&[u64]>) -> PredictionScore {
    let Some(predicted) = prediction else {
        return PredictionScore {
            malformed: true,
            ..Default::default()
        };
    };
    let product = predicted
        .iter()
        .try_fold(1u64, |acc, &f| acc.checked_mul(f));
    PredictionScore {
        exact_match: predicted == factors,
        correct_product: product == Some(number),
        all_prime: predicted.iter().all(|&f| is_prime(f)),
        malformed: false,
    }
}

impl FactorizationMetrics {
    pub fn record(&mut self, true_n_factors: usize, score: &PredictionScore) {
        self.overall.add(score);
        self.by_n_factors
            .entry(true_n_factors)
            .or_default()
            .add(score);
    }

    pub fn log_summary(&self) {
        let o = &self.overall;
        log::info!(
            "Metrics over {} test numbers: exact {:.2}% | product {:.2}% | all prime {:.2}% | malformed {:.2}%",
            o.n_examples,
            100.0 * o.exact_match_rate(),
            100.0 * o.correct_product_rate(),
            100.0 * o.all_prime_rate(),
            100.0 * o.malformed_rate()
        );
        for (n_factors, counts) in &self.by_n_factors {
            log::info!(
                "  {} factor(s): {} numbers, exact {:.2}%",
                n_factors,
                counts.n_examples,
                100.0 * counts.exact_match_rate()
            );
        }
    }
}

/// Generates factorizations for the held-out split with the restored
/// model and scores them against `factor_map`. The result is logged and
/// written to `<save_path>/metrics.json`.
pub fn compute_factorization_metrics(
    model: &Factorizer,
    tokenizer: &Tokenizer,
    device: Device,
    config: &Config,
    factor_map: &GlobalFactorMapping,
) -> Result<FactorizationMetrics> {
    let path = check_factor_map_source(config, factor_map)?;
    let mut numbers = DataSplit::load(&path)?.test;
    if let Some(max_examples) = config.metrics.max_examples {
        numbers.truncate(max_examples);
    }

    let padding = config.data.padding()?;
    let input_width = require(&config.data.max_input_size, "data.max_input_size")?;
    let batch_size = require(&config.metrics.batch_size, "metrics.batch_size")?;
    let params = SamplingParams {
        temperature: require(&config.metrics.temperature, "metrics.temperature")?,
        top_k: require(&config.metrics.top_k, "metrics.top_k")?,
    };

    let generator = Generator::new(model, tokenizer, device);
    let mut metrics = FactorizationMetrics::default();
    for chunk in numbers.chunks(batch_size) {
        let predictions = generator
            .factor(chunk, padding, input_width, &params)
            .map_err(PipelineError::Generation)?;

        let scores = chunk
            .par_iter()
            .zip(predictions.par_iter())
            .map(|(&number, prediction)| {
                let factors = factor_map.get(number).ok_or_else(|| {
                    PipelineError::data_access(
                        factor_map.source(),
                        format!("no factorization recorded for {number}"),
                    )
                })?;
                Ok((factors.len(), score_prediction(number, factors, prediction.as_deref())))
            })
            .collect::<Result<Vec<_>>>()?;

        for (n_factors, score) in &scores {
            metrics.record(*n_factors, score);
        }
    }

    metrics.log_summary();
    let out = config.save_path()?.join(METRICS_FILE);
    fs::write(&out, serde_json::to_string_pretty(&metrics)?)?;
    log::info!("Wrote metrics to {:?}", out);
    Ok(metrics)
}
