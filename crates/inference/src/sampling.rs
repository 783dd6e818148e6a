use anyhow::{ensure, Result};
use tch::{Kind, Tensor};

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    /// 0 selects the arg-max token.
    pub temperature: f64,
    /// Keep only the `top_k` most likely tokens; 0 disables the cutoff.
    pub top_k: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_k: 0,
        }
    }
}

pub struct Sampler;

impl Sampler {
    /// Picks one token id per row.
    /// logits: [batch, vocab_size] tensor.
    /// Returns: [batch] int64 tensor on the same device.
    pub fn sample(logits: &Tensor, params: &SamplingParams) -> Result<Tensor> {
        ensure!(
            params.temperature >= 0.0,
            "temperature must be non-negative, got {}",
            params.temperature
        );
        let _guard = tch::no_grad_guard();

        if params.temperature < 1e-5 {
            return Ok(logits.argmax(-1, false));
        }

        let scaled = logits / params.temperature;
        let vocab_size = scaled.size()[scaled.dim() - 1];

        let scaled = if params.top_k > 0 && (params.top_k as i64) < vocab_size {
            let k = params.top_k as i64;
            let (top_values, _) = scaled.topk(k, -1, true, true);
            let threshold = top_values.narrow(-1, k - 1, 1);
            scaled.masked_fill(&scaled.lt_tensor(&threshold), f64::NEG_INFINITY)
        } else {
            scaled
        };

        let probs = scaled.softmax(-1, Kind::Float);
        Ok(probs.multinomial(1, true).squeeze_dim(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_temperature_is_greedy() {
        let logits = Tensor::from_slice(&[0.1f32, 2.0, -1.0, 0.5, 0.2, 3.0]).view([2, 3]);
        let ids = Sampler::sample(&logits, &SamplingParams::default()).unwrap();
        assert_eq!(Vec::<i64>::try_from(&ids).unwrap(), vec![1, 2]);
    }

    #[test]
    fn top_one_matches_greedy() {
        tch::manual_seed(7);
        let logits = Tensor::from_slice(&[0.1f32, 2.0, -1.0, 0.5, 0.2, 3.0]).view([2, 3]);
        let params = SamplingParams {
            temperature: 1.0,
            top_k: 1,
        };
        let ids = Sampler::sample(&logits, &params).unwrap();
        assert_eq!(Vec::<i64>::try_from(&ids).unwrap(), vec![1, 2]);
    }

    #[test]
    fn negative_temperature_is_an_error() {
        let logits = Tensor::zeros([1, 3], (Kind::Float, tch::Device::Cpu));
        let params = SamplingParams {
            temperature: -1.0,
            top_k: 0,
        };
        assert!(Sampler::sample(&logits, &params).is_err());
    }
}
