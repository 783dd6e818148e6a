use anyhow::{ensure, Result};
use factorizer_core::Factorizer;
use tch::{Device, Kind, Tensor};
use tokenizer::{InputPadding, Tokenizer};

use crate::sampling::{Sampler, SamplingParams};

/// Autoregressive factor generation for a batch of numbers.
pub struct Generator<'a> {
    model: &'a Factorizer,
    tokenizer: &'a Tokenizer,
    device: Device,
}

impl<'a> Generator<'a> {
    pub fn new(model: &'a Factorizer, tokenizer: &'a Tokenizer, device: Device) -> Self {
        Self {
            model,
            tokenizer,
            device,
        }
    }

    /// Encodes `numbers` with `padding` into `input_width` positions and
    /// decodes until every row has emitted the end symbol or the model's
    /// `max_decode_size` is reached.
    ///
    /// Returns the raw generated ids per number, start symbol included.
    pub fn generate(
        &self,
        numbers: &[u64],
        padding: InputPadding,
        input_width: usize,
        params: &SamplingParams,
    ) -> Result<Vec<Vec<i64>>> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let _guard = tch::no_grad_guard();

        let mut flat = Vec::with_capacity(numbers.len() * input_width);
        for &n in numbers {
            flat.extend(self.tokenizer.encode_number(n, padding, input_width)?);
        }
        let batch = numbers.len() as i64;
        let src = Tensor::from_slice(&flat)
            .view([batch, input_width as i64])
            .to(self.device);

        let (memory, memory_mask) = self.model.encode(&src, false);

        let sos = self.tokenizer.sos_token_id();
        let eos = self.tokenizer.eos_token_id();
        let pad = self.tokenizer.pad_token_id();

        let mut tgt = Tensor::full([batch, 1], sos, (Kind::Int64, self.device));
        let mut finished = Tensor::zeros([batch], (Kind::Bool, self.device));

        for _ in 1..self.model.config.max_decode_size {
            let logits = self.model.decode(&memory, &memory_mask, &tgt, false);
            let next_logits = logits.select(1, -1);
            let next = Sampler::sample(&next_logits, params)?;
            // Rows that already ended keep emitting pad.
            let next = next.where_self(&finished.logical_not(), &next.full_like(pad));

            tgt = Tensor::cat(&[&tgt, &next.unsqueeze(1)], 1);
            finished = finished.logical_or(&next.eq(eos));
            if finished.all().to_kind(Kind::Int64).int64_value(&[]) == 1 {
                break;
            }
        }

        let width = tgt.size()[1] as usize;
        let ids = Vec::<i64>::try_from(&tgt.to_device(Device::Cpu).flatten(0, -1))?;
        ensure!(
            ids.len() == numbers.len() * width,
            "generated {} ids for {} rows of width {}",
            ids.len(),
            numbers.len(),
            width
        );
        Ok(ids.chunks(width).map(<[i64]>::to_vec).collect())
    }

    /// Like [`Generator::generate`], parsed into factor lists. `None` marks
    /// output that is not a well-formed factor sequence.
    pub fn factor(
        &self,
        numbers: &[u64],
        padding: InputPadding,
        input_width: usize,
        params: &SamplingParams,
    ) -> Result<Vec<Option<Vec<u64>>>> {
        let generated = self.generate(numbers, padding, input_width, params)?;
        log::debug!("generated {} factor sequences", generated.len());
        Ok(generated
            .iter()
            .map(|ids| self.tokenizer.decode_factors(ids))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factorizer_core::FactorizerConfig;
    use tch::nn;

    #[test]
    fn generation_respects_decode_bound() {
        tch::manual_seed(0);
        let tokenizer = Tokenizer::new();
        let config = FactorizerConfig {
            n_tokens: tokenizer.len() as i64,
            pad_token_id: tokenizer.pad_token_id(),
            max_decode_size: 7,
            n_embd: 16,
            n_head: 2,
            n_enc_layer: 1,
            n_dec_layer: 1,
            dim_feedforward: 32,
            dropout: 0.0,
            layer_norm_epsilon: 1e-5,
            use_bias: true,
        };
        let vs = nn::VarStore::new(Device::Cpu);
        let model = Factorizer::new(&vs.root(), &config).unwrap();
        let generator = Generator::new(&model, &tokenizer, Device::Cpu);

        let rows = generator
            .generate(&[6, 35, 97], InputPadding::Pad, 4, &SamplingParams::default())
            .unwrap();

        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert!(row.len() <= 7);
            assert_eq!(row[0], tokenizer.sos_token_id());
        }
        // Untrained output is arbitrary, but parsing must not panic.
        let parsed = generator
            .factor(&[6, 35, 97], InputPadding::Pad, 4, &SamplingParams::default())
            .unwrap();
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn oversized_number_is_an_error() {
        let tokenizer = Tokenizer::new();
        let config = FactorizerConfig {
            n_tokens: tokenizer.len() as i64,
            pad_token_id: tokenizer.pad_token_id(),
            max_decode_size: 7,
            n_embd: 8,
            n_head: 2,
            n_enc_layer: 1,
            n_dec_layer: 1,
            dim_feedforward: 16,
            dropout: 0.0,
            layer_norm_epsilon: 1e-5,
            use_bias: false,
        };
        let vs = nn::VarStore::new(Device::Cpu);
        let model = Factorizer::new(&vs.root(), &config).unwrap();
        let generator = Generator::new(&model, &tokenizer, Device::Cpu);

        assert!(generator
            .generate(&[123456], InputPadding::Zeros, 3, &SamplingParams::default())
            .is_err());
    }
}
