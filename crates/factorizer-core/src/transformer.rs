use tch::{nn, nn::Module, Tensor};

use crate::attention::MultiHeadAttention;
use crate::config::FactorizerConfig;
use crate::error::ModelError;
use crate::layer_norm::RMSNorm;
use crate::positional::SinusoidalEncoding;

/// FeedForward block (MLP)
#[derive(Debug)]
pub struct MLP {
    c_fc: nn::Linear,
    c_proj: nn::Linear,
    dropout: f64,
}

impl MLP {
    pub fn new(vs: &nn::Path, config: &FactorizerConfig) -> Self {
        let linear_config = nn::LinearConfig {
            bias: config.use_bias,
            ..Default::default()
        };
        let c_fc = nn::linear(
            vs / "c_fc",
            config.n_embd,
            config.dim_feedforward,
            linear_config,
        );
        let c_proj = nn::linear(
            vs / "c_proj",
            config.dim_feedforward,
            config.n_embd,
            linear_config,
        );

        Self {
            c_fc,
            c_proj,
            dropout: config.dropout,
        }
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Tensor {
        x.apply(&self.c_fc)
            .gelu("none")
            .apply(&self.c_proj)
            .dropout(self.dropout, train)
    }
}

/// Pre-norm encoder layer: self-attention then feed-forward.
#[derive(Debug)]
pub struct EncoderLayer {
    ln_1: RMSNorm,
    attn: MultiHeadAttention,
    ln_2: RMSNorm,
    mlp: MLP,
    dropout: f64,
}

impl EncoderLayer {
    pub fn new(vs: &nn::Path, config: &FactorizerConfig) -> Self {
        Self {
            ln_1: RMSNorm::new(&(vs / "ln_1"), config.n_embd, config.layer_norm_epsilon),
            attn: MultiHeadAttention::new(&(vs / "attn"), config, false),
            ln_2: RMSNorm::new(&(vs / "ln_2"), config.n_embd, config.layer_norm_epsilon),
            mlp: MLP::new(&(vs / "mlp"), config),
            dropout: config.dropout,
        }
    }

    pub fn forward_t(&self, x: &Tensor, pad_mask: &Tensor, train: bool) -> Tensor {
        let h = self.ln_1.forward(x);
        let x = x + self
            .attn
            .forward_t(&h, &h, Some(pad_mask), train)
            .dropout(self.dropout, train);

        let h = self.ln_2.forward(&x);
        &x + self.mlp.forward_t(&h, train)
    }
}

/// Pre-norm decoder layer: causal self-attention, cross-attention, feed-forward.
#[derive(Debug)]
pub struct DecoderLayer {
    ln_1: RMSNorm,
    self_attn: MultiHeadAttention,
    ln_2: RMSNorm,
    cross_attn: MultiHeadAttention,
    ln_3: RMSNorm,
    mlp: MLP,
    dropout: f64,
}

impl DecoderLayer {
    pub fn new(vs: &nn::Path, config: &FactorizerConfig) -> Self {
        Self {
            ln_1: RMSNorm::new(&(vs / "ln_1"), config.n_embd, config.layer_norm_epsilon),
            self_attn: MultiHeadAttention::new(&(vs / "self_attn"), config, true),
            ln_2: RMSNorm::new(&(vs / "ln_2"), config.n_embd, config.layer_norm_epsilon),
            cross_attn: MultiHeadAttention::new(&(vs / "cross_attn"), config, false),
            ln_3: RMSNorm::new(&(vs / "ln_3"), config.n_embd, config.layer_norm_epsilon),
            mlp: MLP::new(&(vs / "mlp"), config),
            dropout: config.dropout,
        }
    }

    pub fn forward_t(
        &self,
        x: &Tensor,
        memory: &Tensor,
        memory_mask: &Tensor,
        train: bool,
    ) -> Tensor {
        let h = self.ln_1.forward(x);
        let x = x + self
            .self_attn
            .forward_t(&h, &h, None, train)
            .dropout(self.dropout, train);

        let h = self.ln_2.forward(&x);
        let x = &x + self
            .cross_attn
            .forward_t(&h, memory, Some(memory_mask), train)
            .dropout(self.dropout, train);

        let h = self.ln_3.forward(&x);
        &x + self.mlp.forward_t(&h, train)
    }
}

/// Encoder-decoder transformer mapping a number's digits to its factor sequence.
#[derive(Debug)]
pub struct Factorizer {
    wte: nn::Embedding,
    wpe: SinusoidalEncoding,
    encoder: Vec<EncoderLayer>,
    decoder: Vec<DecoderLayer>,
    ln_enc: RMSNorm,
    ln_dec: RMSNorm,
    lm_head: nn::Linear,
    pub config: FactorizerConfig,
}

impl Factorizer {
    pub fn new(vs: &nn::Path, config: &FactorizerConfig) -> Result<Self, ModelError> {
        config.validate()?;

        let wte = nn::embedding(vs / "wte", config.n_tokens, config.n_embd, Default::default());
        let encoder = (0..config.n_enc_layer)
            .map(|i| EncoderLayer::new(&(vs / "encoder" / i), config))
            .collect();
        let decoder = (0..config.n_dec_layer)
            .map(|i| DecoderLayer::new(&(vs / "decoder" / i), config))
            .collect();
        let ln_enc = RMSNorm::new(&(vs / "ln_enc"), config.n_embd, config.layer_norm_epsilon);
        let ln_dec = RMSNorm::new(&(vs / "ln_dec"), config.n_embd, config.layer_norm_epsilon);
        let lm_head = nn::linear(
            vs / "lm_head",
            config.n_embd,
            config.n_tokens,
            nn::LinearConfig {
                bias: false,
                ..Default::default()
            },
        );

        Ok(Self {
            wte,
            wpe: SinusoidalEncoding::new(config.n_embd),
            encoder,
            decoder,
            ln_enc,
            ln_dec,
            lm_head,
            config: config.clone(),
        })
    }

    fn embed(&self, idx: &Tensor, train: bool) -> Tensor {
        let seq_len = idx.size()[1];
        let tok_emb = idx.apply(&self.wte) * (self.config.n_embd as f64).sqrt();
        (tok_emb + self.wpe.forward(seq_len, idx.device())).dropout(self.config.dropout, train)
    }

    /// src: [batch, s] token ids.
    /// Returns the encoder memory [batch, s, n_embd] and the pad mask [batch, s].
    pub fn encode(&self, src: &Tensor, train: bool) -> (Tensor, Tensor) {
        let pad_mask = src.eq(self.config.pad_token_id);
        let mut x = self.embed(src, train);
        for layer in &self.encoder {
            x = layer.forward_t(&x, &pad_mask, train);
        }
        (self.ln_enc.forward(&x), pad_mask)
    }

    /// tgt: [batch, t] token ids, starting with the start symbol.
    /// Returns logits [batch, t, n_tokens].
    pub fn decode(&self, memory: &Tensor, memory_mask: &Tensor, tgt: &Tensor, train: bool) -> Tensor {
        let mut x = self.embed(tgt, train);
        for layer in &self.decoder {
            x = layer.forward_t(&x, memory, memory_mask, train);
        }
        self.ln_dec.forward(&x).apply(&self.lm_head)
    }

    pub fn forward_t(&self, src: &Tensor, tgt: &Tensor, train: bool) -> Tensor {
        let (memory, memory_mask) = self.encode(src, train);
        self.decode(&memory, &memory_mask, tgt, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    fn tiny_config() -> FactorizerConfig {
        FactorizerConfig {
            n_tokens: 14,
            pad_token_id: 0,
            max_decode_size: 9,
            n_embd: 16,
            n_head: 2,
            n_enc_layer: 1,
            n_dec_layer: 1,
            dim_feedforward: 32,
            dropout: 0.0,
            layer_norm_epsilon: 1e-5,
            use_bias: true,
        }
    }

    #[test]
    fn forward_produces_logits_per_target_position() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = Factorizer::new(&vs.root(), &tiny_config()).unwrap();

        let src = Tensor::from_slice(&[5i64, 6, 2, 0, 7, 8, 9, 2]).view([2, 4]);
        let tgt = Tensor::from_slice(&[1i64, 6, 3, 1, 7, 2]).view([2, 3]);
        let logits = model.forward_t(&src, &tgt, false);

        assert_eq!(logits.size(), vec![2, 3, 14]);
        assert_eq!(logits.isnan().any().to_kind(Kind::Int64).int64_value(&[]), 0);
    }

    #[test]
    fn use_bias_controls_every_bias() {
        let count_biases = |use_bias: bool| {
            let vs = nn::VarStore::new(Device::Cpu);
            let config = FactorizerConfig {
                use_bias,
                ..tiny_config()
            };
            Factorizer::new(&vs.root(), &config).unwrap();
            vs.variables()
                .keys()
                .filter(|name| name.ends_with("bias"))
                .count()
        };
        assert_eq!(count_biases(false), 0);
        assert!(count_biases(true) > 0);
    }

    #[test]
    fn decoder_is_causal() {
        let vs = nn::VarStore::new(Device::Cpu);
        let model = Factorizer::new(&vs.root(), &tiny_config()).unwrap();

        let src = Tensor::from_slice(&[5i64, 6, 2, 0]).view([1, 4]);
        let short = Tensor::from_slice(&[1i64, 6]).view([1, 2]);
        let long = Tensor::from_slice(&[1i64, 6, 9]).view([1, 3]);

        let a = model.forward_t(&src, &short, false);
        let b = model.forward_t(&src, &long, false).narrow(1, 0, 2);
        assert!(a.allclose(&b, 1e-5, 1e-6, false));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = FactorizerConfig {
            n_embd: 15,
            n_head: 3,
            ..tiny_config()
        };
        assert!(matches!(
            Factorizer::new(&vs.root(), &config),
            Err(ModelError::InvalidConfig(_))
        ));
    }
}
