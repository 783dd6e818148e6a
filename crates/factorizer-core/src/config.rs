use serde::{Deserialize, Serialize};

use crate::error::ModelError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorizerConfig {
    /// Size of the vocabulary shared by encoder input and decoder output.
    pub n_tokens: i64,
    /// Id of the pad symbol; masked out of attention and the loss.
    pub pad_token_id: i64,
    /// Longest decoder sequence, start and end symbols included.
    pub max_decode_size: i64,
    /// Dimension of the token embeddings (and internal transformer states).
    pub n_embd: i64,
    /// Number of attention heads.
    pub n_head: i64,
    /// Number of encoder layers.
    pub n_enc_layer: i64,
    /// Number of decoder layers.
    pub n_dec_layer: i64,
    /// Hidden width of the feed-forward blocks.
    pub dim_feedforward: i64,
    /// Dropout probability (applied to embeddings, attention and residual connections).
    pub dropout: f64,
    /// RMSNorm epsilon value.
    pub layer_norm_epsilon: f64,
    /// Whether to use bias in linear layers.
    pub use_bias: bool,
}

impl FactorizerConfig {
    pub fn head_size(&self) -> i64 {
        self.n_embd / self.n_head
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let positive = [
            ("n_tokens", self.n_tokens),
            ("max_decode_size", self.max_decode_size),
            ("n_embd", self.n_embd),
            ("n_head", self.n_head),
            ("dim_feedforward", self.dim_feedforward),
        ];
        for (name, value) in positive {
            if value <= 0 {
                return Err(ModelError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.n_enc_layer < 0 || self.n_dec_layer < 0 {
            return Err(ModelError::InvalidConfig(
                "layer counts cannot be negative".to_string(),
            ));
        }
        if self.n_embd % self.n_head != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "n_embd ({}) must be divisible by n_head ({})",
                self.n_embd, self.n_head
            )));
        }
        // Sinusoidal positions split the embedding into sin and cos halves.
        if self.n_embd % 2 != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "n_embd ({}) must be even",
                self.n_embd
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ModelError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if !(0..self.n_tokens).contains(&self.pad_token_id) {
            return Err(ModelError::InvalidConfig(format!(
                "pad_token_id {} is outside the vocabulary of {} tokens",
                self.pad_token_id, self.n_tokens
            )));
        }
        Ok(())
    }
}
