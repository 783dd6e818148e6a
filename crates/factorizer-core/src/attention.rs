use tch::{nn, Kind, Tensor};

use crate::config::FactorizerConfig;

/// Multi-head attention usable as encoder self-attention, causal decoder
/// self-attention, or decoder cross-attention over the encoder memory.
#[derive(Debug)]
pub struct MultiHeadAttention {
    q_proj: nn::Linear,
    kv_proj: nn::Linear,
    out_proj: nn::Linear,
    n_head: i64,
    dropout: f64,
    causal: bool,
}

impl MultiHeadAttention {
    pub fn new(vs: &nn::Path, config: &FactorizerConfig, causal: bool) -> Self {
        let n_embd = config.n_embd;
        let linear_config = nn::LinearConfig {
            bias: config.use_bias,
            ..Default::default()
        };

        Self {
            q_proj: nn::linear(vs / "q_proj", n_embd, n_embd, linear_config),
            kv_proj: nn::linear(vs / "kv_proj", n_embd, 2 * n_embd, linear_config),
            out_proj: nn::linear(vs / "out_proj", n_embd, n_embd, linear_config),
            n_head: config.n_head,
            dropout: config.dropout,
            causal,
        }
    }

    /// x: [batch, t, n_embd] queries.
    /// context: [batch, s, n_embd] keys and values (`x` itself for self-attention).
    /// key_padding_mask: [batch, s], `true` where the key must be ignored.
    pub fn forward_t(
        &self,
        x: &Tensor,
        context: &Tensor,
        key_padding_mask: Option<&Tensor>,
        train: bool,
    ) -> Tensor {
        let (b, t, c) = dims3(x);
        let s = context.size()[1];
        let head_size = c / self.n_head;

        let q = x
            .apply(&self.q_proj)
            .view([b, t, self.n_head, head_size])
            .transpose(1, 2);
        let kv = context.apply(&self.kv_proj).chunk(2, -1);
        let k = kv[0].view([b, s, self.n_head, head_size]).transpose(1, 2);
        let v = kv[1].view([b, s, self.n_head, head_size]).transpose(1, 2);

        let mut att = q.matmul(&k.transpose(-2, -1)) * (1.0 / (head_size as f64).sqrt());

        if self.causal {
            let future = Tensor::ones([t, s], (Kind::Bool, x.device()))
                .tril(0)
                .logical_not();
            att = att.masked_fill(&future, f64::NEG_INFINITY);
        }
        if let Some(mask) = key_padding_mask {
            att = att.masked_fill(&mask.view([b, 1, 1, s]), f64::NEG_INFINITY);
        }

        let att = att.softmax(-1, Kind::Float).dropout(self.dropout, train);
        att.matmul(&v)
            .transpose(1, 2)
            .contiguous()
            .view([b, t, c])
            .apply(&self.out_proj)
    }
}

pub(crate) fn dims3(x: &Tensor) -> (i64, i64, i64) {
    let size = x.size();
    (size[0], size[1], size[2])
}
