use tch::{nn, Kind, Tensor};

#[derive(Debug)]
pub struct RMSNorm {
    weight: Tensor,
    eps: f64,
}

impl RMSNorm {
    pub fn new(vs: &nn::Path, dim: i64, eps: f64) -> Self {
        let weight = vs.var("weight", &[dim], nn::Init::Const(1.0));
        Self { weight, eps }
    }
}

impl nn::Module for RMSNorm {
    /// x: [batch, seq_len, dim]
    fn forward(&self, x: &Tensor) -> Tensor {
        let rms = (x.pow_tensor_scalar(2.0).mean_dim(Some(&[-1i64][..]), true, Kind::Float)
            + self.eps)
            .rsqrt();
        x * rms * &self.weight
    }
}
