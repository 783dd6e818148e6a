use tch::{Device, Kind, Tensor};

/// Fixed sinusoidal position encoding, shared by encoder and decoder.
#[derive(Debug, Clone)]
pub struct SinusoidalEncoding {
    inv_freq: Vec<f32>,
}

impl SinusoidalEncoding {
    pub fn new(dim: i64) -> Self {
        // inv_freq = 1.0 / (10000 ^ (2i / dim))
        let inv_freq = (0..dim)
            .step_by(2)
            .map(|i| 1.0 / 10000.0f32.powf(i as f32 / dim as f32))
            .collect();
        Self { inv_freq }
    }

    /// Returns [1, seq_len, dim]: sin terms in the first half, cos terms in the second.
    pub fn forward(&self, seq_len: i64, device: Device) -> Tensor {
        let t = Tensor::arange(seq_len, (Kind::Float, device));
        let inv_freq = Tensor::from_slice(&self.inv_freq).to(device);

        // angles: [seq_len, dim/2]
        let angles = t.outer(&inv_freq);
        Tensor::cat(&[angles.sin(), angles.cos()], -1).unsqueeze(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_and_first_position() {
        let pe = SinusoidalEncoding::new(8).forward(5, Device::Cpu);
        assert_eq!(pe.size(), vec![1, 5, 8]);

        // Position 0: sin(0) = 0, cos(0) = 1.
        let first: Vec<f32> = Vec::<f32>::try_from(&pe.get(0).get(0)).unwrap();
        assert_eq!(first, vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0]);
    }
}
