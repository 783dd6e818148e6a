pub mod generator;
pub mod sampling;

pub use generator::Generator;
pub use sampling::{Sampler, SamplingParams};
