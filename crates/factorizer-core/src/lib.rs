pub mod attention;
pub mod config;
pub mod error;
pub mod layer_norm;
pub mod positional;
pub mod safetensors_util;
pub mod transformer;

pub use config::FactorizerConfig;
pub use error::ModelError;
pub use transformer::Factorizer;
