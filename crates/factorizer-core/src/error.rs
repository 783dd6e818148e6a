use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Safetensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("Unsupported dtype: {0:?}")]
    UnsupportedDtype(safetensors::Dtype),

    #[error("Checkpoint is missing tensor {0}")]
    MissingTensor(String),

    #[error("Checkpoint has tensor {0} which the model does not define")]
    UnexpectedTensor(String),

    #[error("Tensor {name} has shape {found:?} in the checkpoint, model expects {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<i64>,
        found: Vec<i64>,
    },
}
