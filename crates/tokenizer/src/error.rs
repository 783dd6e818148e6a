use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown symbol: {0:?}")]
    UnknownSymbol(char),

    #[error("Vocabulary is missing special symbol {0:?}")]
    MissingSpecial(&'static str),

    #[error("Sequence of length {len} does not fit in {max} positions")]
    SequenceTooLong { len: usize, max: usize },

    #[error("Invalid vocabulary: {0}")]
    InvalidVocab(String),

    #[error("Unknown padding policy: {0}")]
    UnknownPadding(String),
}

pub type Result<T> = std::result::Result<T, TokenizerError>;
