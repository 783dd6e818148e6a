pub mod error;
pub mod padding;
pub mod symbols;
pub mod vocab;

pub use error::TokenizerError;
pub use padding::InputPadding;
pub use symbols::Tokenizer;
pub use vocab::Vocab;
