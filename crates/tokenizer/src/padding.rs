use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TokenizerError;

/// How a number is laid out in the fixed-width encoder input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPadding {
    /// Digits, an end symbol, then pad symbols: `360._ _`.
    #[default]
    Pad,
    /// Digits left-filled with zeros to the full width: `00360`.
    Zeros,
}

impl InputPadding {
    /// Positions the policy needs on top of the digits themselves.
    pub fn reserved_positions(self) -> usize {
        match self {
            InputPadding::Pad => 1,
            InputPadding::Zeros => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InputPadding::Pad => "pad",
            InputPadding::Zeros => "zeros",
        }
    }
}

impl fmt::Display for InputPadding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputPadding {
    type Err = TokenizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pad" => Ok(InputPadding::Pad),
            "zeros" => Ok(InputPadding::Zeros),
            other => Err(TokenizerError::UnknownPadding(other.to_string())),
        }
    }
}
