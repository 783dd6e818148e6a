//! Fields computed from other fields. Each function recomputes its outputs
//! from its inputs every time, so calling it on an already-derived config is
//! a no-op.

use tokenizer::symbols::PAD;
use tokenizer::{InputPadding, Tokenizer};

use crate::config::{Config, TokenizerInfo};
use crate::error::{require, Result};

/// Decimal digits of the largest number below `2^max_pow` (1 for `max_pow = 0`).
pub fn max_digits(max_pow: u32) -> usize {
    match 1u128.checked_shl(max_pow) {
        Some(bound) if max_pow < 128 => (bound - 1).max(1).to_string().len(),
        _ => (max_pow as f64 * std::f64::consts::LOG10_2).floor() as usize + 1,
    }
}

/// Encoder width that holds every number below `2^max_pow` under `padding`.
pub fn max_input_size(max_pow: u32, padding: InputPadding) -> usize {
    max_digits(max_pow) + padding.reserved_positions()
}

/// Decoder width that holds the longest factor sequence below `2^max_pow`.
///
/// Factors of 2 cost the most characters per bit: `k` of them take `2k - 1`
/// characters with separators, plus the start and end symbols.
pub fn max_decode_size(max_pow: u32) -> usize {
    let n_factors = max_pow.max(1) as usize;
    2 * n_factors + 1
}

pub fn derive_sizes(config: &mut Config) -> Result<()> {
    let max_pow = config.data.max_pow()?;
    let padding = config.data.padding()?;

    let input_size = max_input_size(max_pow, padding);
    let decode_size = max_decode_size(max_pow);
    overwrite(&mut config.data.max_input_size, input_size, "data.max_input_size");
    overwrite(&mut config.data.max_decode_size, decode_size, "data.max_decode_size");
    Ok(())
}

/// Vocabulary size and pad id, read off the tokenizer in use.
pub fn derive_tokenizer_fields(config: &mut Config, tokenizer: &Tokenizer) -> Result<()> {
    let pad_token_id = tokenizer.encode(PAD)?[0];
    let info = TokenizerInfo {
        n_tokens: tokenizer.len(),
        pad_token_id,
    };
    overwrite(&mut config.tokenizer, info, "tokenizer");
    Ok(())
}

/// `nb_steps = nb_epochs * train_loader_len`. Must only run once the
/// training loader exists.
pub fn derive_step_count(config: &mut Config, train_loader_len: usize) -> Result<usize> {
    let nb_epochs = require(&config.scheduler.nb_epochs, "scheduler.nb_epochs")?;
    let nb_steps = nb_epochs * train_loader_len;
    overwrite(&mut config.scheduler.nb_steps, nb_steps, "scheduler.nb_steps");
    Ok(nb_steps)
}

fn overwrite<T: PartialEq + std::fmt::Debug>(slot: &mut Option<T>, value: T, field: &str) {
    if let Some(previous) = slot.as_ref() {
        if *previous != value {
            log::warn!("recomputed {field}: {previous:?} -> {value:?}");
        }
    }
    *slot = Some(value);
}
