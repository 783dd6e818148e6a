use std::path::Path;

use crate::error::{Result, TokenizerError};
use crate::padding::InputPadding;
use crate::vocab::Vocab;

pub const PAD: &str = "_";
pub const SOS: &str = ">";
pub const EOS: &str = ".";
pub const MUL: &str = "x";

const DIGITS: &str = "0123456789";

/// Specials first, so that pad, start, end and separator take ids 0 to 3.
const ALPHABET: &str = "_>.x0123456789";

/// Character-level tokenizer over the factorization alphabet.
///
/// Every symbol is a single character, so `encode` maps one char to one id.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocab: Vocab,
    pad_id: i64,
    sos_id: i64,
    eos_id: i64,
    mul_id: i64,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            vocab: Vocab::from_alphabet(ALPHABET),
            pad_id: 0,
            sos_id: 1,
            eos_id: 2,
            mul_id: 3,
        }
    }

    pub fn from_vocab(vocab: Vocab) -> Result<Self> {
        let special = |symbol: &'static str| {
            vocab
                .id_of(symbol)
                .map(i64::from)
                .ok_or(TokenizerError::MissingSpecial(symbol))
        };
        let pad_id = special(PAD)?;
        let sos_id = special(SOS)?;
        let eos_id = special(EOS)?;
        let mul_id = special(MUL)?;
        if let Some(digit) = DIGITS.chars().find(|&c| vocab.id(c).is_none()) {
            return Err(TokenizerError::UnknownSymbol(digit));
        }
        Ok(Self {
            vocab,
            pad_id,
            sos_id,
            eos_id,
            mul_id,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_vocab(Vocab::load(path)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.vocab.save(path)
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    /// Vocabulary size.
    pub fn len(&self) -> usize {
        self.vocab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocab.is_empty()
    }

    pub fn pad_token_id(&self) -> i64 {
        self.pad_id
    }

    pub fn sos_token_id(&self) -> i64 {
        self.sos_id
    }

    pub fn eos_token_id(&self) -> i64 {
        self.eos_id
    }

    pub fn encode(&self, text: &str) -> Result<Vec<i64>> {
        text.chars()
            .map(|c| {
                self.vocab
                    .id(c)
                    .map(i64::from)
                    .ok_or(TokenizerError::UnknownSymbol(c))
            })
            .collect()
    }

    /// Ids outside the vocabulary are skipped.
    pub fn decode(&self, ids: &[i64]) -> String {
        ids.iter()
            .filter_map(|&id| u32::try_from(id).ok())
            .filter_map(|id| self.vocab.symbol(id))
            .collect()
    }

    /// Encoder input for `n`, exactly `width` ids long.
    pub fn encode_number(&self, n: u64, padding: InputPadding, width: usize) -> Result<Vec<i64>> {
        let digits = n.to_string();
        let len = digits.len() + padding.reserved_positions();
        if len > width {
            return Err(TokenizerError::SequenceTooLong { len, max: width });
        }

        match padding {
            InputPadding::Pad => {
                let mut ids = self.encode(&digits)?;
                ids.push(self.eos_id);
                ids.resize(width, self.pad_id);
                Ok(ids)
            }
            InputPadding::Zeros => self.encode(&format!("{digits:0>width$}")),
        }
    }

    /// Decoder target `>f1xf2x...fk.` followed by pad ids up to `width`.
    pub fn encode_factors(&self, factors: &[u64], width: usize) -> Result<Vec<i64>> {
        let body = factors
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(MUL);

        let mut ids = Vec::with_capacity(width);
        ids.push(self.sos_id);
        ids.extend(self.encode(&body)?);
        ids.push(self.eos_id);
        if ids.len() > width {
            return Err(TokenizerError::SequenceTooLong {
                len: ids.len(),
                max: width,
            });
        }
        ids.resize(width, self.pad_id);
        Ok(ids)
    }

    /// Parses a generated sequence back into factors.
    ///
    /// A leading start symbol is skipped and everything after the first end
    /// symbol is ignored. Returns `None` when the body is empty or is not a
    /// `x`-separated list of positive integers.
    pub fn decode_factors(&self, ids: &[i64]) -> Option<Vec<u64>> {
        let ids = match ids.first() {
            Some(&first) if first == self.sos_id => &ids[1..],
            _ => ids,
        };
        let end = ids
            .iter()
            .position(|&id| id == self.eos_id)
            .unwrap_or(ids.len());
        let body = &ids[..end];
        if body.is_empty() || body.contains(&self.pad_id) || body.contains(&self.sos_id) {
            return None;
        }

        self.decode(body)
            .split(MUL)
            .map(|part| part.parse::<u64>().ok().filter(|&f| f > 0))
            .collect()
    }

    pub fn is_separator(&self, id: i64) -> bool {
        id == self.mul_id
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_id_comes_from_the_vocabulary() {
        let tokenizer = Tokenizer::new();
        assert_eq!(tokenizer.encode(PAD).unwrap()[0], tokenizer.pad_token_id());
        assert_eq!(tokenizer.len(), 14);
    }

    #[test]
    fn encode_rejects_unknown_symbols() {
        let tokenizer = Tokenizer::new();
        assert!(matches!(
            tokenizer.encode("12+3"),
            Err(TokenizerError::UnknownSymbol('+'))
        ));
    }

    #[test]
    fn encode_number_pad_policy() {
        let tokenizer = Tokenizer::new();
        let ids = tokenizer.encode_number(42, InputPadding::Pad, 5).unwrap();
        assert_eq!(tokenizer.decode(&ids), "42.__");
    }

    #[test]
    fn encode_number_zeros_policy() {
        let tokenizer = Tokenizer::new();
        let ids = tokenizer.encode_number(42, InputPadding::Zeros, 4).unwrap();
        assert_eq!(tokenizer.decode(&ids), "0042");
    }

    #[test]
    fn encode_number_too_wide() {
        let tokenizer = Tokenizer::new();
        let err = tokenizer.encode_number(1024, InputPadding::Pad, 4).unwrap_err();
        assert!(matches!(err, TokenizerError::SequenceTooLong { len: 5, max: 4 }));
    }

    #[test]
    fn encode_factors_layout() {
        let tokenizer = Tokenizer::new();
        let ids = tokenizer.encode_factors(&[2, 2, 3, 5], 12).unwrap();
        assert_eq!(tokenizer.decode(&ids), ">2x2x3x5.___");
        assert!(tokenizer.is_separator(ids[2]));
    }

    #[test]
    fn decode_factors_stops_at_end_symbol() {
        let tokenizer = Tokenizer::new();
        let ids = tokenizer.encode(">3x7.x9__").unwrap();
        assert_eq!(tokenizer.decode_factors(&ids), Some(vec![3, 7]));
    }

    #[test]
    fn decode_factors_malformed() {
        let tokenizer = Tokenizer::new();
        for text in [">.", ">2xx3.", ">x5.", ">0x5.", ">2_3."] {
            let ids = tokenizer.encode(text).unwrap();
            assert_eq!(tokenizer.decode_factors(&ids), None, "{text}");
        }
    }

    #[test]
    fn vocab_survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");
        let tokenizer = Tokenizer::new();
        tokenizer.save(&path).unwrap();

        let loaded = Tokenizer::load(&path).unwrap();
        assert_eq!(loaded.vocab(), tokenizer.vocab());
        assert_eq!(loaded.pad_token_id(), tokenizer.pad_token_id());
        assert_eq!(loaded.vocab().alphabet(), ALPHABET);
    }

    #[test]
    fn special_ids_follow_alphabet_order() {
        let tokenizer = Tokenizer::from_vocab(Vocab::from_alphabet("0123456789x._>")).unwrap();
        assert_eq!(tokenizer.pad_token_id(), 13);
        assert_eq!(tokenizer.eos_token_id(), 11);
        assert_eq!(tokenizer.decode(&tokenizer.encode("12x3").unwrap()), "12x3");
    }

    #[test]
    fn from_vocab_requires_specials() {
        assert!(matches!(
            Tokenizer::from_vocab(Vocab::from_alphabet("01")),
            Err(TokenizerError::MissingSpecial(PAD))
        ));
        assert!(matches!(
            Tokenizer::from_vocab(Vocab::from_alphabet("_>.x012345678")),
            Err(TokenizerError::UnknownSymbol('9'))
        ));
    }
}
