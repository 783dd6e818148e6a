use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{Result, TokenizerError};

/// Symbol table over a single-character alphabet.
///
/// Ids are dense: a symbol's id is its position in the alphabet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocab {
    symbols: Vec<char>,
    ids: HashMap<char, u32>,
}

#[derive(Serialize, Deserialize)]
struct VocabFile {
    alphabet: String,
}

impl Vocab {
    /// Ids follow the order of `alphabet`. A repeated character keeps its
    /// first id.
    pub fn from_alphabet(alphabet: &str) -> Self {
        let mut vocab = Self::default();
        for symbol in alphabet.chars() {
            vocab.push(symbol);
        }
        vocab
    }

    /// Adds `symbol` if absent and returns its id.
    pub fn push(&mut self, symbol: char) -> u32 {
        if let Some(&id) = self.ids.get(&symbol) {
            return id;
        }
        let id = self.symbols.len() as u32;
        self.symbols.push(symbol);
        self.ids.insert(symbol, id);
        id
    }

    pub fn id(&self, symbol: char) -> Option<u32> {
        self.ids.get(&symbol).copied()
    }

    /// Id of a one-character string; `None` for anything longer or shorter.
    pub fn id_of(&self, symbol: &str) -> Option<u32> {
        let mut chars = symbol.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => self.id(c),
            _ => None,
        }
    }

    pub fn symbol(&self, id: u32) -> Option<char> {
        self.symbols.get(id as usize).copied()
    }

    pub fn symbols(&self) -> &[char] {
        &self.symbols
    }

    pub fn alphabet(&self) -> String {
        self.symbols.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        let file = VocabFile {
            alphabet: self.alphabet(),
        };
        serde_json::to_writer_pretty(writer, &file)?;
        Ok(())
    }

    /// Reads a saved alphabet. Repeated symbols are rejected, since they
    /// would silently shift every later id.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let file: VocabFile = serde_json::from_reader(reader)?;

        let vocab = Self::from_alphabet(&file.alphabet);
        if vocab.len() != file.alphabet.chars().count() {
            return Err(TokenizerError::InvalidVocab(format!(
                "alphabet {:?} repeats a symbol",
                file.alphabet
            )));
        }
        Ok(vocab)
    }
}
