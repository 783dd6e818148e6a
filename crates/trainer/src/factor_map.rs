use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::dataset::DataSplit;
use crate::error::Result;

/// Ground-truth factorizations for every number in one data file.
///
/// Built once per run, then only read. The dataset preparer and the metrics
/// pass both take it by reference.
#[derive(Debug, Clone)]
pub struct GlobalFactorMapping {
    source: PathBuf,
    factors: HashMap<u64, Vec<u64>>,
}

impl GlobalFactorMapping {
    pub fn from_data_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let split = DataSplit::load(path.as_ref())?;
        Ok(Self::from_numbers(
            path.as_ref(),
            split.train.iter().chain(&split.test).copied(),
        ))
    }

    pub fn from_numbers(source: impl Into<PathBuf>, numbers: impl IntoIterator<Item = u64>) -> Self {
        let mut numbers: Vec<u64> = numbers.into_iter().collect();
        numbers.sort_unstable();
        numbers.dedup();

        let factors = numbers
            .into_par_iter()
            .map(|n| (n, factorize(n)))
            .collect();

        Self {
            source: source.into(),
            factors,
        }
    }

    /// The data file this mapping was built from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Prime factors of `n` in ascending order.
    pub fn get(&self, n: u64) -> Option<&[u64]> {
        self.factors.get(&n).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}

/// Prime factors of `n` in ascending order, by trial division.
/// Empty for 0 and 1.
pub fn factorize(mut n: u64) -> Vec<u64> {
    let mut factors = Vec::new();
    if n < 2 {
        return factors;
    }
    while n % 2 == 0 {
        factors.push(2);
        n /= 2;
    }
    let mut d = 3u64;
    while d <= n / d {
        while n % d == 0 {
            factors.push(d);
            n /= d;
        }
        d += 2;
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}

pub fn is_prime(n: u64) -> bool {
    n >= 2 && factorize(n).len() == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factorize_known_values() {
        assert_eq!(factorize(0), Vec::<u64>::new());
        assert_eq!(factorize(1), Vec::<u64>::new());
        assert_eq!(factorize(2), vec![2]);
        assert_eq!(factorize(360), vec![2, 2, 2, 3, 3, 5]);
        assert_eq!(factorize(1023), vec![3, 11, 31]);
        assert_eq!(factorize(4294967291), vec![4294967291]);
        assert_eq!(factorize(49), vec![7, 7]);
    }

    #[test]
    fn primality() {
        let primes: Vec<u64> = (0..30).filter(|&n| is_prime(n)).collect();
        assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
    }

    #[test]
    fn mapping_covers_every_number() {
        let mapping = GlobalFactorMapping::from_numbers("mem.json", [12, 7, 12, 100]);
        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping.get(12), Some(&[2, 2, 3][..]));
        assert_eq!(mapping.get(100), Some(&[2, 2, 5, 5][..]));
        assert_eq!(mapping.get(13), None);
        assert_eq!(mapping.source(), Path::new("mem.json"));
    }
}
