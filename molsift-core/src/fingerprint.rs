//! Fixed-length fingerprint bit vectors.

use crate::{Result, SiftError};

/// A fixed-length bit vector with a cached count of set bits.
///
/// Fingerprints are built once and then compared many times, so the
/// cardinality is recomputed on every mutation and read for free afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fingerprint {
    words: Vec<u64>,
    nbits: usize,
    on_bits: u32,
}

impl Fingerprint {
    /// Create an empty fingerprint of `nbits` bits.
    ///
    /// # Panics
    ///
    /// Panics if `nbits == 0`.
    pub fn new(nbits: usize) -> Self {
        assert!(nbits > 0, "fingerprint length must be positive");
        Fingerprint {
            words: vec![0u64; nbits.div_ceil(64)],
            nbits,
            on_bits: 0,
        }
    }

    /// Build a fingerprint with the given bit positions set.
    pub fn from_positions(nbits: usize, positions: impl IntoIterator<Item = usize>) -> Result<Self> {
        let mut fp = Fingerprint::new(nbits);
        for pos in positions {
            if pos >= nbits {
                return Err(SiftError::InvalidInput(format!(
                    "bit position {pos} out of range for {nbits}-bit fingerprint"
                )));
            }
            fp.set_bit(pos);
        }
        Ok(fp)
    }

    /// Set a bit. Positions wrap around the fingerprint length.
    pub fn set_bit(&mut self, pos: usize) {
        let pos = pos % self.nbits;
        let mask = 1u64 << (pos % 64);
        let word = &mut self.words[pos / 64];
        if *word & mask == 0 {
            *word |= mask;
            self.on_bits += 1;
        }
    }

    /// Get a bit. Positions wrap around the fingerprint length.
    pub fn get_bit(&self, pos: usize) -> bool {
        let pos = pos % self.nbits;
        (self.words[pos / 64] >> (pos % 64)) & 1 == 1
    }

    /// Number of set bits.
    pub fn on_bits(&self) -> u32 {
        self.on_bits
    }

    /// Number of bits in the fingerprint.
    pub fn nbits(&self) -> usize {
        self.nbits
    }

    /// Popcount of `self AND other`.
    ///
    /// # Panics
    ///
    /// Panics if the fingerprints differ in length.
    pub fn and_count(&self, other: &Fingerprint) -> u32 {
        assert_eq!(self.nbits, other.nbits, "fingerprints must have the same size");
        self.words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| (a & b).count_ones())
            .sum()
    }

    /// Whether every set bit of `self` is also set in `other`.
    ///
    /// This is the substructure pre-screen: a pattern can only embed in a
    /// record whose fingerprint covers the pattern's fingerprint. The cheap
    /// cardinality comparison runs first.
    pub fn is_subset_of(&self, other: &Fingerprint) -> bool {
        self.on_bits <= other.on_bits && self.and_count(other) == self.on_bits
    }

    /// Iterate over the positions of set bits in ascending order.
    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            let mut w = word;
            std::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let bit = w.trailing_zeros() as usize;
                w &= w - 1;
                Some(wi * 64 + bit)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_operations() {
        let mut fp = Fingerprint::new(128);
        assert!(!fp.get_bit(42));
        fp.set_bit(42);
        assert!(fp.get_bit(42));
        assert_eq!(fp.on_bits(), 1);
        fp.set_bit(42);
        assert_eq!(fp.on_bits(), 1);
        fp.set_bit(100);
        assert_eq!(fp.on_bits(), 2);
    }

    #[test]
    fn positions_roundtrip() {
        let fp = Fingerprint::from_positions(200, [3, 64, 199]).unwrap();
        assert_eq!(fp.positions().collect::<Vec<_>>(), vec![3, 64, 199]);
        assert_eq!(fp.on_bits(), 3);
    }

    #[test]
    fn out_of_range_position_rejected() {
        assert!(Fingerprint::from_positions(64, [64]).is_err());
    }

    #[test]
    fn subset_relation() {
        let small = Fingerprint::from_positions(256, [1, 7, 130]).unwrap();
        let large = Fingerprint::from_positions(256, [1, 7, 99, 130, 255]).unwrap();
        assert!(small.is_subset_of(&large));
        assert!(!large.is_subset_of(&small));
        assert_eq!(small.and_count(&large), 3);
    }

    #[test]
    fn empty_is_subset_of_everything() {
        let empty = Fingerprint::new(64);
        let other = Fingerprint::from_positions(64, [5]).unwrap();
        assert!(empty.is_subset_of(&other));
        assert!(empty.is_subset_of(&empty));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    const NBITS: usize = 512;

    proptest! {
        #[test]
        fn subset_of_union_always_passes(
            pattern in proptest::collection::vec(0..NBITS, 0..64),
            extra in proptest::collection::vec(0..NBITS, 0..64),
        ) {
            let p = Fingerprint::from_positions(NBITS, pattern.iter().copied()).unwrap();
            let r = Fingerprint::from_positions(NBITS, pattern.iter().chain(&extra).copied()).unwrap();
            prop_assert!(p.on_bits() <= r.on_bits());
            prop_assert_eq!(p.and_count(&r), p.on_bits());
            prop_assert!(p.is_subset_of(&r));
        }

        #[test]
        fn missing_bit_fails_screen(
            pattern in proptest::collection::vec(0..NBITS, 1..64),
            drop_idx in any::<proptest::sample::Index>(),
        ) {
            let p = Fingerprint::from_positions(NBITS, pattern.iter().copied()).unwrap();
            let dropped = pattern[drop_idx.index(pattern.len())];
            let r = Fingerprint::from_positions(
                NBITS,
                pattern.iter().copied().filter(|&b| b != dropped),
            ).unwrap();
            prop_assert!(!p.is_subset_of(&r));
        }
    }
}
