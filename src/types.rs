//! Strong typing with newtypes for domain concepts.
//!
//! This module provides type-safe wrappers around primitive types to prevent
//! common errors and provide better API design through the type system.
//! Frames (discrete time steps of the acoustic signal) are plain `usize`
//! throughout the crate since they are used pervasively as array indices.

use serde::{Deserialize, Serialize};

/// Sentinel for an absent right-context score.
pub const NO_RC: i32 = i32::MIN;

/// Identifier of a word in the pronunciation dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WordId(pub i32);

impl WordId {
    /// Sentinel for "no word".
    pub const NONE: Self = Self(-1);

    /// Create a new word ID.
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    /// Get the word ID value.
    pub fn value(self) -> i32 {
        self.0
    }

    /// Check if this is the "no word" sentinel.
    pub fn is_none(self) -> bool {
        self.0 < 0
    }
}

impl std::fmt::Display for WordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "word_{}", self.0)
    }
}

/// Logical index of an entry in a backpointer table.
///
/// Indices are stable across physical compaction of the table; a released
/// index simply becomes invalid. `NO_BP` marks "no predecessor" and is
/// distinct from index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BpIdx(pub i32);

impl BpIdx {
    /// Sentinel for "no such backpointer".
    pub const NO_BP: Self = Self(-1);

    /// Create a new backpointer index.
    pub fn new(idx: usize) -> Self {
        Self(idx as i32)
    }

    /// Check if this is the "no backpointer" sentinel.
    pub fn is_no_bp(self) -> bool {
        self.0 < 0
    }

    /// Get the index as a usize.
    ///
    /// # Panics
    ///
    /// Panics on the `NO_BP` sentinel; callers must check `is_no_bp` first.
    pub fn index(self) -> usize {
        assert!(self.0 >= 0, "NO_BP sentinel used as a real index");
        self.0 as usize
    }
}

impl std::fmt::Display for BpIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_no_bp() {
            write!(f, "bp_none")
        } else {
            write!(f, "bp_{}", self.0)
        }
    }
}

/// Fixed-width bit-vector recording which right contexts are present on a
/// scored arc.
///
/// The width is decided once, from the number of right-context phonetic
/// units, when the owning arc buffer is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RcBits {
    words: Box<[u64]>,
}

impl RcBits {
    /// Create an all-clear bit-vector wide enough for `n_bits` contexts.
    pub fn new(n_bits: usize) -> Self {
        Self {
            words: vec![0u64; n_bits.div_ceil(64)].into_boxed_slice(),
        }
    }

    /// Set bit `i`.
    pub fn set(&mut self, i: usize) {
        self.words[i / 64] |= 1u64 << (i % 64);
    }

    /// Test bit `i`.
    pub fn is_set(&self, i: usize) -> bool {
        self.words[i / 64] & (1u64 << (i % 64)) != 0
    }

    /// Clear every bit.
    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Size in bytes of the backing storage.
    pub fn size_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bpidx_sentinel() {
        assert!(BpIdx::NO_BP.is_no_bp());
        assert!(!BpIdx::new(0).is_no_bp());
        assert_eq!(BpIdx::new(7).index(), 7);
    }

    #[test]
    #[should_panic]
    fn test_bpidx_sentinel_index_panics() {
        BpIdx::NO_BP.index();
    }

    #[test]
    fn test_rc_bits() {
        let mut bits = RcBits::new(70);
        assert_eq!(bits.count(), 0);
        bits.set(0);
        bits.set(69);
        assert!(bits.is_set(0));
        assert!(!bits.is_set(1));
        assert!(bits.is_set(69));
        assert_eq!(bits.count(), 2);
        bits.clear_all();
        assert_eq!(bits.count(), 0);
    }
}
