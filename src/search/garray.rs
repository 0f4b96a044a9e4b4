//! Growable array with a sliding logical base.
//!
//! [`GArray`] backs both the backpointer table and the arc buffer. Elements
//! are addressed by *logical* index: appends hand out monotonically
//! increasing indices that stay valid for the life of the element, even
//! after the physical prefix of the buffer has been reclaimed. Durable
//! references between structures are therefore indices, never addresses;
//! any `view` taken over the array is invalidated by `shift_from`.
//!
//! Two-step release: `set_base(n)` logically discards everything below `n`
//! without touching memory (accesses below `n` become fatal), and
//! `shift_from(n)` later compacts the allocation so logical index `n` sits
//! at physical offset 0. Callers that don't need the deferral just call
//! `shift_from` followed by `set_base`.

/// A growable array of `T` indexed by logical position.
///
/// Invariant: `base ≤ low ≤ next_idx`, where `base` is the logical index of
/// the first physically present element, `low` the first *valid* one, and
/// `next_idx` one past the last written element.
#[derive(Debug, Clone)]
pub struct GArray<T> {
    data: Vec<T>,
    base: usize,
    low: usize,
}

impl<T> GArray<T> {
    /// Create an empty array.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty array with room for `cap` elements.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            data: Vec::with_capacity(cap),
            base: 0,
            low: 0,
        }
    }

    /// Append an element, returning its logical index.
    ///
    /// Amortized O(1); reallocation preserves all logical indices.
    pub fn append(&mut self, elem: T) -> usize {
        self.data.push(elem);
        self.base + self.data.len() - 1
    }

    /// Logical index one past the last written element.
    pub fn next_idx(&self) -> usize {
        self.base + self.data.len()
    }

    /// Logical index of the first physically present element.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Logical index of the first element still valid to access.
    pub fn low(&self) -> usize {
        self.low
    }

    /// Number of valid elements.
    pub fn len(&self) -> usize {
        self.next_idx() - self.low
    }

    /// Whether the array holds no valid elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Physical capacity in elements, for allocation diagnostics.
    pub fn alloc_size(&self) -> usize {
        self.data.capacity()
    }

    #[inline]
    fn check(&self, idx: usize) {
        assert!(
            idx >= self.low && idx < self.next_idx(),
            "garray index {} outside valid range [{}, {})",
            idx,
            self.low,
            self.next_idx()
        );
    }

    /// Reference to the element at logical index `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is below the current base or at/after `next_idx`;
    /// such accesses are programming errors.
    pub fn get(&self, idx: usize) -> &T {
        self.check(idx);
        &self.data[idx - self.base]
    }

    /// Mutable reference to the element at logical index `idx`.
    pub fn get_mut(&mut self, idx: usize) -> &mut T {
        self.check(idx);
        &mut self.data[idx - self.base]
    }

    /// Transient read view over `[start, start + len)`.
    ///
    /// The returned slice is indexed from 0 and is invalidated by any
    /// subsequent append or compaction.
    pub fn view(&self, start: usize, len: usize) -> &[T] {
        if len > 0 {
            self.check(start);
            self.check(start + len - 1);
        }
        &self.data[start - self.base..start - self.base + len]
    }

    /// Transient write view over `[start, start + len)`.
    pub fn view_mut(&mut self, start: usize, len: usize) -> &mut [T] {
        if len > 0 {
            self.check(start);
            self.check(start + len - 1);
        }
        &mut self.data[start - self.base..start - self.base + len]
    }

    /// Logically discard all elements below `new_base` without reclaiming
    /// memory. Accesses below `new_base` become fatal.
    pub fn set_base(&mut self, new_base: usize) {
        assert!(
            new_base >= self.low && new_base <= self.next_idx(),
            "set_base({}) outside [{}, {}]",
            new_base,
            self.low,
            self.next_idx()
        );
        self.low = new_base;
    }

    /// Physically compact the array so logical index `idx` sits at physical
    /// offset 0, releasing the memory of everything below it.
    ///
    /// Invalidates any outstanding views. O(n) in the surviving elements.
    pub fn shift_from(&mut self, idx: usize) {
        assert!(
            idx >= self.base && idx <= self.next_idx(),
            "shift_from({}) outside [{}, {}]",
            idx,
            self.base,
            self.next_idx()
        );
        self.data.drain(..idx - self.base);
        self.base = idx;
        if self.low < idx {
            self.low = idx;
        }
    }

    /// Drop every element and restore the initial empty state.
    pub fn reset(&mut self) {
        self.data.clear();
        self.base = 0;
        self.low = 0;
    }
}

impl<T: Default> GArray<T> {
    /// Grow the array with default values until `next_idx() >= n`. No-op if
    /// already that large.
    pub fn expand_to(&mut self, n: usize) {
        while self.next_idx() < n {
            self.data.push(T::default());
        }
    }

    /// Reset the logical range `[from, from + len)` to default values.
    pub fn clear(&mut self, from: usize, len: usize) {
        for slot in self.view_mut(from, len) {
            *slot = T::default();
        }
    }
}

impl<T> Default for GArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_get() {
        let mut g = GArray::new();
        assert_eq!(g.append(10), 0);
        assert_eq!(g.append(20), 1);
        assert_eq!(g.append(30), 2);
        assert_eq!(*g.get(0), 10);
        assert_eq!(*g.get(2), 30);
        assert_eq!(g.next_idx(), 3);
        assert_eq!(g.len(), 3);
    }

    #[test]
    #[should_panic]
    fn test_get_past_end_panics() {
        let mut g = GArray::new();
        g.append(1);
        g.get(1);
    }

    #[test]
    fn test_set_base_is_logical_only() {
        let mut g = GArray::new();
        for i in 0..8 {
            g.append(i);
        }
        g.set_base(3);
        assert_eq!(g.base(), 0);
        assert_eq!(g.low(), 3);
        assert_eq!(*g.get(3), 3);
        assert_eq!(g.len(), 5);
    }

    #[test]
    #[should_panic]
    fn test_get_below_base_panics() {
        let mut g = GArray::new();
        for i in 0..8 {
            g.append(i);
        }
        g.set_base(3);
        g.get(2);
    }

    #[test]
    fn test_shift_from_preserves_logical_indices() {
        let mut g = GArray::new();
        for i in 0..10 {
            g.append(i * 100);
        }
        g.shift_from(4);
        g.set_base(4);
        assert_eq!(g.base(), 4);
        assert_eq!(*g.get(4), 400);
        assert_eq!(*g.get(9), 900);
        // Appends continue in the same logical index space.
        assert_eq!(g.append(1000), 10);
        assert_eq!(*g.get(10), 1000);
    }

    #[test]
    fn test_expand_to_and_clear() {
        let mut g: GArray<usize> = GArray::new();
        g.expand_to(5);
        assert_eq!(g.next_idx(), 5);
        for i in 0..5 {
            *g.get_mut(i) = i + 1;
        }
        g.clear(1, 3);
        assert_eq!(*g.get(0), 1);
        assert_eq!(*g.get(1), 0);
        assert_eq!(*g.get(3), 0);
        assert_eq!(*g.get(4), 5);
        // Expanding to a smaller frontier is a no-op.
        g.expand_to(2);
        assert_eq!(g.next_idx(), 5);
    }

    #[test]
    fn test_view_mut_rebased_to_zero() {
        let mut g = GArray::new();
        for i in 0..6 {
            g.append(i);
        }
        let v = g.view_mut(2, 3);
        assert_eq!(v.len(), 3);
        assert_eq!(v[2], 4);
        v[0] = 42;
        assert_eq!(*g.get(2), 42);
    }

    #[test]
    fn test_reset() {
        let mut g = GArray::new();
        g.append(1);
        g.shift_from(1);
        g.reset();
        assert_eq!(g.base(), 0);
        assert_eq!(g.next_idx(), 0);
        assert!(g.is_empty());
    }
}
