use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicI64, Ordering};

/// Value every sequence starts from; the first claimed position is `0`.
pub(crate) const INITIAL_SEQUENCE: i64 = -1;

/// A monotonically increasing position counter shared between threads.
///
/// Padded to a cache line so the producer and consumer counters never share one.
#[derive(Debug)]
pub(crate) struct Sequence {
    value: CachePadded<AtomicI64>,
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_SEQUENCE)
    }
}

impl Sequence {
    pub(crate) fn new(val: i64) -> Self {
        Self {
            value: CachePadded::new(AtomicI64::new(val)),
        }
    }

    /// Loads the value, synchronizing with the last `set`.
    #[inline]
    pub(crate) fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set(&self, val: i64) {
        self.value.store(val, Ordering::Release);
    }

    /// Loads the value as part of the single total order shared with the other
    /// `SeqCst` operations below.
    #[inline]
    pub(crate) fn get_seq_cst(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Adds `delta` and returns the previous value.
    ///
    /// `SeqCst` so a claim is ordered against the admission check that follows it.
    #[inline]
    pub(crate) fn fetch_add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn compare_exchange(&self, current: i64, next: i64) -> Result<i64, i64> {
        self.value
            .compare_exchange(current, next, Ordering::SeqCst, Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_starts_before_zero() {
        let seq = Sequence::default();
        assert_eq!(seq.get(), -1);
        assert_eq!(Sequence::new(42).get(), 42);
    }

    #[test]
    fn test_sequence_fetch_add_returns_previous() {
        let seq = Sequence::default();
        assert_eq!(seq.fetch_add(1), -1);
        assert_eq!(seq.fetch_add(1), 0);
        assert_eq!(seq.get(), 1);
    }

    #[test]
    fn test_sequence_compare_exchange() {
        let seq = Sequence::new(50);

        assert_eq!(seq.compare_exchange(50, 51), Ok(50));
        assert_eq!(seq.get(), 51);

        // Stale expectation leaves the value untouched
        assert_eq!(seq.compare_exchange(50, 52), Err(51));
        assert_eq!(seq.get(), 51);
    }

    #[test]
    fn test_sequence_set() {
        let seq = Sequence::default();
        seq.set(7);
        assert_eq!(seq.get(), 7);
        assert_eq!(seq.get_seq_cst(), 7);
    }
}
