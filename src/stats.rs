use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals shared by the router handle and its worker.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub(crate) fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub(crate) fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A point-in-time view of a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    /// Effective (normalized) ring capacity.
    pub capacity: usize,
    /// Highest sequence handed to a producer, `-1` before the first submit.
    pub claimed: i64,
    /// Highest sequence fully processed, `-1` before the first event.
    pub consumed: i64,
    /// Events the handler accepted.
    pub processed: u64,
    /// Events whose handler returned an error or panicked.
    pub failed: u64,
    /// Claimed sequences whose producer gave up before publishing.
    pub skipped: u64,
    /// Events discarded because shutdown had begun.
    pub dropped: u64,
}

impl RouterStats {
    /// Sequences claimed but not yet processed.
    pub fn pending(&self) -> u64 {
        u64::try_from(self.claimed - self.consumed).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let counters = Counters::default();
        counters.record_processed();
        counters.record_processed();
        counters.record_failed();
        counters.record_dropped();

        assert_eq!(counters.processed(), 2);
        assert_eq!(counters.failed(), 1);
        assert_eq!(counters.skipped(), 0);
        assert_eq!(counters.dropped(), 1);
    }

    #[test]
    fn test_pending_never_negative() {
        let stats = RouterStats {
            capacity: 8,
            claimed: 9,
            consumed: 4,
            processed: 5,
            failed: 0,
            skipped: 0,
            dropped: 0,
        };
        assert_eq!(stats.pending(), 5);

        let idle = RouterStats {
            claimed: -1,
            consumed: -1,
            ..stats
        };
        assert_eq!(idle.pending(), 0);
    }
}
