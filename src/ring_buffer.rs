//! Defines `RingBuffer`, the fixed-capacity circular store every event passes through.
//!
//! The buffer owns a preallocated pool of [`Slot`]s, one per ring position, and the
//! two sequences that coordinate access to them:
//!
//! - `claimed`: the highest sequence handed out to a producer.
//! - `consumed`: the highest sequence the consumer has fully processed.
//!
//! A producer reserves a sequence with a single atomic increment, waits until the
//! slot's previous occupant (one lap earlier) has been consumed, writes the event and
//! stamps the slot's `published` marker with its sequence. The consumer reads the
//! marker with `Acquire` ordering, so it only ever sees fully written events. No lock
//! is held across the buffer on the publish path.

use crate::sequence::{INITIAL_SEQUENCE, Sequence};
use crate::wait::WaitStrategy;
use std::cell::UnsafeCell;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

/// Capacity used when none (or zero) is configured.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Largest capacity a buffer will be normalized to.
pub const MAX_CAPACITY: usize = 1 << 30;

/// Rounds a requested capacity up to the power of two the buffer will actually use.
///
/// `0` selects [`DEFAULT_CAPACITY`]; anything above [`MAX_CAPACITY`] is clamped.
///
/// ```
/// use eventide::normalize_capacity;
///
/// assert_eq!(normalize_capacity(1000), 1024);
/// assert_eq!(normalize_capacity(1024), 1024);
/// assert_eq!(normalize_capacity(5), 8);
/// ```
pub fn normalize_capacity(requested: usize) -> usize {
    match requested {
        0 => DEFAULT_CAPACITY,
        n if n >= MAX_CAPACITY => MAX_CAPACITY,
        n => n.next_power_of_two(),
    }
}

/// A reusable holder bound to one ring position.
///
/// `published` carries the last sequence written into the slot; the slot is pending
/// for sequence `s` exactly when `published == s` and `s` is ahead of the consumer.
#[derive(Debug)]
pub(crate) struct Slot<E> {
    published: AtomicI64,
    value: UnsafeCell<Option<E>>,
}

impl<E> Slot<E> {
    fn new() -> Self {
        Self {
            published: AtomicI64::new(INITIAL_SEQUENCE),
            value: UnsafeCell::new(None),
        }
    }

    #[inline]
    fn is_published(&self, sequence: i64) -> bool {
        self.published.load(Ordering::Acquire) == sequence
    }
}

/// Whether the buffer still admits new claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Admission {
    /// Claims are accepted.
    Open = 0,
    /// No new claims; already claimed sequences are still consumed.
    Closed = 1,
    /// The consumer is gone; waiting producers give up.
    Halted = 2,
}

impl Admission {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Admission::Open,
            1 => Admission::Closed,
            _ => Admission::Halted,
        }
    }
}

/// Why a claim could not be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimError {
    /// Admissions are closed.
    Closed,
    /// The consumer stopped while the producer waited for space.
    Halted,
    /// `try_claim` found no free slot.
    Full,
}

/// An exclusive right to write the slot for one sequence.
///
/// Dropping a claim without publishing (a cancelled producer future, or a claim that
/// lost the race with `close`) turns the sequence into an empty slot. The consumer
/// treats it as available, takes nothing out of it and moves on instead of stalling.
#[derive(Debug)]
pub(crate) struct Claim<'a, E> {
    buffer: &'a RingBuffer<E>,
    sequence: i64,
    settled: bool,
}

impl<E> Claim<'_, E> {
    #[inline]
    pub(crate) fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Writes `event` into the claimed slot and makes it visible to the consumer.
    pub(crate) fn publish(mut self, event: E) {
        let slot = self.buffer.get(self.sequence);
        // SAFETY: the claim is the only writer for this sequence, and the slot's previous
        // occupant has been consumed, so nobody else reads or writes the cell right now.
        unsafe {
            *slot.value.get() = Some(event);
        }
        slot.published.store(self.sequence, Ordering::Release);
        self.settled = true;
        self.buffer.wait.wake(&self.buffer.published_signal);
    }
}

impl<E> Drop for Claim<'_, E> {
    fn drop(&mut self) {
        if !self.settled {
            self.buffer.abandon(self.sequence);
        }
    }
}

/// A fixed-size circular buffer with multi-producer, single-consumer sequencing.
///
/// # Safety
///
/// Slot contents live in `UnsafeCell`s. Access is coordinated by the sequences:
///
/// 1. A slot is written only by the holder of the [`Claim`] for its sequence, and only
///    after the consumer has moved past the slot's previous occupant.
/// 2. A slot is read only by the single consumer, and only after observing the
///    slot's `published` marker (an `Acquire` load pairing with the writer's `Release`).
#[derive(Debug)]
pub(crate) struct RingBuffer<E> {
    slots: Box<[Slot<E>]>,
    index_mask: usize,
    claimed: Sequence,
    consumed: Sequence,
    admission: AtomicU8,
    abandoned: Mutex<BTreeSet<i64>>,
    /// Size of `abandoned`, read without the lock on the consumer's wait path.
    outstanding_abandons: AtomicUsize,
    wait: WaitStrategy,
    published_signal: Notify,
    consumed_signal: Notify,
}

// SAFETY: events are moved into the buffer by producers and out of it by the consumer,
// with every slot access ordered by the sequences described above.
unsafe impl<E: Send + Sync> Send for RingBuffer<E> {}
unsafe impl<E: Send + Sync> Sync for RingBuffer<E> {}

impl<E> RingBuffer<E> {
    /// Creates a buffer with every slot preallocated.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two. Callers normalize it first with
    /// [`normalize_capacity`].
    pub(crate) fn new(capacity: usize, wait: WaitStrategy) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of 2");

        let slots = (0..capacity)
            .map(|_| Slot::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            index_mask: capacity - 1,
            claimed: Sequence::default(),
            consumed: Sequence::default(),
            admission: AtomicU8::new(Admission::Open as u8),
            abandoned: Mutex::new(BTreeSet::new()),
            outstanding_abandons: AtomicUsize::new(0),
            wait,
            published_signal: Notify::new(),
            consumed_signal: Notify::new(),
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Highest sequence handed out to a producer.
    ///
    /// Sequentially consistent with `close` and the admission re-check in `claim`: once
    /// admissions are closed, a reader sees every claim that can still be published.
    #[inline]
    pub(crate) fn claimed(&self) -> i64 {
        self.claimed.get_seq_cst()
    }

    /// Highest sequence the consumer has fully processed.
    #[inline]
    pub(crate) fn consumed(&self) -> i64 {
        self.consumed.get()
    }

    /// Claimed sequences that still hold an event the consumer has not processed.
    ///
    /// Empty slots left by abandoned claims are not counted.
    pub(crate) fn unfinished(&self) -> u64 {
        let pending = u64::try_from(self.claimed() - self.consumed()).unwrap_or(0);
        pending.saturating_sub(self.outstanding_abandons.load(Ordering::Acquire) as u64)
    }

    #[inline]
    pub(crate) fn admission(&self) -> Admission {
        Admission::from_u8(self.admission.load(Ordering::SeqCst))
    }

    /// Maps a sequence onto its slot.
    #[inline]
    pub(crate) fn get(&self, sequence: i64) -> &Slot<E> {
        let index = (sequence as usize) & self.index_mask;
        // SAFETY: masking keeps `index` below `slots.len()`.
        unsafe { self.slots.get_unchecked(index) }
    }

    /// Whether the slot one lap behind `sequence` has been consumed.
    #[inline]
    fn has_room_for(&self, sequence: i64) -> bool {
        self.consumed.get() >= sequence - self.capacity() as i64
    }

    /// Reserves the next sequence, waiting while the buffer is full.
    ///
    /// This is the backpressure point: the returned future stays pending until the
    /// consumer frees the slot. Dropping it mid-wait abandons the reserved sequence.
    pub(crate) async fn claim(&self) -> Result<Claim<'_, E>, ClaimError> {
        if self.admission() != Admission::Open {
            return Err(ClaimError::Closed);
        }

        let claim = Claim {
            buffer: self,
            sequence: self.claimed.fetch_add(1) + 1,
            settled: false,
        };

        // `close` may have landed between the check above and the increment. The drain
        // could then miss this sequence, so give it back as an empty slot.
        if self.admission() != Admission::Open {
            return Err(ClaimError::Closed);
        }

        self.wait
            .wait_until(&self.consumed_signal, || {
                self.has_room_for(claim.sequence) || self.admission() == Admission::Halted
            })
            .await;

        if self.admission() == Admission::Halted {
            return Err(ClaimError::Halted);
        }

        Ok(claim)
    }

    /// Reserves the next sequence only if its slot is free right now.
    pub(crate) fn try_claim(&self) -> Result<Claim<'_, E>, ClaimError> {
        loop {
            if self.admission() != Admission::Open {
                return Err(ClaimError::Closed);
            }

            let current = self.claimed.get();
            if !self.has_room_for(current + 1) {
                return Err(ClaimError::Full);
            }

            if self.claimed.compare_exchange(current, current + 1).is_ok() {
                let claim = Claim {
                    buffer: self,
                    sequence: current + 1,
                    settled: false,
                };
                if self.admission() != Admission::Open {
                    return Err(ClaimError::Closed);
                }
                return Ok(claim);
            }
        }
    }

    fn abandon(&self, sequence: i64) {
        self.abandoned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sequence);
        self.outstanding_abandons.fetch_add(1, Ordering::Release);
        WaitStrategy::wake_all(&self.published_signal);
    }

    fn is_abandoned(&self, sequence: i64) -> bool {
        if self.outstanding_abandons.load(Ordering::Acquire) == 0 {
            return false;
        }

        self.abandoned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&sequence)
    }

    /// Whether the consumer may move on to `sequence`.
    #[inline]
    fn is_available(&self, sequence: i64) -> bool {
        self.get(sequence).is_published(sequence) || self.is_abandoned(sequence)
    }

    /// Waits until `next` can be consumed and returns the highest sequence that can
    /// be consumed without waiting again.
    ///
    /// Cancellation safe: nothing is modified while waiting.
    pub(crate) async fn next_available(&self, next: i64) -> i64 {
        self.wait
            .wait_until(&self.published_signal, || self.is_available(next))
            .await;

        let mut highest = next;
        while self.get(highest + 1).is_published(highest + 1) {
            highest += 1;
        }
        highest
    }

    /// Moves the event for `sequence` out of its slot.
    ///
    /// Returns `None` for a sequence whose claim was abandoned.
    ///
    /// Must only be called by the consumer, for a sequence `next_available` reported.
    pub(crate) fn take(&self, sequence: i64) -> Option<E> {
        let slot = self.get(sequence);
        if slot.is_published(sequence) {
            // SAFETY: the marker proves the write for `sequence` completed, and the producer
            // of the next lap cannot touch the slot until `advance(sequence)` runs.
            return unsafe { (*slot.value.get()).take() };
        }

        if self
            .abandoned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&sequence)
        {
            self.outstanding_abandons.fetch_sub(1, Ordering::Release);
        }
        None
    }

    /// Marks `sequence` as fully processed, freeing its slot for the next lap.
    pub(crate) fn advance(&self, sequence: i64) {
        self.consumed.set(sequence);
        self.wait.wake(&self.consumed_signal);
    }

    /// Stops admitting new claims. Sequences already claimed are still consumed.
    pub(crate) fn close(&self) {
        let _ = self.admission.compare_exchange(
            Admission::Open as u8,
            Admission::Closed as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Declares the consumer gone and releases every producer still waiting for room.
    pub(crate) fn halt(&self) {
        self.admission
            .store(Admission::Halted as u8, Ordering::SeqCst);
        WaitStrategy::wake_all(&self.consumed_signal);
        WaitStrategy::wake_all(&self.published_signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::{Duration, timeout};

    #[test]
    fn test_normalize_capacity_rounds_up() {
        assert_eq!(normalize_capacity(1000), 1024);
        assert_eq!(normalize_capacity(1024), 1024);
        assert_eq!(normalize_capacity(5), 8);
        assert_eq!(normalize_capacity(1), 1);
        assert_eq!(normalize_capacity(3), 4);
    }

    #[test]
    fn test_normalize_capacity_defaults_and_clamps() {
        assert_eq!(normalize_capacity(0), DEFAULT_CAPACITY);
        assert_eq!(normalize_capacity(MAX_CAPACITY + 1), MAX_CAPACITY);
        assert_eq!(normalize_capacity(usize::MAX), MAX_CAPACITY);
    }

    #[test]
    #[should_panic(expected = "capacity must be a power of 2")]
    fn test_ring_buffer_rejects_non_power_of_two() {
        RingBuffer::<u32>::new(3, WaitStrategy::Blocking);
    }

    #[test]
    fn test_ring_buffer_indexing_wraps() {
        let rb = RingBuffer::<u32>::new(4, WaitStrategy::Blocking);
        assert_eq!(rb.capacity(), 4);
        assert!(std::ptr::eq(rb.get(0), rb.get(4)));
        assert!(std::ptr::eq(rb.get(3), rb.get(7)));
        assert!(std::ptr::eq(rb.get(-1), rb.get(3)));
        assert!(!std::ptr::eq(rb.get(0), rb.get(1)));
    }

    #[tokio::test]
    async fn test_claim_publish_take_in_order() {
        let rb = RingBuffer::<&str>::new(4, WaitStrategy::Blocking);

        for event in ["a", "b", "c"] {
            rb.claim().await.unwrap().publish(event);
        }
        assert_eq!(rb.claimed(), 2);

        assert_eq!(rb.next_available(0).await, 2);
        for (seq, expected) in (0..=2).zip(["a", "b", "c"]) {
            assert_eq!(rb.take(seq), Some(expected));
            rb.advance(seq);
        }
        assert_eq!(rb.consumed(), 2);
    }

    #[tokio::test]
    async fn test_claim_waits_while_full() {
        let rb = Arc::new(RingBuffer::<u32>::new(2, WaitStrategy::Blocking));

        rb.claim().await.unwrap().publish(1);
        rb.claim().await.unwrap().publish(2);

        let producer = {
            let rb = rb.clone();
            tokio::spawn(async move {
                rb.claim().await.unwrap().publish(3);
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished(), "claim should wait for room");

        assert_eq!(rb.take(0), Some(1));
        rb.advance(0);

        timeout(Duration::from_secs(1), producer)
            .await
            .expect("claim should succeed once the consumer advances")
            .unwrap();

        assert_eq!(rb.next_available(1).await, 2);
        assert_eq!(rb.take(1), Some(2));
        assert_eq!(rb.take(2), Some(3));
    }

    #[tokio::test]
    async fn test_try_claim_reports_full() {
        let rb = RingBuffer::<u32>::new(1, WaitStrategy::Blocking);

        rb.try_claim().unwrap().publish(7);
        assert_eq!(rb.try_claim().unwrap_err(), ClaimError::Full);

        assert_eq!(rb.take(0), Some(7));
        rb.advance(0);
        assert!(rb.try_claim().is_ok());
    }

    #[tokio::test]
    async fn test_dropped_claim_is_skipped() {
        let rb = RingBuffer::<u32>::new(4, WaitStrategy::Blocking);

        let abandoned = rb.claim().await.unwrap();
        rb.claim().await.unwrap().publish(20);
        drop(abandoned);

        // The gap is available immediately and the run continues past it
        assert_eq!(rb.next_available(0).await, 1);
        assert_eq!(rb.take(0), None);
        rb.advance(0);
        assert_eq!(rb.take(1), Some(20));
        assert!(!rb.is_abandoned(0));
        assert_eq!(rb.outstanding_abandons.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn test_unfinished_ignores_empty_slots() {
        let rb = RingBuffer::<u32>::new(4, WaitStrategy::Blocking);

        drop(rb.claim().await.unwrap());
        rb.claim().await.unwrap().publish(1);

        assert_eq!(rb.claimed() - rb.consumed(), 2);
        assert_eq!(rb.unfinished(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_claims_racing_close_are_never_lost() {
        let rb = Arc::new(RingBuffer::<u64>::new(8, WaitStrategy::Yielding));

        let producers: Vec<_> = (0..8)
            .map(|_| {
                let rb = rb.clone();
                tokio::spawn(async move {
                    let mut accepted = 0u64;
                    while let Ok(claim) = rb.claim().await {
                        claim.publish(1);
                        accepted += 1;
                    }
                    accepted
                })
            })
            .collect();

        let consumer = {
            let rb = rb.clone();
            tokio::spawn(async move {
                let mut taken = 0u64;
                let mut next = 0;
                // Same exit condition as the worker's drain
                while rb.admission() == Admission::Open || rb.consumed() < rb.claimed() {
                    let Ok(available) =
                        timeout(Duration::from_millis(10), rb.next_available(next)).await
                    else {
                        continue;
                    };
                    for sequence in next..=available {
                        taken += rb.take(sequence).unwrap_or(0);
                        rb.advance(sequence);
                    }
                    next = available + 1;
                }
                rb.halt();
                taken
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        rb.close();

        let taken = timeout(Duration::from_secs(5), consumer)
            .await
            .expect("consumer should finish once admissions close")
            .unwrap();

        let mut accepted = 0;
        for producer in producers {
            accepted += producer.await.unwrap();
        }
        assert_eq!(accepted, taken, "every published event must be consumed");
    }

    #[tokio::test]
    async fn test_closed_buffer_rejects_claims() {
        let rb = RingBuffer::<u32>::new(4, WaitStrategy::Blocking);
        rb.close();

        assert_eq!(rb.claim().await.unwrap_err(), ClaimError::Closed);
        assert_eq!(rb.try_claim().unwrap_err(), ClaimError::Closed);
        assert_eq!(rb.claimed(), INITIAL_SEQUENCE);
    }

    #[tokio::test]
    async fn test_halt_releases_waiting_producer() {
        let rb = Arc::new(RingBuffer::<u32>::new(1, WaitStrategy::Blocking));
        rb.claim().await.unwrap().publish(1);

        let producer = {
            let rb = rb.clone();
            tokio::spawn(async move { rb.claim().await.map(|claim| claim.sequence()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        rb.halt();

        let result = timeout(Duration::from_secs(1), producer)
            .await
            .expect("halt should release the producer")
            .unwrap();
        assert_eq!(result.unwrap_err(), ClaimError::Halted);
    }
}
