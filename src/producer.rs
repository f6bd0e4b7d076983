//! Defines `Producer`, the write end of the ring buffer.
//!
//! `Producer` is cheap to clone and safe to use from any number of threads or tasks.
//! Each publish claims the next sequence, waits if the buffer is full (backpressure),
//! writes the event into the claimed slot and publishes it to the consumer.

use crate::error::SubmitError;
use crate::ring_buffer::{ClaimError, RingBuffer};
use std::fmt;
use std::sync::Arc;

/// The sending end of the ring buffer.
pub struct Producer<E> {
    buffer: Arc<RingBuffer<E>>,
}

impl<E> Clone for Producer<E> {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl<E> fmt::Debug for Producer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.buffer.capacity())
            .field("claimed", &self.buffer.claimed())
            .finish()
    }
}

fn rejected<E>(err: ClaimError, event: E) -> SubmitError<E> {
    match err {
        ClaimError::Closed => SubmitError::ShuttingDown(event),
        ClaimError::Halted => SubmitError::Halted(event),
        ClaimError::Full => SubmitError::Full(event),
    }
}

impl<E> Producer<E> {
    pub(crate) fn new(buffer: Arc<RingBuffer<E>>) -> Self {
        Self { buffer }
    }

    /// Publishes `event`, waiting for room while the buffer is full.
    ///
    /// Returns the sequence the event was published at.
    ///
    /// # Cancellation Safety
    ///
    /// If the future is dropped while waiting for room, the reserved sequence is
    /// released as an empty slot and the consumer moves past it. The event is dropped.
    pub async fn publish(&self, event: E) -> Result<i64, SubmitError<E>> {
        match self.buffer.claim().await {
            Ok(claim) => {
                let sequence = claim.sequence();
                claim.publish(event);
                Ok(sequence)
            }
            Err(err) => Err(rejected(err, event)),
        }
    }

    /// Publishes `event` only if a slot is free right now.
    pub fn try_publish(&self, event: E) -> Result<i64, SubmitError<E>> {
        match self.buffer.try_claim() {
            Ok(claim) => {
                let sequence = claim.sequence();
                claim.publish(event);
                Ok(sequence)
            }
            Err(err) => Err(rejected(err, event)),
        }
    }

    /// Publishes from a thread that is not driving an async runtime.
    ///
    /// Blocking inside an async context stalls the executor; call this only from plain
    /// threads, as with `tokio::sync::mpsc::Sender::blocking_send`.
    pub fn blocking_publish(&self, event: E) -> Result<i64, SubmitError<E>> {
        futures::executor::block_on(self.publish(event))
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }
}
