//! Defines the consumer worker, the single background task that drains the ring buffer.
//!
//! The worker waits for the next published sequence, moves the event out of its slot,
//! hands it to the [`EventHandler`] and only then advances the consumer cursor, which
//! frees the slot for producers. Events are processed strictly in sequence order.
//!
//! Handler errors and panics are contained here: they are logged, counted, and the
//! worker moves on to the next sequence.
//!
//! Cancellation is cooperative. The worker only looks at its [`CancellationToken`]
//! between events; once cancelled it switches to draining whatever was already
//! claimed, bounded by a deadline.

use crate::error::HandlerError;
use crate::handler::EventHandler;
use crate::ring_buffer::{Admission, RingBuffer};
use crate::stats::Counters;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How the worker's drain phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DrainOutcome {
    /// Claimed sequences left unprocessed when the worker stopped.
    pub(crate) abandoned: u64,
    /// The drain deadline passed before the buffer emptied.
    pub(crate) timed_out: bool,
}

pub(crate) struct ConsumerWorker<E> {
    name: String,
    buffer: Arc<RingBuffer<E>>,
    handler: Arc<dyn EventHandler<E>>,
    counters: Arc<Counters>,
    token: CancellationToken,
    drain_timeout: Duration,
}

impl<E> ConsumerWorker<E>
where
    E: Send + Sync + 'static,
{
    pub(crate) fn new(
        name: String,
        buffer: Arc<RingBuffer<E>>,
        handler: Arc<dyn EventHandler<E>>,
        counters: Arc<Counters>,
        token: CancellationToken,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            name,
            buffer,
            handler,
            counters,
            token,
            drain_timeout,
        }
    }

    /// Runs until cancelled, then drains and halts the buffer.
    pub(crate) async fn run(self) -> DrainOutcome {
        info!(
            worker = %self.name,
            handler = %self.handler.name(),
            capacity = self.buffer.capacity(),
            "Consumer worker started"
        );

        let mut next = self.buffer.consumed() + 1;

        'run: loop {
            let available = tokio::select! {
                biased;
                _ = self.token.cancelled() => break 'run,
                available = self.buffer.next_available(next) => available,
            };

            while next <= available {
                if self.token.is_cancelled() {
                    break 'run;
                }
                self.process(next).await;
                next += 1;
            }
        }

        let outcome = self.drain(next).await;
        self.buffer.halt();

        info!(
            worker = %self.name,
            processed = self.counters.processed(),
            failed = self.counters.failed(),
            abandoned = outcome.abandoned,
            "Consumer worker stopped"
        );

        outcome
    }

    /// Processes everything already claimed, stopping at the deadline.
    ///
    /// Also stops once the coordinator has halted the buffer after giving up on this
    /// worker: whatever is left has already been reported as abandoned.
    async fn drain(&self, mut next: i64) -> DrainOutcome {
        let deadline = Instant::now() + self.drain_timeout;

        debug!(
            worker = %self.name,
            pending = self.buffer.unfinished(),
            timeout_ms = self.drain_timeout.as_millis() as u64,
            "Draining ring buffer"
        );

        let timed_out = loop {
            if self.buffer.admission() == Admission::Halted {
                break true;
            }
            if self.buffer.consumed() >= self.buffer.claimed() {
                break false;
            }

            let Ok(available) =
                tokio::time::timeout_at(deadline, self.buffer.next_available(next)).await
            else {
                break true;
            };

            let mut expired = false;
            for sequence in next..=available {
                if Instant::now() >= deadline || self.buffer.admission() == Admission::Halted {
                    expired = true;
                    break;
                }
                self.process(sequence).await;
                next = sequence + 1;
            }

            if expired {
                break true;
            }
        };

        // A clean exit saw every claim that could still be published; any sequence
        // reserved after that lost the race with `close` and holds no event.
        let abandoned = if timed_out { self.buffer.unfinished() } else { 0 };

        if timed_out {
            warn!(
                worker = %self.name,
                abandoned = abandoned,
                timeout_ms = self.drain_timeout.as_millis() as u64,
                "Drain timed out, abandoning unprocessed events"
            );
        }

        DrainOutcome {
            abandoned,
            timed_out,
        }
    }

    /// Hands one sequence to the handler and advances the cursor past it.
    async fn process(&self, sequence: i64) {
        let Some(event) = self.buffer.take(sequence) else {
            debug!(worker = %self.name, sequence = sequence, "Skipping abandoned sequence");
            self.counters.record_skipped();
            self.buffer.advance(sequence);
            return;
        };

        let outcome = AssertUnwindSafe(self.handler.handle(&event))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))));

        match outcome {
            Ok(()) => self.counters.record_processed(),
            Err(err @ HandlerError::Panicked(_)) => {
                error!(
                    worker = %self.name,
                    handler = %self.handler.name(),
                    sequence = sequence,
                    error = %err,
                    "Event handler panicked"
                );
                self.counters.record_failed();
            }
            Err(err) => {
                warn!(
                    worker = %self.name,
                    handler = %self.handler.name(),
                    sequence = sequence,
                    error = %err,
                    "Event handler failed"
                );
                self.counters.record_failed();
            }
        }

        drop(event);
        self.buffer.advance(sequence);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
