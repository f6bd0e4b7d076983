//! The router facade: one ring buffer, one consumer worker, any number of submitters.
//!
//! A [`Router`] is started explicitly from inside a tokio runtime and passed by handle
//! to whoever needs to submit events. Cloning the handle is cheap; every clone feeds
//! the same buffer and worker.
//!
//! # Example
//!
//! ```rust,ignore
//! use eventide::{Router, RouterConfig, handler_fn};
//! use std::sync::Arc;
//!
//! let router = Router::start(
//!     RouterConfig::default().with_buffer_size(1000),
//!     Arc::new(handler_fn("print", |event: &String| {
//!         println!("{event}");
//!         Ok(())
//!     })),
//! )?;
//!
//! router.submit("hello".to_string()).await?;
//! let report = router.shutdown().await;
//! ```

use crate::config::{AfterShutdown, RouterConfig};
use crate::consumer::{ConsumerWorker, DrainOutcome};
use crate::error::{RouterError, SubmitError};
use crate::handler::EventHandler;
use crate::producer::Producer;
use crate::ring_buffer::RingBuffer;
use crate::shutdown::{self, ShutdownReport};
use crate::stats::{Counters, RouterStats};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info};

/// Lifecycle of a router. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RouterState {
    /// No engine has been built yet (only observable through [`LazyRouter`](crate::LazyRouter)).
    Uninitialized = 0,
    Running = 1,
    /// Shutdown has begun; submissions are no longer enqueued.
    ShuttingDown = 2,
    Stopped = 3,
}

impl RouterState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RouterState::Uninitialized,
            1 => RouterState::Running,
            2 => RouterState::ShuttingDown,
            _ => RouterState::Stopped,
        }
    }
}

#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: RouterState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> RouterState {
        RouterState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves from `from` to `to`; fails if another caller got there first.
    pub(crate) fn transition(&self, from: RouterState, to: RouterState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set(&self, state: RouterState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

pub(crate) struct Inner<E> {
    pub(crate) config: RouterConfig,
    pub(crate) buffer: Arc<RingBuffer<E>>,
    pub(crate) producer: Producer<E>,
    pub(crate) state: StateCell,
    pub(crate) counters: Arc<Counters>,
    pub(crate) token: CancellationToken,
    pub(crate) worker: Mutex<Option<JoinHandle<DrainOutcome>>>,
    report: OnceCell<ShutdownReport>,
}

impl<E> Drop for Inner<E> {
    fn drop(&mut self) {
        if self.state.get() == RouterState::Running {
            debug!(
                worker = %self.config.worker_name,
                "Last router handle dropped without shutdown, stopping worker"
            );
            self.buffer.close();
            self.token.cancel();
        }
    }
}

/// Handle to a running event router.
pub struct Router<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for Router<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> fmt::Debug for Router<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("state", &self.inner.state.get())
            .field("capacity", &self.inner.buffer.capacity())
            .field("worker", &self.inner.config.worker_name)
            .finish()
    }
}

impl<E> Router<E>
where
    E: Send + Sync + 'static,
{
    /// Builds the ring buffer and spawns the consumer worker on the current runtime.
    ///
    /// The buffer size is normalized to a power of two here, once; the effective value is
    /// logged and reported by [`Router::capacity`].
    pub fn start(
        mut config: RouterConfig,
        handler: Arc<dyn EventHandler<E>>,
    ) -> Result<Self, RouterError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| RouterError::NoRuntime)?;

        let capacity = config.effective_capacity();
        if capacity != config.buffer_size {
            info!(
                requested = config.buffer_size,
                effective = capacity,
                "Normalized ring buffer size to a power of two"
            );
            config.buffer_size = capacity;
        }

        let buffer = Arc::new(RingBuffer::new(capacity, config.wait_strategy));
        let counters = Arc::new(Counters::default());
        let token = CancellationToken::new();

        let worker = ConsumerWorker::new(
            config.worker_name.clone(),
            Arc::clone(&buffer),
            Arc::clone(&handler),
            Arc::clone(&counters),
            token.clone(),
            config.shutdown_timeout(),
        );
        let worker = runtime.spawn(worker.run());

        info!(
            worker = %config.worker_name,
            handler = %handler.name(),
            capacity = capacity,
            wait_strategy = ?config.wait_strategy,
            shutdown_timeout_ms = config.shutdown_timeout_ms,
            after_shutdown = ?config.after_shutdown,
            "Event router started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                producer: Producer::new(Arc::clone(&buffer)),
                buffer,
                state: StateCell::new(RouterState::Running),
                counters,
                token,
                worker: Mutex::new(Some(worker)),
                report: OnceCell::new(),
                config,
            }),
        })
    }

    /// Starts a router configured from a TOML file, with `EVENTIDE_*` environment
    /// overrides applied on top.
    pub fn start_from_file(
        path: impl AsRef<Path>,
        handler: Arc<dyn EventHandler<E>>,
    ) -> Result<Self, RouterError> {
        let config = RouterConfig::load(path)?.with_env_overrides()?;
        Self::start(config, handler)
    }

    /// Hands `event` to the consumer and returns without processing it.
    ///
    /// Waits only while the buffer is full. Once shutdown has begun the event is not
    /// enqueued: it is dropped (`AfterShutdown::Drop`, returns `Ok`) or handed back
    /// (`AfterShutdown::Reject`).
    pub async fn submit(&self, event: E) -> Result<(), SubmitError<E>> {
        if self.state() != RouterState::Running {
            return self.refuse(event);
        }

        match self.inner.producer.publish(event).await {
            Ok(_) => Ok(()),
            Err(SubmitError::ShuttingDown(event) | SubmitError::Halted(event)) => {
                self.refuse(event)
            }
            Err(err) => Err(err),
        }
    }

    /// [`Router::submit`] for plain threads that are not driving an async runtime.
    pub fn blocking_submit(&self, event: E) -> Result<(), SubmitError<E>> {
        futures::executor::block_on(self.submit(event))
    }

    /// Submits without waiting; a full buffer returns [`SubmitError::Full`].
    pub fn try_submit(&self, event: E) -> Result<(), SubmitError<E>> {
        if self.state() != RouterState::Running {
            return self.refuse(event);
        }

        match self.inner.producer.try_publish(event) {
            Ok(_) => Ok(()),
            Err(SubmitError::ShuttingDown(event) | SubmitError::Halted(event)) => {
                self.refuse(event)
            }
            Err(err) => Err(err),
        }
    }

    fn refuse(&self, event: E) -> Result<(), SubmitError<E>> {
        match self.inner.config.after_shutdown {
            AfterShutdown::Drop => {
                self.inner.counters.record_dropped();
                debug!(
                    worker = %self.inner.config.worker_name,
                    state = ?self.state(),
                    "Dropping event submitted after shutdown began"
                );
                Ok(())
            }
            AfterShutdown::Reject => Err(SubmitError::ShuttingDown(event)),
        }
    }

    /// Stops admissions, drains what was already submitted (bounded by the configured
    /// timeout) and stops the worker.
    ///
    /// Safe to call more than once and from several tasks; every caller receives the
    /// report of the single shutdown that ran.
    pub async fn shutdown(&self) -> ShutdownReport {
        *self
            .inner
            .report
            .get_or_init(|| shutdown::coordinate(&self.inner))
            .await
    }

    /// A handle to the producer side, for callers that want sequence numbers back.
    pub fn producer(&self) -> Producer<E> {
        self.inner.producer.clone()
    }
}

impl<E> Router<E> {
    pub fn state(&self) -> RouterState {
        self.inner.state.get()
    }

    /// The effective (normalized) ring capacity.
    pub fn capacity(&self) -> usize {
        self.inner.buffer.capacity()
    }

    /// The configuration in effect. `buffer_size` holds the normalized capacity, not
    /// the value originally requested.
    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> RouterStats {
        let counters = &self.inner.counters;
        RouterStats {
            capacity: self.inner.buffer.capacity(),
            claimed: self.inner.buffer.claimed(),
            consumed: self.inner.buffer.consumed(),
            processed: counters.processed(),
            failed: counters.failed(),
            skipped: counters.skipped(),
            dropped: counters.dropped(),
        }
    }

    /// Completes once shutdown of this router has started.
    pub(crate) fn stopping(&self) -> WaitForCancellationFuture<'_> {
        self.inner.token.cancelled()
    }
}
