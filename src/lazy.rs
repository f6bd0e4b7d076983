//! A process-wide router that is built on first use.
//!
//! Prefer starting a [`Router`] explicitly and passing the handle around. `LazyRouter`
//! exists for code that expects a global: it can live in a `static`, it builds exactly
//! one engine no matter how many tasks race on first access, and it keeps the
//! cold-start behavior of such globals: an event submitted before the engine exists is
//! dropped, not queued.
//!
//! ```rust,ignore
//! use eventide::{EventHandler, LazyRouter};
//! use std::sync::Arc;
//!
//! fn telemetry_handler() -> Arc<dyn EventHandler<Request>> {
//!     Arc::new(TelemetryForwarder::default())
//! }
//!
//! static TELEMETRY: LazyRouter<Request> = LazyRouter::new(telemetry_handler);
//!
//! TELEMETRY.configure_buffer_size(1000);
//! let router = TELEMETRY.get_instance().await?;
//! router.submit(request).await?;
//! ```

use crate::config::RouterConfig;
use crate::error::{RouterError, SubmitError};
use crate::handler::EventHandler;
use crate::ring_buffer::MAX_CAPACITY;
use crate::router::{Router, RouterState};
use crate::shutdown::ShutdownReport;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Builds the handler when the engine is first created.
pub type HandlerFactory<E> = fn() -> Arc<dyn EventHandler<E>>;

/// Stored in place of the buffer size once a build has read it.
const SEALED: usize = usize::MAX;

/// A [`Router`] created lazily, at most once.
pub struct LazyRouter<E> {
    cell: OnceCell<Router<E>>,
    buffer_size: AtomicUsize,
    factory: HandlerFactory<E>,
    cold_drops: AtomicU64,
}

impl<E> LazyRouter<E> {
    pub const fn new(factory: HandlerFactory<E>) -> Self {
        Self {
            cell: OnceCell::const_new(),
            buffer_size: AtomicUsize::new(0),
            factory,
            cold_drops: AtomicU64::new(0),
        }
    }

    /// Sets the buffer size used when the engine is built.
    ///
    /// Only effective before a build has started. Once `get_instance` has read the size
    /// (even while that build is still running) the call is ignored with a warning and
    /// `false` is returned. The size is normalized to a power of two at build time.
    pub fn configure_buffer_size(&self, buffer_size: usize) -> bool {
        let requested = buffer_size.min(MAX_CAPACITY);
        let mut current = self.buffer_size.load(Ordering::Acquire);

        loop {
            if current == SEALED {
                warn!(
                    requested = buffer_size,
                    capacity = ?self.cell.get().map(Router::capacity),
                    "Router already built, ignoring buffer size change"
                );
                return false;
            }

            match self.buffer_size.compare_exchange_weak(
                current,
                requested,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Takes the configured size for a build, refusing later changes.
    fn seal_buffer_size(&self) -> usize {
        self.buffer_size.swap(SEALED, Ordering::AcqRel)
    }

    /// Puts the size back after a failed build so a retry (and reconfiguration) works.
    fn unseal_buffer_size(&self, buffer_size: usize) {
        self.buffer_size.store(buffer_size, Ordering::Release);
    }

    pub fn state(&self) -> RouterState {
        self.cell
            .get()
            .map_or(RouterState::Uninitialized, Router::state)
    }

    /// The engine, if it has been built.
    pub fn get(&self) -> Option<&Router<E>> {
        self.cell.get()
    }

    /// Events dropped because they arrived before the engine was built.
    pub fn cold_drops(&self) -> u64 {
        self.cold_drops.load(Ordering::Relaxed)
    }
}

impl<E> LazyRouter<E>
where
    E: Send + Sync + 'static,
{
    /// Returns the engine, building it on the first call.
    ///
    /// Concurrent first calls all wait for one build; exactly one buffer and one worker
    /// are ever created. A failed build (no runtime) leaves the cell empty so a later
    /// call can retry.
    pub async fn get_instance(&self) -> Result<&Router<E>, RouterError> {
        self.cell
            .get_or_try_init(|| async {
                let requested = self.seal_buffer_size();
                let config = match requested {
                    0 => RouterConfig::default(),
                    requested => RouterConfig::default().with_buffer_size(requested),
                };
                Router::start(config, (self.factory)()).inspect_err(|_| {
                    self.unseal_buffer_size(requested);
                })
            })
            .await
    }

    /// Submits to the engine if it exists; before that, the event is dropped.
    pub async fn submit(&self, event: E) -> Result<(), SubmitError<E>> {
        match self.cell.get() {
            Some(router) => router.submit(event).await,
            None => {
                self.cold_drops.fetch_add(1, Ordering::Relaxed);
                debug!("Router not initialized yet, dropping event");
                Ok(())
            }
        }
    }

    /// Shuts the engine down. `None` if it was never built.
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        match self.cell.get() {
            Some(router) => Some(router.shutdown().await),
            None => None,
        }
    }
}
