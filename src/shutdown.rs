//! Graceful shutdown coordination.
//!
//! Shutdown runs in a fixed order:
//!
//! 1. The router leaves `Running`, so `submit` stops enqueueing.
//! 2. The ring buffer stops admitting claims.
//! 3. The worker's cancellation token fires. The worker finishes the event in hand,
//!    then drains whatever was already claimed, bounded by `shutdown_timeout`.
//! 4. The buffer is halted and the router is `Stopped`.
//!
//! Termination signals reach the router through [`listen_for_signals`] (Ctrl+C and
//! SIGTERM) or [`shutdown_on`] (any [`CancellationToken`] the host owns).
//!
//! # Example
//!
//! ```rust,ignore
//! let router = Router::start(config, handler)?;
//! let shutdown = eventide::listen_for_signals(router.clone());
//!
//! // ... hand `router` to producers ...
//!
//! let report = shutdown.await?;
//! if !report.is_complete() {
//!     eprintln!("{} events abandoned", report.abandoned);
//! }
//! ```

use crate::consumer::DrainOutcome;
use crate::router::{Inner, Router, RouterState};
use std::future::Future;
use std::sync::PoisonError;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Extra time the coordinator gives the worker beyond its own drain deadline, so a
/// handler that is mid-event when the deadline passes can still return.
const WORKER_GRACE: Duration = Duration::from_millis(500);

/// What happened during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Events refused because they arrived after shutdown began.
    pub dropped: u64,
    /// Events that were submitted but never reached the handler.
    pub abandoned: u64,
    /// The drain deadline passed before the buffer emptied.
    pub timed_out: bool,
}

impl ShutdownReport {
    /// Every submitted event reached the handler.
    pub fn is_complete(&self) -> bool {
        !self.timed_out && self.abandoned == 0
    }
}

/// Runs the shutdown sequence once. Callers go through [`Router::shutdown`].
pub(crate) async fn coordinate<E>(inner: &Inner<E>) -> ShutdownReport {
    let name = &inner.config.worker_name;
    let timeout = inner.config.shutdown_timeout();

    if !inner
        .state
        .transition(RouterState::Running, RouterState::ShuttingDown)
    {
        debug!(worker = %name, state = ?inner.state.get(), "Router was not running at shutdown");
    }

    info!(
        worker = %name,
        pending = inner.buffer.unfinished(),
        timeout_ms = timeout.as_millis() as u64,
        "Shutting down event router"
    );

    inner.buffer.close();
    inner.token.cancel();

    let worker = inner
        .worker
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();

    let outcome = match worker {
        Some(handle) => match tokio::time::timeout(timeout + WORKER_GRACE, handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                error!(worker = %name, error = %err, "Consumer worker failed");
                abandon_remaining(inner, false, false)
            }
            Err(_) => {
                warn!(
                    worker = %name,
                    "Consumer worker still busy after the drain deadline, detaching it"
                );
                abandon_remaining(inner, true, true)
            }
        },
        None => abandon_remaining(inner, false, false),
    };

    inner.state.set(RouterState::Stopped);

    let report = ShutdownReport {
        processed: inner.counters.processed(),
        failed: inner.counters.failed(),
        skipped: inner.counters.skipped(),
        dropped: inner.counters.dropped(),
        abandoned: outcome.abandoned,
        timed_out: outcome.timed_out,
    };

    if report.is_complete() {
        info!(
            worker = %name,
            processed = report.processed,
            failed = report.failed,
            "Event router stopped, buffer fully drained"
        );
    } else {
        warn!(
            worker = %name,
            processed = report.processed,
            failed = report.failed,
            abandoned = report.abandoned,
            timed_out = report.timed_out,
            "Event router stopped with an incomplete drain"
        );
    }

    report
}

/// Halts the buffer on the worker's behalf and counts what it left behind.
///
/// A detached worker only checks its deadline between events, so it is still inside
/// the handler for the next sequence. That event may yet complete and is counted
/// there, not as abandoned.
fn abandon_remaining<E>(inner: &Inner<E>, timed_out: bool, in_flight: bool) -> DrainOutcome {
    inner.buffer.halt();
    let unfinished = inner.buffer.unfinished();
    DrainOutcome {
        abandoned: if in_flight {
            unfinished.saturating_sub(1)
        } else {
            unfinished
        },
        timed_out,
    }
}

/// Shuts `router` down once `trigger` completes, or returns as soon as the router is
/// shut down some other way.
pub fn shutdown_when<E, F>(router: Router<E>, trigger: F) -> JoinHandle<ShutdownReport>
where
    E: Send + Sync + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = trigger => {}
            _ = router.stopping() => {
                debug!("Router shut down directly, shutdown trigger no longer needed");
            }
        }
        router.shutdown().await
    })
}

/// Shuts `router` down when `token` is cancelled.
pub fn shutdown_on<E>(router: Router<E>, token: CancellationToken) -> JoinHandle<ShutdownReport>
where
    E: Send + Sync + 'static,
{
    shutdown_when(router, token.cancelled_owned())
}

/// Shuts `router` down on Ctrl+C or SIGTERM.
///
/// The returned task resolves with the shutdown report, so `main` can await it before
/// exiting.
pub fn listen_for_signals<E>(router: Router<E>) -> JoinHandle<ShutdownReport>
where
    E: Send + Sync + 'static,
{
    debug!("Registered shutdown on termination signals");
    shutdown_when(router, termination_signal())
}

/// Completes on the first Ctrl+C or SIGTERM.
async fn termination_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
