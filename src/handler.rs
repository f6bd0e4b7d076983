//! The interface the consumer worker calls for every event.
//!
//! ```rust,ignore
//! use eventide::{EventHandler, HandlerError};
//! use async_trait::async_trait;
//!
//! struct Forward;
//!
//! #[async_trait]
//! impl EventHandler<String> for Forward {
//!     fn name(&self) -> &str {
//!         "forward"
//!     }
//!
//!     async fn handle(&self, event: &String) -> Result<(), HandlerError> {
//!         // deliver the event somewhere
//!         Ok(())
//!     }
//! }
//! ```

use crate::error::HandlerError;
use async_trait::async_trait;
use std::fmt;

/// Processes events drained from the ring buffer, one at a time and in order.
///
/// Errors and panics are caught by the worker, logged, and counted; they never stop
/// the worker and the failing event is not retried.
#[async_trait]
pub trait EventHandler<E>: Send + Sync
where
    E: Send + Sync,
{
    /// Name used in log fields.
    fn name(&self) -> &str {
        "handler"
    }

    async fn handle(&self, event: &E) -> Result<(), HandlerError>;
}

/// An [`EventHandler`] backed by a synchronous closure. Built by [`handler_fn`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}

/// Wraps a closure as an [`EventHandler`].
pub fn handler_fn<E, F>(name: impl Into<String>, f: F) -> FnHandler<F>
where
    F: Fn(&E) -> Result<(), HandlerError> + Send + Sync,
{
    FnHandler {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<E, F> EventHandler<E> for FnHandler<F>
where
    E: Send + Sync,
    F: Fn(&E) -> Result<(), HandlerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &E) -> Result<(), HandlerError> {
        (self.f)(event)
    }
}
