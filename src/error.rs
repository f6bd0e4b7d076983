//! Error types surfaced by the router.

use std::fmt;
use thiserror::Error;

/// Errors raised while starting a router.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The consumer worker is a tokio task, so a runtime must be running.
    #[error("no tokio runtime is running; start the router from within a runtime")]
    NoRuntime,

    #[error("invalid router configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while loading a [`RouterConfig`](crate::RouterConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: String, value: String },
}

/// An event that could not be handed to the router. The event is returned to the caller.
#[derive(Error, PartialEq, Eq)]
pub enum SubmitError<E> {
    /// Shutdown has begun and the router is configured to reject late events.
    #[error("router is shutting down")]
    ShuttingDown(E),

    /// The buffer had no free slot (only returned by `try_submit`).
    #[error("ring buffer is full")]
    Full(E),

    /// The consumer stopped while the producer was waiting for room.
    #[error("consumer has stopped")]
    Halted(E),
}

impl<E> SubmitError<E> {
    /// Recovers the event that was not submitted.
    pub fn into_inner(self) -> E {
        match self {
            SubmitError::ShuttingDown(event)
            | SubmitError::Full(event)
            | SubmitError::Halted(event) => event,
        }
    }
}

impl<E> fmt::Debug for SubmitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::ShuttingDown(_) => f.write_str("ShuttingDown(..)"),
            SubmitError::Full(_) => f.write_str("Full(..)"),
            SubmitError::Halted(_) => f.write_str("Halted(..)"),
        }
    }
}

/// A failure reported by an [`EventHandler`](crate::EventHandler).
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),

    /// The handler panicked; the payload message is captured when it is a string.
    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_error_returns_event() {
        let err = SubmitError::Full(vec![1, 2, 3]);
        assert_eq!(err.to_string(), "ring buffer is full");
        assert_eq!(err.into_inner(), vec![1, 2, 3]);

        let err = SubmitError::ShuttingDown("late");
        assert_eq!(format!("{err:?}"), "ShuttingDown(..)");
        assert_eq!(err.into_inner(), "late");
    }

    #[test]
    fn test_handler_error_display() {
        assert_eq!(
            HandlerError::failed("boom").to_string(),
            "handler failed: boom"
        );

        let io = std::io::Error::other("disk gone");
        let err = HandlerError::from(Box::new(io) as Box<dyn std::error::Error + Send + Sync>);
        assert_eq!(err.to_string(), "disk gone");
    }
}
