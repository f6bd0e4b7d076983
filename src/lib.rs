//! # eventide
//!
//! Ordered, asynchronous event routing over a fixed-capacity ring buffer.
//!
//! Any number of producers hand events to a [`Router`]; a single background worker
//! drains them in submission order and passes each one to an [`EventHandler`].
//! Producers only wait when the buffer is full. Shutdown stops admissions, drains
//! what was already submitted within a timeout, and reports anything left behind.
//!
//! ```text
//! submit ──► Producer ──claim/publish──► RingBuffer ──► ConsumerWorker ──► EventHandler
//!                                            ▲
//!                    shutdown ── cancel ─────┘ (drain, then halt)
//! ```
//!
//! ## Modules
//!
//! - [`router`]: the [`Router`] handle, its lifecycle state and submit policies
//! - [`lazy`]: [`LazyRouter`], a `static`-friendly router built on first use
//! - [`shutdown`]: graceful shutdown, signal and token triggers
//! - [`config`]: [`RouterConfig`], loaded from TOML and the environment

mod consumer;
mod error;
mod handler;
mod producer;
mod ring_buffer;
mod sequence;
mod stats;
mod wait;

pub mod config;
pub mod lazy;
pub mod router;
pub mod shutdown;

pub use crate::config::{AfterShutdown, RouterConfig};
pub use crate::error::{ConfigError, HandlerError, RouterError, SubmitError};
pub use crate::handler::{EventHandler, FnHandler, handler_fn};
pub use crate::lazy::{HandlerFactory, LazyRouter};
pub use crate::producer::Producer;
pub use crate::ring_buffer::{DEFAULT_CAPACITY, MAX_CAPACITY, normalize_capacity};
pub use crate::router::{Router, RouterState};
pub use crate::shutdown::{ShutdownReport, listen_for_signals, shutdown_on, shutdown_when};
pub use crate::stats::RouterStats;
pub use crate::wait::WaitStrategy;
