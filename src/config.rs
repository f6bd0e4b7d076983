//! Router configuration.
//!
//! Loaded from the `[router]` table of a TOML file, with optional environment
//! overrides applied on top.
//!
//! # Example
//!
//! ```toml
//! [router]
//! buffer_size = 1000          # normalized to 1024
//! wait_strategy = "blocking"  # blocking | yielding | busy_spin
//! shutdown_timeout_ms = 5000
//! after_shutdown = "drop"     # drop | reject
//! worker_name = "telemetry"
//! ```

use crate::error::ConfigError;
use crate::ring_buffer::{DEFAULT_CAPACITY, normalize_capacity};
use crate::wait::WaitStrategy;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const ENV_BUFFER_SIZE: &str = "EVENTIDE_BUFFER_SIZE";
pub const ENV_WAIT_STRATEGY: &str = "EVENTIDE_WAIT_STRATEGY";
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "EVENTIDE_SHUTDOWN_TIMEOUT_MS";
pub const ENV_AFTER_SHUTDOWN: &str = "EVENTIDE_AFTER_SHUTDOWN";

/// What `submit` does with an event once shutdown has begun.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfterShutdown {
    /// Discard the event and count it as dropped; `submit` still returns `Ok`.
    #[default]
    Drop,
    /// Hand the event back in [`SubmitError::ShuttingDown`](crate::SubmitError::ShuttingDown).
    Reject,
}

/// Router settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouterConfig {
    /// Requested ring capacity. Rounded up to a power of two; `0` means the default.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default)]
    pub wait_strategy: WaitStrategy,

    /// Upper bound on how long shutdown waits for the buffer to drain.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    #[serde(default)]
    pub after_shutdown: AfterShutdown,

    /// Name reported in the worker's log fields.
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            wait_strategy: WaitStrategy::default(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            after_shutdown: AfterShutdown::default(),
            worker_name: default_worker_name(),
        }
    }
}

fn default_buffer_size() -> usize {
    DEFAULT_CAPACITY
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_worker_name() -> String {
    "event-router".to_string()
}

/// Layout of a config file; only the `[router]` table is read.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    router: Option<RouterConfig>,
}

impl RouterConfig {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_wait_strategy(mut self, wait_strategy: WaitStrategy) -> Self {
        self.wait_strategy = wait_strategy;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_after_shutdown(mut self, after_shutdown: AfterShutdown) -> Self {
        self.after_shutdown = after_shutdown;
        self
    }

    pub fn with_worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }

    /// The capacity the ring buffer is built with.
    pub fn effective_capacity(&self) -> usize {
        normalize_capacity(self.buffer_size)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Parses the `[router]` table of a TOML document. A missing table yields defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.router.unwrap_or_default())
    }

    /// Reads and parses a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading router configuration");
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Applies `EVENTIDE_*` environment variables on top of this config.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(ENV_BUFFER_SIZE) {
            self.buffer_size = parse_env(ENV_BUFFER_SIZE, &value)?;
        }
        if let Some(value) = lookup(ENV_SHUTDOWN_TIMEOUT_MS) {
            self.shutdown_timeout_ms = parse_env(ENV_SHUTDOWN_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_WAIT_STRATEGY) {
            self.wait_strategy = match value.trim() {
                "blocking" => WaitStrategy::Blocking,
                "yielding" => WaitStrategy::Yielding,
                "busy_spin" => WaitStrategy::BusySpin,
                _ => return Err(invalid_env(ENV_WAIT_STRATEGY, &value)),
            };
        }
        if let Some(value) = lookup(ENV_AFTER_SHUTDOWN) {
            self.after_shutdown = match value.trim() {
                "drop" => AfterShutdown::Drop,
                "reject" => AfterShutdown::Reject,
                _ => return Err(invalid_env(ENV_AFTER_SHUTDOWN, &value)),
            };
        }

        debug!(config = ?self, "Applied environment overrides");
        Ok(self)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid_env(key, value))
}

fn invalid_env(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    }
}
