//! Session settings

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub use config::ConfigError;

/// Timeouts and limits for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Timeout for caller commands that do not pass one
    pub default_command_timeout_ms: u64,

    /// Timeout for identity, setup and probe commands
    pub identity_timeout_ms: u64,

    /// Timeout for `ATZ`
    pub reset_timeout_ms: u64,

    /// Bus query timeout under automatic protocol search
    pub auto_protocol_timeout_ms: u64,

    /// Attempts per fallback candidate before it is excluded
    pub negotiation_attempts: u32,

    /// Failed commands in a row that force recovery
    pub consecutive_failure_limit: u32,

    /// Timeout for each keepalive ping
    pub keepalive_timeout_ms: u64,

    /// How long disconnect waits for the reader task
    pub close_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_command_timeout_ms: 1000,
            identity_timeout_ms: 1000,
            reset_timeout_ms: 2500,
            auto_protocol_timeout_ms: 5000,
            negotiation_attempts: 3,
            consecutive_failure_limit: 10,
            keepalive_timeout_ms: 1000,
            close_timeout_ms: 2000,
        }
    }
}

impl SessionConfig {
    /// Defaults, overlaid by an optional TOML file, overlaid by `OBD_*`
    /// environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(config::Environment::with_prefix("OBD").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    pub fn default_command_timeout(&self) -> Duration {
        Duration::from_millis(self.default_command_timeout_ms)
    }

    pub fn identity_timeout(&self) -> Duration {
        Duration::from_millis(self.identity_timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn auto_protocol_timeout(&self) -> Duration {
        Duration::from_millis(self.auto_protocol_timeout_ms)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}
