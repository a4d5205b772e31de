//! Client configuration.
//!
//! Settings can be built in code through [`ClientBuilder`](crate::ClientBuilder)
//! or loaded from JSON. Every field has a default, so a config file only needs
//! to name what it changes:
//!
//! ```
//! use ola_client::config::ClientConfig;
//!
//! let config = ClientConfig::from_json_str(r#"{ "host": "lights.local" }"#).unwrap();
//! assert_eq!(config.host, "lights.local");
//! assert_eq!(config.port, 9010);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default daemon host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default daemon RPC port.
pub const DEFAULT_PORT: u16 = 9010;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default lifetime of a request awaiting its response.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(60 * 60);

/// Default interval between sweeps of expired pending requests.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default bound on how long shutdown waits for the request queue to drain.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum concurrently running response handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// What happens to a request the daemon answers with RESPONSE_FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureRouting {
    /// Only record the failure in the client's status slot. The request's
    /// handler is never called and its pending entry expires via TTL.
    #[default]
    StatusOnly,
    /// Record the failure and also hand it to the request's handler.
    Handler,
}

/// Configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Daemon host name or address.
    pub host: String,
    /// Daemon RPC port.
    pub port: u16,
    /// Upper bound on a single connect attempt.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// How long an unanswered request is remembered.
    #[serde(with = "millis")]
    pub pending_ttl: Duration,
    /// How often expired requests are swept.
    #[serde(with = "millis")]
    pub sweep_interval: Duration,
    /// How long shutdown waits for queued requests to be written.
    #[serde(with = "millis")]
    pub shutdown_timeout: Duration,
    /// Maximum response handlers running at once.
    pub max_concurrent_handlers: usize,
    /// Delivery policy for RESPONSE_FAILED.
    pub failure_routing: FailureRouting,
}

impl ClientConfig {
    /// `host:port` of the daemon.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            pending_ttl: DEFAULT_PENDING_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            failure_routing: FailureRouting::default(),
        }
    }
}

/// Durations are written as whole milliseconds in config files.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
