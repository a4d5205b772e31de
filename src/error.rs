//! Error types for ola-client.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all daemon client operations.
#[derive(Debug, Error)]
pub enum OlaError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error (bad header version, malformed envelope, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Body does not fit in the 28-bit length field of the frame header.
    #[error("Frame body of {0} bytes exceeds the 28-bit length limit")]
    FrameTooLarge(usize),

    /// Protobuf deserialization error.
    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// JSON error (configuration files only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The daemon could not be reached.
    #[error("Unable to connect to daemon at {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The connect attempt did not finish within the configured timeout.
    #[error("Timed out after {timeout:?} connecting to daemon at {addr}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// No live connection to write to or read from.
    #[error("Not connected to daemon")]
    NotConnected,

    /// The client has been shut down and accepts no more requests.
    #[error("Client has been shut down")]
    ClientShutdown,

    /// The request was dropped before a response arrived (TTL eviction or shutdown).
    #[error("Request was abandoned before a response arrived")]
    RequestAbandoned,

    /// The daemon answered with RESPONSE_FAILED.
    #[error("Daemon rejected request {id}: {reason}")]
    Rejected { id: u32, reason: String },
}

/// Result type alias using OlaError.
pub type Result<T> = std::result::Result<T, OlaError>;
