//! Last-failure status slot.
//!
//! Failures that never reach a caller (write errors, rejected requests,
//! reconnect failures) are recorded here for a status display to poll.

use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use serde::Serialize;

/// The most recent failure recorded by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureDescription {
    /// What the client was doing.
    pub description: String,
    /// The underlying error, if there was one.
    pub cause: Option<String>,
    /// When the failure was recorded.
    pub recorded_at: SystemTime,
}

/// Shared slot holding the latest failure.
#[derive(Debug, Default)]
pub(crate) struct FailureSlot {
    last: Mutex<Option<FailureDescription>>,
}

impl FailureSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replace the recorded failure.
    pub(crate) fn record(&self, description: impl Into<String>, cause: Option<String>) {
        let failure = FailureDescription {
            description: description.into(),
            cause,
            recorded_at: SystemTime::now(),
        };
        tracing::warn!(
            description = %failure.description,
            cause = failure.cause.as_deref().unwrap_or(""),
            "recording client failure"
        );
        *self.lock() = Some(failure);
    }

    /// Record a failure caused by an error value.
    pub(crate) fn record_error(&self, description: impl Into<String>, error: &dyn std::error::Error) {
        self.record(description, Some(error.to_string()));
    }

    pub(crate) fn last(&self) -> Option<FailureDescription> {
        self.lock().clone()
    }

    // A panic while holding the lock cannot leave the Option half-written.
    fn lock(&self) -> MutexGuard<'_, Option<FailureDescription>> {
        self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
