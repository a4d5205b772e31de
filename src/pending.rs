//! Time-bounded cache of requests awaiting a response.
//!
//! Entries are keyed by correlation id and stamped on insertion. An entry
//! leaves the cache exactly once: either [`PendingCache::take`] hands it to
//! the response reader, or an eviction sweep drops it after the TTL. Both
//! paths run under the same mutex, so a response can never be matched
//! against an entry that is concurrently being evicted.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::handler::PendingResponse;

/// Bookkeeping for one in-flight request.
pub(crate) struct PendingEntry {
    /// Method name, kept for logging.
    pub(crate) method: String,
    /// Decoder and handler awaiting the response.
    pub(crate) response: Box<dyn PendingResponse>,
    inserted_at: Instant,
}

/// Map from correlation id to pending entry with per-entry TTL.
pub(crate) struct PendingCache {
    entries: Mutex<HashMap<u32, PendingEntry>>,
    ttl: Duration,
}

impl PendingCache {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Insert an entry stamped with the current time.
    pub(crate) fn insert(&self, id: u32, method: String, response: Box<dyn PendingResponse>) {
        self.insert_at(id, method, response, Instant::now());
    }

    /// Insert an entry stamped with `now`, evicting anything already expired.
    ///
    /// A duplicate id replaces the previous entry.
    pub(crate) fn insert_at(
        &self,
        id: u32,
        method: String,
        response: Box<dyn PendingResponse>,
        now: Instant,
    ) {
        let mut entries = self.lock();
        Self::evict_locked(&mut entries, self.ttl, now);

        let entry = PendingEntry {
            method,
            response,
            inserted_at: now,
        };
        if let Some(previous) = entries.insert(id, entry) {
            tracing::warn!(
                id,
                method = %previous.method,
                "correlation id still pending, overwriting entry"
            );
        }
    }

    /// Remove and return the live entry for `id`.
    pub(crate) fn take(&self, id: u32) -> Option<PendingEntry> {
        self.take_at(id, Instant::now())
    }

    /// Remove and return the entry for `id` unless it expired before `now`.
    pub(crate) fn take_at(&self, id: u32, now: Instant) -> Option<PendingEntry> {
        let mut entries = self.lock();
        let entry = entries.remove(&id)?;
        if Self::is_expired(&entry, self.ttl, now) {
            tracing::debug!(id, method = %entry.method, "response arrived after entry expired");
            return None;
        }
        Some(entry)
    }

    /// Drop all entries older than the TTL. Returns how many were dropped.
    pub(crate) fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    pub(crate) fn evict_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        Self::evict_locked(&mut entries, self.ttl, now)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Drop every entry, e.g. on shutdown.
    pub(crate) fn clear(&self) -> usize {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    fn evict_locked(entries: &mut HashMap<u32, PendingEntry>, ttl: Duration, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|id, entry| {
            let keep = !Self::is_expired(entry, ttl, now);
            if !keep {
                tracing::debug!(id, method = %entry.method, "evicting expired pending request");
            }
            keep
        });
        before - entries.len()
    }

    #[inline]
    fn is_expired(entry: &PendingEntry, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) >= ttl
    }

    // Handlers never run under this lock, so poisoning can only come from a
    // panic in HashMap bookkeeping; the map is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<u32, PendingEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
