//! Dedicated dispatcher task: the single writer on the connection.
//!
//! Callers push requests onto an unbounded channel and return immediately.
//! One task drains the channel in order, so requests reach the wire in
//! exactly the order they were queued.
//!
//! # Architecture
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► RequestQueue ─► Dispatcher ─► pending cache + socket
//! Caller N ─┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{OlaError, Result};
use crate::handler::PendingResponse;
use crate::pending::PendingCache;
use crate::protocol::{encode_frame, RpcMessage};
use crate::status::FailureSlot;
use crate::transport::ConnectionManager;

/// Shortest sweep period; `tokio::time::interval` rejects zero.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// A request waiting to be written.
pub(crate) struct Request {
    pub(crate) method: String,
    pub(crate) payload: Bytes,
    pub(crate) response: Box<dyn PendingResponse>,
}

/// Issues correlation ids: 1, 2, ..., u32::MAX, 1, ... (0 is never used).
#[derive(Debug)]
pub(crate) struct CorrelationIds {
    next: u32,
}

impl CorrelationIds {
    pub(crate) fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(next: u32) -> Self {
        Self { next: next.max(1) }
    }

    pub(crate) fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next = if id == u32::MAX { 1 } else { id + 1 };
        id
    }
}

/// Sending side of the request channel, shared by every client handle.
///
/// Closing the queue drops the sender; the dispatcher then drains what is
/// left and stops.
pub(crate) struct RequestQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<Request>>>,
    terminated: AtomicBool,
}

impl RequestQueue {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Request>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            sender: Mutex::new(Some(tx)),
            terminated: AtomicBool::new(false),
        };
        (queue, rx)
    }

    /// Enqueue a request. Never blocks.
    pub(crate) fn push(&self, request: Request) -> Result<()> {
        let sender = self.lock();
        let tx = sender.as_ref().ok_or(OlaError::ClientShutdown)?;
        tx.send(request).map_err(|_| OlaError::ClientShutdown)
    }

    /// Stop accepting requests. Returns `false` if already closed.
    pub(crate) fn close(&self) -> bool {
        self.lock().take().is_some()
    }

    /// Close after an unrecoverable connection loss. Requests still queued
    /// are discarded instead of written.
    pub(crate) fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        self.close();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Request>>> {
        self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The writer loop's state.
pub(crate) struct Dispatcher {
    rx: mpsc::UnboundedReceiver<Request>,
    queue: Arc<RequestQueue>,
    connection: Arc<ConnectionManager>,
    pending: Arc<PendingCache>,
    failures: Arc<FailureSlot>,
    ids: CorrelationIds,
    sweep_interval: Duration,
}

impl Dispatcher {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<Request>,
        queue: Arc<RequestQueue>,
        connection: Arc<ConnectionManager>,
        pending: Arc<PendingCache>,
        failures: Arc<FailureSlot>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            rx,
            queue,
            connection,
            pending,
            failures,
            ids: CorrelationIds::new(),
            sweep_interval: sweep_interval.max(MIN_SWEEP_INTERVAL),
        }
    }

    /// Spawn the dispatcher task.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        sweep.tick().await;

        loop {
            tokio::select! {
                request = self.rx.recv() => match request {
                    Some(request) => self.dispatch(request).await,
                    None => break,
                },
                _ = sweep.tick() => {
                    let evicted = self.pending.evict_expired();
                    if evicted > 0 {
                        tracing::debug!(evicted, "evicted expired pending requests");
                    }
                }
            }
        }

        tracing::debug!("request queue closed, dispatcher stopping");
    }

    async fn dispatch(&mut self, request: Request) {
        let Request {
            method,
            payload,
            response,
        } = request;

        if self.queue.is_terminated() {
            tracing::debug!(%method, "client terminated, discarding queued request");
            return;
        }

        let id = self.ids.next_id();
        let frame = match encode_frame(&RpcMessage::request(id, &method, payload)) {
            Ok(frame) => frame,
            Err(e) => {
                self.failures
                    .record_error(format!("Unable to encode request {} ({})", id, method), &e);
                return;
            }
        };

        // Bookkeeping first, so even an immediate response finds its entry.
        self.pending.insert(id, method.clone(), response);
        self.send(id, &method, &frame).await;
    }

    /// Write a frame, with one reconnect and one retry on failure. A request
    /// that still cannot be written stays pending until its TTL expires.
    async fn send(&self, id: u32, method: &str, frame: &[u8]) {
        let failure = match self.connection.write_frame(frame).await {
            Ok(()) => {
                tracing::trace!(id, method, bytes = frame.len(), "request written");
                return;
            }
            Err(failure) => failure,
        };

        tracing::warn!(id, method, error = %failure.error, "write failed, reconnecting");
        if let Err(e) = self.connection.reconnect(failure.generation).await {
            self.failures.record_error(
                format!("Unable to send request {} ({}): reconnect failed", id, method),
                &e,
            );
            return;
        }

        if let Err(retry) = self.connection.write_frame(frame).await {
            self.failures.record_error(
                format!("Unable to send request {} ({}) after reconnecting", id, method),
                &retry.error,
            );
        }
    }
}
