//! Response reader task: the single reader on the connection.
//!
//! Reads frames, matches RESPONSE envelopes to pending requests and runs
//! their handlers on worker threads, so a slow handler never holds up the
//! next frame. I/O and protocol errors trigger one reconnect; if that fails
//! the client is shut down.

use std::sync::Arc;

use bytes::Bytes;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::config::FailureRouting;
use crate::dispatcher::RequestQueue;
use crate::error::{OlaError, Result};
use crate::handler::RequestFailure;
use crate::pending::PendingCache;
use crate::protocol::{read_frame, MessageType, RpcMessage};
use crate::status::FailureSlot;
use crate::transport::ConnectionManager;

/// Why the inner read loop stopped.
enum ReadOutcome {
    /// Someone else already replaced the connection.
    Superseded,
    /// The connection failed and needs replacing.
    Failed(OlaError),
}

pub(crate) struct ResponseReader {
    connection: Arc<ConnectionManager>,
    pending: Arc<PendingCache>,
    failures: Arc<FailureSlot>,
    queue: Arc<RequestQueue>,
    routing: FailureRouting,
    handler_permits: Arc<Semaphore>,
}

impl ResponseReader {
    pub(crate) fn new(
        connection: Arc<ConnectionManager>,
        pending: Arc<PendingCache>,
        failures: Arc<FailureSlot>,
        queue: Arc<RequestQueue>,
        routing: FailureRouting,
        max_concurrent_handlers: usize,
    ) -> Self {
        Self {
            connection,
            pending,
            failures,
            queue,
            routing,
            handler_permits: Arc::new(Semaphore::new(max_concurrent_handlers.max(1))),
        }
    }

    /// Spawn the reader task.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut generations = self.connection.subscribe();

        loop {
            let (generation, mut reader) = match self.connection.take_reader().await {
                Ok(current) => current,
                Err(e) => {
                    self.terminate(&e).await;
                    return;
                }
            };

            let error = match self.read_loop(generation, &mut reader, &mut generations).await {
                ReadOutcome::Superseded => {
                    tracing::debug!(generation, "connection replaced, switching reader");
                    continue;
                }
                ReadOutcome::Failed(e) => e,
            };
            drop(reader);

            if self.queue.is_closed() {
                tracing::debug!(error = %error, "client shutting down, reader stopping");
                return;
            }

            tracing::warn!(generation, error = %error, "read failed, reconnecting");
            if let Err(e) = self.connection.reconnect(generation).await {
                self.terminate(&e).await;
                return;
            }
        }
    }

    async fn read_loop(
        &self,
        generation: u64,
        reader: &mut OwnedReadHalf,
        generations: &mut watch::Receiver<u64>,
    ) -> ReadOutcome {
        loop {
            let frame = tokio::select! {
                frame = read_frame(reader) => frame,
                _ = async {
                    let _ = generations.wait_for(|current| *current != generation).await;
                } => {
                    return ReadOutcome::Superseded;
                }
            };

            match frame.and_then(|frame| frame.envelope()) {
                Ok(envelope) => self.route(envelope),
                Err(e) => return ReadOutcome::Failed(e),
            }
        }
    }

    fn route(&self, envelope: RpcMessage) {
        let id = envelope.correlation_id();
        match envelope.message_type() {
            Some(MessageType::Response) => self.deliver(id, envelope.payload()),
            Some(MessageType::ResponseFailed) => self.reject(id, envelope.payload()),
            other => {
                tracing::debug!(id, kind = envelope.kind, ?other, "ignoring unexpected message");
            }
        }
    }

    fn deliver(&self, id: u32, buffer: Bytes) {
        let Some(entry) = self.pending.take(id) else {
            tracing::debug!(id, "no pending request for response, dropping");
            return;
        };

        let response = entry.response;
        self.spawn_handler(id, entry.method, move || response.deliver(id, buffer));
    }

    fn reject(&self, id: u32, buffer: Bytes) {
        let reason = String::from_utf8_lossy(&buffer).into_owned();
        self.failures
            .record(format!("daemon rejected request {}", id), Some(reason.clone()));

        if self.routing != FailureRouting::Handler {
            return;
        }
        let Some(entry) = self.pending.take(id) else {
            tracing::debug!(id, "no pending request for failure, dropping");
            return;
        };

        let response = entry.response;
        self.spawn_handler(id, entry.method, move || {
            response.fail(RequestFailure::Rejected { id, reason });
            Ok(())
        });
    }

    /// Run `job` on the blocking pool once a handler permit is free.
    fn spawn_handler<F>(&self, id: u32, method: String, job: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let permits = self.handler_permits.clone();
        let failures = self.failures.clone();

        tokio::spawn(async move {
            // The semaphore is never closed.
            let Ok(permit) = permits.acquire_owned().await else {
                return;
            };
            let outcome = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                job()
            })
            .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.record_error(
                    format!("Malformed response to request {} ({})", id, method),
                    &e,
                ),
                Err(e) => tracing::error!(id, %method, error = %e, "response handler panicked"),
            }
        });
    }

    async fn terminate(&self, error: &OlaError) {
        self.failures
            .record_error("Lost connection to daemon, shutting client down", error);
        self.queue.terminate();
        self.connection.shutdown().await;
    }
}
