//! Connection lifecycle: connect, disconnect and serialized reconnect.
//!
//! Every connect attempt bumps a generation counter. A caller that saw a
//! failure on generation `g` asks for `reconnect(g)`; if the generation has
//! already moved past `g`, someone else reconnected in the meantime and the
//! caller gets that attempt's outcome instead of tearing the new socket down.
//! New generations are published on a `watch` channel so the reader notices
//! reconnects triggered by the writer.
//!
//! The write half lives under its own lock. Closing the connection first
//! cancels a write in progress, so a daemon that stops reading cannot hold
//! up reconnects, status queries or shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use crate::config::ClientConfig;
use crate::error::{OlaError, Result};
use crate::status::FailureSlot;

/// A failed write and the connection generation it was attempted on.
#[derive(Debug)]
pub(crate) struct WriteFailure {
    pub(crate) generation: u64,
    pub(crate) error: OlaError,
}

/// Connection state guarded by the connect/reconnect lock.
#[derive(Default)]
struct Slot {
    generation: u64,
    /// Handed to the reader once per generation.
    reader: Option<OwnedReadHalf>,
    /// Set by `shutdown`; no further connects are made.
    shut_down: bool,
}

struct Writer {
    generation: u64,
    half: OwnedWriteHalf,
}

/// Owns the single TCP connection to the daemon.
pub(crate) struct ConnectionManager {
    host: String,
    port: u16,
    connect_timeout: Duration,
    slot: Mutex<Slot>,
    writer: Mutex<Option<Writer>>,
    connected: AtomicBool,
    generation_tx: watch::Sender<u64>,
    /// Bumped on every close; in-flight writes watch it.
    closes_tx: watch::Sender<u64>,
    failures: Arc<FailureSlot>,
}

impl ConnectionManager {
    pub(crate) fn new(config: &ClientConfig, failures: Arc<FailureSlot>) -> Self {
        let (generation_tx, _) = watch::channel(0);
        let (closes_tx, _) = watch::channel(0);
        Self {
            host: config.host.clone(),
            port: config.port,
            connect_timeout: config.connect_timeout,
            slot: Mutex::new(Slot::default()),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            generation_tx,
            closes_tx,
            failures,
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect unless already connected. Returns the live generation.
    pub(crate) async fn connect(&self) -> Result<u64> {
        let mut slot = self.slot.lock().await;
        if slot.shut_down {
            return Err(OlaError::ClientShutdown);
        }
        if self.is_connected() {
            return Ok(slot.generation);
        }
        self.establish(&mut slot).await
    }

    /// Replace the connection that failed on generation `observed`.
    ///
    /// Concurrent callers reporting the same generation share one attempt.
    pub(crate) async fn reconnect(&self, observed: u64) -> Result<u64> {
        let mut slot = self.slot.lock().await;
        if slot.shut_down {
            return Err(OlaError::ClientShutdown);
        }
        if slot.generation != observed {
            let connected = self.is_connected();
            tracing::debug!(
                observed,
                current = slot.generation,
                connected,
                "reconnect already attempted"
            );
            return if connected {
                Ok(slot.generation)
            } else {
                Err(OlaError::NotConnected)
            };
        }

        tracing::info!(addr = %self.addr(), generation = observed, "reconnecting to daemon");
        self.close(&mut slot).await;
        self.establish(&mut slot).await
    }

    /// Close the connection. Errors while closing are logged, not returned.
    pub(crate) async fn disconnect(&self) {
        let mut slot = self.slot.lock().await;
        self.close(&mut slot).await;
    }

    /// Close the connection for good; later connects fail with
    /// [`OlaError::ClientShutdown`].
    pub(crate) async fn shutdown(&self) {
        self.slot.lock().await.shut_down = true;
        self.disconnect().await;
    }

    /// Write one complete frame on the current connection.
    ///
    /// Fails with [`OlaError::NotConnected`] if the connection is closed
    /// before the frame is fully written.
    pub(crate) async fn write_frame(&self, frame: &[u8]) -> std::result::Result<(), WriteFailure> {
        let mut closes = self.closes_tx.subscribe();
        let mut writer = self.writer.lock().await;
        let Some(current) = writer.as_mut() else {
            return Err(WriteFailure {
                generation: *self.generation_tx.borrow(),
                error: OlaError::NotConnected,
            });
        };

        let generation = current.generation;
        let half = &mut current.half;
        let write = async move {
            half.write_all(frame).await?;
            half.flush().await
        };

        let result = tokio::select! {
            result = write => result.map_err(OlaError::from),
            _ = closes.changed() => Err(OlaError::NotConnected),
        };
        result.map_err(|error| WriteFailure { generation, error })
    }

    /// Hand out the read half of the current connection.
    pub(crate) async fn take_reader(&self) -> Result<(u64, OwnedReadHalf)> {
        let mut slot = self.slot.lock().await;
        match slot.reader.take() {
            Some(reader) if self.is_connected() => Ok((slot.generation, reader)),
            _ => Err(OlaError::NotConnected),
        }
    }

    /// Watch connection generations.
    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn establish(&self, slot: &mut Slot) -> Result<u64> {
        let result = self.open().await;
        slot.generation += 1;

        let outcome = match result {
            Ok(stream) => {
                let (reader, half) = stream.into_split();
                slot.reader = Some(reader);
                *self.writer.lock().await = Some(Writer {
                    generation: slot.generation,
                    half,
                });
                self.connected.store(true, Ordering::Release);
                tracing::info!(addr = %self.addr(), generation = slot.generation, "connected to daemon");
                Ok(slot.generation)
            }
            Err(e) => {
                self.failures
                    .record_error(format!("Unable to connect to daemon at {}", self.addr()), &e);
                Err(e)
            }
        };

        self.generation_tx.send_replace(slot.generation);
        outcome
    }

    async fn open(&self) -> Result<TcpStream> {
        let addr = self.addr();
        let connect = TcpStream::connect((self.host.as_str(), self.port));

        let stream = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(OlaError::Connection { addr, source }),
            Err(_) => {
                return Err(OlaError::ConnectTimeout {
                    addr,
                    timeout: self.connect_timeout,
                })
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(error = %e, "unable to disable Nagle's algorithm");
        }
        Ok(stream)
    }

    async fn close(&self, slot: &mut Slot) {
        self.connected.store(false, Ordering::Release);
        slot.reader = None;
        // Abort any write in progress so the writer lock is released.
        self.closes_tx.send_modify(|closes| *closes += 1);

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.half.shutdown().await {
                tracing::warn!(error = %e, generation = writer.generation, "error closing connection");
            }
        }
    }
}
