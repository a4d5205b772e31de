//! Client builder and lifecycle.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the client.
//! The [`Client`] manages the lifecycle:
//! 1. Connect to the daemon
//! 2. Spawn the dispatcher (single writer) and reader (single reader)
//! 3. Accept requests from any number of callers
//! 4. Shut down: drain the queue, stop the reader, close the socket
//!
//! # Example
//!
//! ```ignore
//! use ola_client::messages::{DmxData, GET_DMX, UniverseRequest};
//! use ola_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder().host("localhost").port(9010).start().await?;
//!
//!     let reply: DmxData = client.call(GET_DMX, &UniverseRequest { universe: 1 }).await?;
//!     println!("{} channels", reply.data.len());
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use prost::Message;
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;

use crate::codec::ProtoCodec;
use crate::config::{ClientConfig, FailureRouting};
use crate::dispatcher::{Dispatcher, Request, RequestQueue};
use crate::error::{OlaError, Result};
use crate::handler::{oneshot_handler, ResponseHandler, TypedResponse};
use crate::messages::{
    Ack, DmxData, OptionalUniverseRequest, UniverseInfoReply, UniverseRequest, GET_DMX,
    GET_UNIVERSE_INFO, UPDATE_DMX_DATA,
};
use crate::pending::PendingCache;
use crate::reader::ResponseReader;
use crate::status::{FailureDescription, FailureSlot};
use crate::transport::ConnectionManager;

/// Builder for configuring and creating a daemon client.
///
/// Settings are fixed once the client is built.
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a new client builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    /// Replace all settings at once, e.g. with a loaded config file.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the daemon host.
    ///
    /// Default: `localhost`
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the daemon RPC port.
    ///
    /// Default: 9010
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the connect timeout.
    ///
    /// Default: 2 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set how long an unanswered request is remembered.
    ///
    /// Default: 1 hour
    pub fn pending_ttl(mut self, ttl: Duration) -> Self {
        self.config.pending_ttl = ttl;
        self
    }

    /// Set how often expired requests are swept.
    ///
    /// Default: 60 seconds
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Set how long [`Client::shutdown`] waits for queued requests to be
    /// written before dropping the rest.
    ///
    /// Default: 5 seconds
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Set the maximum number of response handlers running at once.
    ///
    /// Further responses wait for a free slot; none are dropped.
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_handlers = limit;
        self
    }

    /// Choose where RESPONSE_FAILED is reported.
    ///
    /// Default: [`FailureRouting::StatusOnly`]
    pub fn failure_routing(mut self, routing: FailureRouting) -> Self {
        self.config.failure_routing = routing;
        self
    }

    /// Build the client without connecting.
    pub fn build(self) -> Client {
        Client::new(self.config)
    }

    /// Build the client and start it.
    pub async fn start(self) -> Result<Client> {
        let client = self.build();
        client.start().await?;
        Ok(client)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles of the two background tasks.
struct Tasks {
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    reader: JoinHandle<()>,
}

impl Tasks {
    fn take_dispatcher(&self) -> Option<JoinHandle<()>> {
        self.dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl Drop for Tasks {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.take_dispatcher() {
            dispatcher.abort();
        }
        self.reader.abort();
    }
}

struct Inner {
    config: ClientConfig,
    failures: Arc<FailureSlot>,
    connection: Arc<ConnectionManager>,
    pending: Arc<PendingCache>,
    queue: Arc<RequestQueue>,
    /// Handed to the dispatcher on first successful start.
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Request>>>,
    tasks: OnceCell<Tasks>,
}

impl Inner {
    fn receiver(&self) -> MutexGuard<'_, Option<mpsc::UnboundedReceiver<Request>>> {
        self.receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A client for the lighting daemon.
///
/// Cheap to clone; all clones share one connection, one request queue and
/// one pending-request cache. Dropping the last clone stops the background
/// tasks.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    fn new(config: ClientConfig) -> Self {
        let failures = Arc::new(FailureSlot::new());
        let connection = Arc::new(ConnectionManager::new(&config, failures.clone()));
        let pending = Arc::new(PendingCache::new(config.pending_ttl));
        let (queue, receiver) = RequestQueue::new();

        Self {
            inner: Arc::new(Inner {
                config,
                failures,
                connection,
                pending,
                queue: Arc::new(queue),
                receiver: Mutex::new(Some(receiver)),
                tasks: OnceCell::new(),
            }),
        }
    }

    /// The settings this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Connect and spawn the background tasks.
    ///
    /// Idempotent: once started, further calls return immediately. A failed
    /// start leaves the client unstarted, so it can be retried.
    pub async fn start(&self) -> Result<()> {
        if self.inner.queue.is_closed() {
            return Err(OlaError::ClientShutdown);
        }
        self.inner.tasks.get_or_try_init(|| self.launch()).await?;
        Ok(())
    }

    async fn launch(&self) -> Result<Tasks> {
        let inner = &self.inner;
        inner.connection.connect().await?;

        let receiver = inner.receiver().take().ok_or(OlaError::ClientShutdown)?;

        let dispatcher = Dispatcher::new(
            receiver,
            inner.queue.clone(),
            inner.connection.clone(),
            inner.pending.clone(),
            inner.failures.clone(),
            inner.config.sweep_interval,
        )
        .spawn();

        let reader = ResponseReader::new(
            inner.connection.clone(),
            inner.pending.clone(),
            inner.failures.clone(),
            inner.queue.clone(),
            inner.config.failure_routing,
            inner.config.max_concurrent_handlers,
        )
        .spawn();

        tracing::info!(addr = %inner.config.addr(), "client started");
        Ok(Tasks {
            dispatcher: Mutex::new(Some(dispatcher)),
            reader,
        })
    }

    /// Queue a request with an explicit response decoder.
    ///
    /// Returns immediately. `handler` runs once with the decoded response, or
    /// never if the request fails (see [`FailureRouting`]). Requests queued
    /// before [`start`](Self::start) are sent once the client starts.
    ///
    /// # Errors
    ///
    /// [`OlaError::ClientShutdown`] once the client has been shut down.
    pub fn submit<T, D, H>(
        &self,
        method: impl Into<String>,
        payload: Bytes,
        decoder: D,
        handler: H,
    ) -> Result<()>
    where
        T: 'static,
        D: FnOnce(Bytes) -> Result<T> + Send + 'static,
        H: ResponseHandler<T>,
    {
        self.inner.queue.push(Request {
            method: method.into(),
            payload,
            response: Box::new(TypedResponse::new(decoder, handler)),
        })
    }

    /// Queue a protobuf request whose response is decoded as `Resp`.
    pub fn send_request<Req, Resp, H>(
        &self,
        method: impl Into<String>,
        request: &Req,
        handler: H,
    ) -> Result<()>
    where
        Req: Message,
        Resp: Message + Default + 'static,
        H: ResponseHandler<Resp>,
    {
        self.submit(
            method,
            ProtoCodec::encode(request),
            ProtoCodec::decode::<Resp>,
            handler,
        )
    }

    /// Send a request and wait for its response, starting the client if
    /// needed.
    ///
    /// Resolves with [`OlaError::RequestAbandoned`] if the request expires or
    /// the client shuts down first, and with [`OlaError::Rejected`] when the
    /// daemon refuses it under [`FailureRouting::Handler`]. Under
    /// [`FailureRouting::StatusOnly`] a refused request only resolves when its
    /// TTL expires, so wrap the call in `tokio::time::timeout` if that
    /// matters.
    pub async fn call<Req, Resp>(&self, method: impl Into<String>, request: &Req) -> Result<Resp>
    where
        Req: Message,
        Resp: Message + Default + Send + 'static,
    {
        self.start().await?;
        let (handler, rx) = oneshot_handler::<Resp>();
        self.send_request(method, request, handler)?;
        rx.await.map_err(|_| OlaError::RequestAbandoned)?
    }

    /// Send DMX values for one universe.
    pub fn update_dmx_data<H>(&self, universe: i32, data: impl Into<Bytes>, handler: H) -> Result<()>
    where
        H: ResponseHandler<Ack>,
    {
        let request = DmxData {
            universe,
            data: data.into(),
            priority: None,
        };
        self.send_request(UPDATE_DMX_DATA, &request, handler)
    }

    /// Read the current DMX values of one universe.
    pub fn get_dmx<H>(&self, universe: i32, handler: H) -> Result<()>
    where
        H: ResponseHandler<DmxData>,
    {
        self.send_request(GET_DMX, &UniverseRequest { universe }, handler)
    }

    /// Describe one universe, or all of them when `universe` is `None`.
    pub fn get_universe_info<H>(&self, universe: Option<i32>, handler: H) -> Result<()>
    where
        H: ResponseHandler<UniverseInfoReply>,
    {
        self.send_request(
            GET_UNIVERSE_INFO,
            &OptionalUniverseRequest { universe },
            handler,
        )
    }

    /// The most recent failure, for status displays.
    pub fn last_failure(&self) -> Option<FailureDescription> {
        self.inner.failures.last()
    }

    /// Whether a connection to the daemon is currently open.
    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Whether the client no longer accepts requests.
    pub fn is_shut_down(&self) -> bool {
        self.inner.queue.is_closed()
    }

    /// Number of requests still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.evict_expired();
        self.inner.pending.len()
    }

    /// Stop the client.
    ///
    /// Closes the request queue, lets the dispatcher write what was already
    /// queued, stops the reader and closes the connection. The drain is
    /// bounded by the configured shutdown timeout; requests not written by
    /// then are dropped. Handlers of requests still pending are dropped
    /// without being called. Terminal: a shut-down client cannot be
    /// restarted.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.queue.close();

        if let Some(tasks) = inner.tasks.get() {
            if let Some(mut dispatcher) = tasks.take_dispatcher() {
                let drain_timeout = inner.config.shutdown_timeout;
                match tokio::time::timeout(drain_timeout, &mut dispatcher).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(error = %e, "dispatcher task ended abnormally"),
                    Err(_) => {
                        tracing::warn!(
                            timeout = ?drain_timeout,
                            "request queue not drained in time, dropping the rest"
                        );
                        dispatcher.abort();
                    }
                }
            }
            tasks.reader.abort();
        }

        inner.connection.shutdown().await;
        let dropped = inner.pending.clear();
        tracing::info!(dropped, "client shut down");
    }
}
