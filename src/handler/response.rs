//! Response handlers and their type-erased pending form.

use std::marker::PhantomData;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{OlaError, Result};

/// Why a request finished without a decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFailure {
    /// The daemon answered RESPONSE_FAILED.
    Rejected { id: u32, reason: String },
    /// The response buffer could not be decoded.
    Malformed { id: u32, reason: String },
}

impl From<RequestFailure> for OlaError {
    fn from(failure: RequestFailure) -> Self {
        match failure {
            RequestFailure::Rejected { id, reason } => OlaError::Rejected { id, reason },
            RequestFailure::Malformed { id, reason } => {
                OlaError::Protocol(format!("Malformed response to request {}: {}", id, reason))
            }
        }
    }
}

/// Receives the outcome of one request.
///
/// A handler is called at most once. Failures are only delivered when the
/// client routes them to handlers (see
/// [`FailureRouting`](crate::config::FailureRouting)) or when the response
/// cannot be decoded.
pub trait ResponseHandler<T>: Send + 'static {
    /// Called with the decoded response.
    fn on_response(self: Box<Self>, response: T);

    /// Called instead of `on_response` when the request failed.
    fn on_failure(self: Box<Self>, failure: RequestFailure) {
        tracing::debug!(?failure, "request failed with no failure callback");
    }
}

impl<T, F> ResponseHandler<T> for F
where
    F: FnOnce(T) + Send + 'static,
{
    fn on_response(self: Box<Self>, response: T) {
        (*self)(response)
    }
}

/// Handler built from a response closure and a failure closure.
pub struct WithFailure<F, E> {
    on_response: F,
    on_failure: E,
}

/// Combine a response closure and a failure closure into one handler.
pub fn with_failure<T, F, E>(on_response: F, on_failure: E) -> WithFailure<F, E>
where
    F: FnOnce(T) + Send + 'static,
    E: FnOnce(RequestFailure) + Send + 'static,
{
    WithFailure {
        on_response,
        on_failure,
    }
}

impl<T, F, E> ResponseHandler<T> for WithFailure<F, E>
where
    F: FnOnce(T) + Send + 'static,
    E: FnOnce(RequestFailure) + Send + 'static,
{
    fn on_response(self: Box<Self>, response: T) {
        let this = *self;
        (this.on_response)(response)
    }

    fn on_failure(self: Box<Self>, failure: RequestFailure) {
        let this = *self;
        (this.on_failure)(failure)
    }
}

/// Handler that completes a oneshot channel.
struct Responder<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T: Send + 'static> ResponseHandler<T> for Responder<T> {
    fn on_response(self: Box<Self>, response: T) {
        // The caller may have stopped waiting.
        let _ = self.tx.send(Ok(response));
    }

    fn on_failure(self: Box<Self>, failure: RequestFailure) {
        let _ = self.tx.send(Err(failure.into()));
    }
}

/// Handler whose outcome is awaited through the returned receiver. Dropping
/// the handler unanswered closes the channel.
pub(crate) fn oneshot_handler<T: Send + 'static>(
) -> (impl ResponseHandler<T>, oneshot::Receiver<Result<T>>) {
    let (tx, rx) = oneshot::channel();
    (Responder { tx }, rx)
}

/// A decoder plus handler with the response type erased, as stored in the
/// pending cache.
pub(crate) trait PendingResponse: Send {
    /// Decode the response to request `id` and hand it to the handler.
    ///
    /// A decode failure is passed to the handler and also returned.
    fn deliver(self: Box<Self>, id: u32, buffer: Bytes) -> Result<()>;

    /// Hand a failure to the handler.
    fn fail(self: Box<Self>, failure: RequestFailure);
}

/// [`PendingResponse`] for responses of type `T`.
pub(crate) struct TypedResponse<T, D, H> {
    decoder: D,
    handler: Box<H>,
    _phantom: PhantomData<fn() -> T>,
}

impl<T, D, H> TypedResponse<T, D, H>
where
    D: FnOnce(Bytes) -> Result<T> + Send + 'static,
    H: ResponseHandler<T>,
{
    pub(crate) fn new(decoder: D, handler: H) -> Self {
        Self {
            decoder,
            handler: Box::new(handler),
            _phantom: PhantomData,
        }
    }
}

impl<T, D, H> PendingResponse for TypedResponse<T, D, H>
where
    T: 'static,
    D: FnOnce(Bytes) -> Result<T> + Send + 'static,
    H: ResponseHandler<T>,
{
    fn deliver(self: Box<Self>, id: u32, buffer: Bytes) -> Result<()> {
        let this = *self;
        match (this.decoder)(buffer) {
            Ok(response) => {
                this.handler.on_response(response);
                Ok(())
            }
            Err(e) => {
                this.handler.on_failure(RequestFailure::Malformed {
                    id,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn fail(self: Box<Self>, failure: RequestFailure) {
        let this = *self;
        this.handler.on_failure(failure);
    }
}
