//! Handler module - delivering responses to the code that asked for them.
//!
//! Provides:
//! - [`ResponseHandler`] - receives a decoded response (and optionally failures)
//! - [`with_failure`] - builds a handler from two closures
//! - [`RequestFailure`] - why a request ended without a response
//!
//! Any `FnOnce(T) + Send + 'static` closure is a handler:
//!
//! ```ignore
//! client.send_request(GET_DMX, &UniverseRequest { universe: 1 }, |reply: DmxData| {
//!     println!("universe 1 is at {:?}", reply.data);
//! })?;
//! ```

mod response;

pub use response::{with_failure, RequestFailure, ResponseHandler, WithFailure};
pub(crate) use response::{oneshot_handler, PendingResponse, TypedResponse};
