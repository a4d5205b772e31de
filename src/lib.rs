//! # ola-client
//!
//! Async client for the RPC protocol of the Open Lighting Architecture
//! daemon (`olad`).
//!
//! The daemon listens on a TCP port (9010 by default). Every message is a
//! 4-byte header (version nibble + 28-bit body length) followed by a
//! protobuf `RpcMessage` envelope, which in turn carries the protobuf-encoded
//! method payload.
//!
//! ## Architecture
//!
//! - **Dispatcher**: the single writer. Drains the request queue in order,
//!   assigns correlation ids and records each request as pending.
//! - **Reader**: the single reader. Matches responses to pending requests and
//!   runs their handlers off the read path.
//! - **Connection manager**: owns the socket; one reconnect is attempted on
//!   failure, and a failed reconnect shuts the client down.
//!
//! ## Example
//!
//! ```ignore
//! use ola_client::messages::UniverseInfoReply;
//! use ola_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> ola_client::Result<()> {
//!     let client = Client::builder().start().await?;
//!
//!     client.get_universe_info(None, |reply: UniverseInfoReply| {
//!         for universe in reply.universe {
//!             println!("{}: {}", universe.universe, universe.name);
//!         }
//!     })?;
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod messages;
pub mod protocol;

mod client;
mod dispatcher;
mod pending;
mod reader;
mod status;
mod transport;

pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, FailureRouting};
pub use error::{OlaError, Result};
pub use handler::{with_failure, RequestFailure, ResponseHandler};
pub use status::FailureDescription;
