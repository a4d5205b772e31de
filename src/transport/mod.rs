//! Transport module - the TCP connection to the daemon.
//!
//! Provides the [`ConnectionManager`], sole owner of the socket. The
//! dispatcher writes through it, the reader borrows its read half, and both
//! go through it to reconnect.

mod connection;

pub(crate) use connection::ConnectionManager;
