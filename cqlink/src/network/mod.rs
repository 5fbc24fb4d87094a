//! Connections to a single node: handshake, request multiplexing, keyspace
//! switching and per-connection prepared statements.

mod connection;
mod keyspace;
mod prepared_cache;
pub(crate) mod router;

pub use connection::{open_connection, Connection, ConnectionConfig};
pub use keyspace::VerifiedKeyspaceName;
pub use router::ErrorReceiver;

/// Lifecycle of a [`Connection`]. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// The socket is being opened.
    Connecting,
    /// OPTIONS/STARTUP, authentication, REGISTER and USE are in progress.
    Negotiating,
    /// Requests can be sent.
    Ready,
    /// [`Connection::close`] was called; requests in flight are being failed.
    Closing,
    /// The router stopped. Every request fails.
    Closed,
}
