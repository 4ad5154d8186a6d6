//! Transport layer for infoserve.
//!
//! - [`Endpoint`]: a `host:port` pair to dial.
//! - [`Connection`]: one stream socket with request and byte-stream
//!   primitives that accumulate partial reads and writes.
//! - [`ConnectionSet`]: a fixed-capacity registry of server-side
//!   connections with a single multiplexed readiness poll.
//!
//! Everything here is `async`: an operation does not complete until the
//! OS has moved every requested byte, the peer has broken the stream, or
//! the connection's optional deadline has fired.

mod connection;
mod endpoint;
mod error;
mod set;

pub use connection::Connection;
pub use endpoint::Endpoint;
pub use error::TransportError;
pub use set::{ConnectionSet, Visit};

use std::fmt;

/// Opaque identifier for a connection, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
