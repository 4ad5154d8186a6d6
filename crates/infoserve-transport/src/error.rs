use std::time::Duration;

use infoserve_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
///
/// Apart from [`TransportError::CapacityExceeded`],
/// [`TransportError::InvalidEndpoint`] and [`TransportError::Resolve`],
/// every variant is terminal for the
/// connection that produced it.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Host name resolution failed.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Text that does not describe a `host:port` endpoint.
    #[error("invalid endpoint {input:?}: {reason}")]
    InvalidEndpoint { input: String, reason: &'static str },

    /// No resolved address accepted the connection.
    #[error("connect to {endpoint} failed: {source}")]
    ConnectFailed {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Sending data failed or the stream stopped accepting bytes.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The peer closed the stream before the expected bytes arrived.
    #[error("peer closed connection after {received} of {expected} bytes")]
    PeerClosed { expected: usize, received: usize },

    /// A send or receive did not finish within the per-call deadline.
    #[error("i/o timed out after {0:?}")]
    TimedOut(Duration),

    /// The connection was closed, or an earlier failure left it unusable.
    #[error("connection is not connected")]
    NotConnected,

    /// Accepting an incoming connection failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The connection set has no free slot.
    #[error("connection set is full ({capacity} slots)")]
    CapacityExceeded { capacity: usize },

    /// The peer sent bytes that violate the wire format.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
