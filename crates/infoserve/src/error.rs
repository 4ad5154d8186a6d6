//! Unified error type for infoserve.

use std::net::SocketAddr;
use std::path::PathBuf;

use infoserve_protocol::ProtocolError;
use infoserve_transport::TransportError;

use crate::ServerState;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on the wrapping variants auto-generates
/// `From` impls, so the `?` operator converts sub-crate errors
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum InfoserveError {
    /// A transport-level error (connect, send, receive, capacity).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (bad frame size).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The bind address could not be resolved.
    #[error("failed to resolve bind address {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The listening socket could not be opened.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The server is not in a state that allows this operation. Manual
    /// accept/answer calls fail this way while the worker is running.
    #[error("server is {state}; {operation} needs it {required}")]
    InvalidState {
        state: ServerState,
        operation: &'static str,
        required: &'static str,
    },

    /// No client occupies the given slot.
    #[error("no client with number {0}")]
    NoSuchConnection(usize),

    /// Reading or writing a local file failed.
    #[error("file {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing received bytes to their destination failed.
    #[error("failed to store received data: {0}")]
    Output(#[source] std::io::Error),

    /// A file shrank while it was being sent.
    #[error("file {} ended after {sent} of {expected} bytes", path.display())]
    FileTruncated {
        path: PathBuf,
        expected: usize,
        sent: usize,
    },

    /// A configuration file is not valid JSON for the expected type.
    #[error("invalid config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::NotConnected;
        let err: InfoserveError = err.into();
        assert!(matches!(err, InfoserveError::Transport(_)));
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::NegativeFrameSize(-3);
        let err: InfoserveError = err.into();
        assert!(matches!(err, InfoserveError::Protocol(_)));
        assert!(err.to_string().contains("-3"));
    }

    #[test]
    fn test_invalid_state_message() {
        let err = InfoserveError::InvalidState {
            state: ServerState::Running,
            operation: "accept_connection",
            required: "listening or stopped",
        };
        assert_eq!(
            err.to_string(),
            "server is Running; accept_connection needs it listening or stopped"
        );
    }
}
