//! Error types for the protocol layer.
//!
//! Each crate in infoserve defines its own error enum. A `ProtocolError`
//! always means the bytes themselves were wrong, never that a socket
//! misbehaved.

/// Errors that can occur while encoding or decoding wire data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A frame header carried a negative byte count.
    #[error("negative frame size: {0}")]
    NegativeFrameSize(i32),

    /// A frame is larger than the receiver is willing to accept, or larger
    /// than a 32-bit size field can describe.
    #[error("frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge {
        /// Advertised or requested size in bytes.
        size: u64,
        /// The limit that was exceeded.
        limit: u64,
    },

    /// The input ended before the advertised number of bytes.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required (header plus payload).
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },
}
