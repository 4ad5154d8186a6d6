//! Length-prefixed frames for bulk transfer.
//!
//! A frame is a 4-byte signed size followed by exactly that many payload
//! bytes. There is no padding, checksum or terminator. The size field is
//! a signed i32; a negative value is always a [`ProtocolError`].
//!
//! The size header and the payload are separable: the
//! server streams large files after writing [`encode_frame_header`], and
//! the client validates the header with [`decode_frame_size`] before it
//! commits to receiving anything.

use crate::ProtocolError;

/// Bytes in a frame header.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest payload a 32-bit signed size field can describe.
pub const MAX_FRAME_SIZE: usize = i32::MAX as usize;

/// Size sent in place of a frame the sender cannot produce, such as a
/// file that does not exist. No payload follows it, and receivers reject
/// it as [`ProtocolError::NegativeFrameSize`].
pub const REFUSED_FRAME_SIZE: i32 = -1;

/// The header announcing a refused frame.
pub fn encode_refusal_header() -> [u8; FRAME_HEADER_LEN] {
    REFUSED_FRAME_SIZE.to_le_bytes()
}

/// Encodes the size header for a payload of `len` bytes.
///
/// # Errors
/// Returns [`ProtocolError::FrameTooLarge`] if `len` exceeds
/// [`MAX_FRAME_SIZE`].
pub fn encode_frame_header(
    len: usize,
) -> Result<[u8; FRAME_HEADER_LEN], ProtocolError> {
    let size = i32::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
        size: len as u64,
        limit: MAX_FRAME_SIZE as u64,
    })?;
    Ok(size.to_le_bytes())
}

/// Encodes a complete frame: header followed by the raw payload.
///
/// ```rust
/// use infoserve_protocol::{decode_frame, encode_frame, MAX_FRAME_SIZE};
///
/// let frame = encode_frame(b"<info/>").unwrap();
/// assert_eq!(&frame[..4], &[7, 0, 0, 0]);
/// assert_eq!(decode_frame(&frame, MAX_FRAME_SIZE).unwrap(), b"<info/>");
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let header = encode_frame_header(payload.len())?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Interprets a frame header and returns the payload size it announces.
///
/// `limit` is the largest payload the caller is prepared to accept. Pass
/// [`MAX_FRAME_SIZE`] to accept anything the format can express.
///
/// # Errors
/// - [`ProtocolError::NegativeFrameSize`] if the size is below zero.
/// - [`ProtocolError::FrameTooLarge`] if the size is above `limit`.
pub fn decode_frame_size(
    header: [u8; FRAME_HEADER_LEN],
    limit: usize,
) -> Result<usize, ProtocolError> {
    let raw = i32::from_le_bytes(header);
    // A non-negative i32 always fits in usize on supported targets.
    let size = usize::try_from(raw)
        .map_err(|_| ProtocolError::NegativeFrameSize(raw))?;
    if size > limit {
        return Err(ProtocolError::FrameTooLarge {
            size: size as u64,
            limit: limit as u64,
        });
    }
    Ok(size)
}

/// Decodes a complete in-memory frame and returns its payload.
///
/// Bytes after the payload are ignored, so a buffer holding several
/// frames can be walked by slicing past each one.
///
/// # Errors
/// Header errors from [`decode_frame_size`], or
/// [`ProtocolError::Truncated`] if `bytes` is shorter than the frame.
pub fn decode_frame(bytes: &[u8], limit: usize) -> Result<&[u8], ProtocolError> {
    let header: [u8; FRAME_HEADER_LEN] = bytes
        .get(..FRAME_HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(ProtocolError::Truncated {
            expected: FRAME_HEADER_LEN,
            actual: bytes.len(),
        })?;
    let size = decode_frame_size(header, limit)?;
    let end = FRAME_HEADER_LEN + size;
    bytes.get(FRAME_HEADER_LEN..end).ok_or(ProtocolError::Truncated {
        expected: end,
        actual: bytes.len(),
    })
}
