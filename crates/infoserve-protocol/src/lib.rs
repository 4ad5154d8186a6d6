//! Wire protocol for infoserve.
//!
//! This crate defines the bytes that clients and servers exchange:
//!
//! - **Request codes** ([`RequestCode`]): a bare 4-byte integer a client
//!   sends to ask the server for something.
//! - **Frames** ([`encode_frame`], [`decode_frame_size`], ...): a 4-byte
//!   byte count followed by that many raw bytes, used for the bulk reply.
//! - **Errors** ([`ProtocolError`]): malformed sizes and truncated input.
//!
//! # Architecture
//!
//! The protocol layer is pure: no sockets, no files. The transport crate
//! reads and writes these byte shapes; the server and client decide what
//! to do with them.
//!
//! ```text
//! Client ──[code: i32]──→ Server
//! Client ←─[size: i32][payload; size]── Server   (only for FetchInfo)
//! ```
//!
//! # Byte order
//!
//! Every integer on the wire is little-endian, regardless of the host.

mod error;
mod frame;
mod request;

pub use error::ProtocolError;
pub use frame::{
    decode_frame, decode_frame_size, encode_frame, encode_frame_header,
    encode_refusal_header, FRAME_HEADER_LEN, MAX_FRAME_SIZE, REFUSED_FRAME_SIZE,
};
pub use request::{RequestCode, REQUEST_CODE_LEN};
