//! Request codes: the only in-band control value a client sends.
//!
//! A request is exactly four bytes, a signed 32-bit integer with no
//! framing around it. Decoding never fails: any value outside the known
//! set becomes [`RequestCode::Unknown`] and it is up to the server to
//! decide what an unknown request means.

use std::fmt;

/// Number of bytes a request code occupies on the wire.
pub const REQUEST_CODE_LEN: usize = 4;

/// An action a client asks the server to perform.
///
/// ```rust
/// use infoserve_protocol::RequestCode;
///
/// let bytes = RequestCode::FetchInfo.to_bytes();
/// assert_eq!(RequestCode::from_bytes(bytes), RequestCode::FetchInfo);
/// assert_eq!(RequestCode::from_i32(99), RequestCode::Unknown(99));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCode {
    /// `1`: send me the server's information file.
    FetchInfo,
    /// `2`: I want to join. Accepted but not acted on yet.
    Join,
    /// Any other value.
    Unknown(i32),
}

impl RequestCode {
    /// Raw value of [`RequestCode::FetchInfo`].
    pub const FETCH_INFO: i32 = 1;
    /// Raw value of [`RequestCode::Join`].
    pub const JOIN: i32 = 2;

    /// Maps a raw integer to a request code.
    pub fn from_i32(raw: i32) -> Self {
        match raw {
            Self::FETCH_INFO => Self::FetchInfo,
            Self::JOIN => Self::Join,
            other => Self::Unknown(other),
        }
    }

    /// Returns the raw integer sent on the wire.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::FetchInfo => Self::FETCH_INFO,
            Self::Join => Self::JOIN,
            Self::Unknown(raw) => raw,
        }
    }

    /// Encodes the code as four little-endian bytes.
    pub fn to_bytes(self) -> [u8; REQUEST_CODE_LEN] {
        self.as_i32().to_le_bytes()
    }

    /// Decodes four little-endian bytes into a code.
    pub fn from_bytes(bytes: [u8; REQUEST_CODE_LEN]) -> Self {
        Self::from_i32(i32::from_le_bytes(bytes))
    }

    /// Returns `true` if the server answers this code with a frame.
    pub fn expects_reply(self) -> bool {
        matches!(self, Self::FetchInfo)
    }
}

impl From<i32> for RequestCode {
    fn from(raw: i32) -> Self {
        Self::from_i32(raw)
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchInfo => write!(f, "fetch-info(1)"),
            Self::Join => write!(f, "join(2)"),
            Self::Unknown(raw) => write!(f, "unknown({raw})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_map_both_ways() {
        assert_eq!(RequestCode::from_i32(1), RequestCode::FetchInfo);
        assert_eq!(RequestCode::from_i32(2), RequestCode::Join);
        assert_eq!(RequestCode::FetchInfo.as_i32(), 1);
        assert_eq!(RequestCode::Join.as_i32(), 2);
    }

    #[test]
    fn test_unknown_codes_keep_raw_value() {
        for raw in [0, -1, 3, 99, i32::MIN, i32::MAX] {
            let code = RequestCode::from_i32(raw);
            assert_eq!(code, RequestCode::Unknown(raw));
            assert_eq!(code.as_i32(), raw);
        }
    }

    #[test]
    fn test_wire_bytes_are_little_endian() {
        assert_eq!(RequestCode::FetchInfo.to_bytes(), [1, 0, 0, 0]);
        assert_eq!(RequestCode::Unknown(0x0102_0304).to_bytes(), [4, 3, 2, 1]);
        assert_eq!(
            RequestCode::from_bytes([0xff, 0xff, 0xff, 0xff]),
            RequestCode::Unknown(-1)
        );
    }

    #[test]
    fn test_only_fetch_info_expects_reply() {
        assert!(RequestCode::FetchInfo.expects_reply());
        assert!(!RequestCode::Join.expects_reply());
        assert!(!RequestCode::Unknown(99).expects_reply());
    }

    #[test]
    fn test_display() {
        assert_eq!(RequestCode::FetchInfo.to_string(), "fetch-info(1)");
        assert_eq!(RequestCode::Unknown(99).to_string(), "unknown(99)");
    }
}
