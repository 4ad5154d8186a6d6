//! Remote endpoints.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::TransportError;

/// A remote party to dial: host name or address plus port.
///
/// Immutable once constructed. The host is kept as text and only resolved
/// when [`Endpoint::resolve`] is called, so the same endpoint can be
/// dialled again after DNS changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint from a host and a port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The host name or address literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port number.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves the endpoint to one or more socket addresses.
    ///
    /// # Errors
    /// [`TransportError::Resolve`] if the lookup fails or yields nothing.
    pub async fn resolve(&self) -> Result<Vec<SocketAddr>, TransportError> {
        let resolve_err = |source| TransportError::Resolve {
            endpoint: self.to_string(),
            source,
        };
        let addrs: Vec<SocketAddr> =
            tokio::net::lookup_host((self.host.as_str(), self.port))
                .await
                .map_err(resolve_err)?
                .collect();
        if addrs.is_empty() {
            return Err(resolve_err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no addresses found",
            )));
        }
        Ok(addrs)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    /// Parses `host:port`, or `[v6-addr]:port` for IPv6 literals.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| TransportError::InvalidEndpoint {
            input: s.to_string(),
            reason,
        };
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| invalid("port is not a number from 0 to 65535"))?;
        Ok(Self::new(host, port))
    }
}
