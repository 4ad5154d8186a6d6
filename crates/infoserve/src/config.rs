//! Server and client configuration.
//!
//! Both configs are plain structs with sensible defaults. They can be
//! built in code, or loaded from a JSON file where any missing field
//! keeps its default:
//!
//! ```json
//! { "port": 9000, "capacity": 4, "info_file": "/srv/info.xml" }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use infoserve_protocol::MAX_FRAME_SIZE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::InfoserveError;

/// Default bulk-transfer chunk: 128 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`Server`](crate::Server).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to listen on. 0 lets the OS pick one.
    pub port: u16,

    /// Address or host name to bind to.
    pub bind_host: String,

    /// Maximum number of simultaneously registered clients. Further
    /// clients wait in the OS accept backlog until a slot frees up.
    pub capacity: usize,

    /// How long one readiness poll may wait, in milliseconds. Bounds how
    /// quickly the worker notices a stop request.
    pub poll_interval_ms: u64,

    /// Bytes read from disk and written to the socket per chunk.
    pub chunk_size: usize,

    /// File served in reply to a fetch-info request.
    pub info_file: PathBuf,

    /// Per-call send/receive deadline in milliseconds. `None` waits
    /// forever.
    pub io_timeout_ms: Option<u64>,

    /// How many times one answering pass re-checks readiness after
    /// serving every ready client.
    pub max_dispatch_rounds: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 7777,
            bind_host: "0.0.0.0".into(),
            capacity: 10,
            poll_interval_ms: 3,
            chunk_size: DEFAULT_CHUNK_SIZE,
            info_file: PathBuf::from("info.xml"),
            io_timeout_ms: Some(10_000),
            max_dispatch_rounds: 4,
        }
    }
}

impl ServerConfig {
    /// Default config listening on `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Loads a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, InfoserveError> {
        load_json(path.as_ref())
    }

    /// Clamp any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`Server::new`](crate::Server::new).
    /// Rules:
    /// - `capacity`, `chunk_size` and `max_dispatch_rounds` are at least 1.
    /// - `poll_interval_ms` is at least 1 so the worker never busy-spins.
    pub fn validated(mut self) -> Self {
        if self.capacity == 0 {
            warn!("capacity of 0 would refuse every client, using 1");
            self.capacity = 1;
        }
        if self.chunk_size == 0 {
            warn!("chunk_size of 0, using {DEFAULT_CHUNK_SIZE}");
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.poll_interval_ms == 0 {
            warn!("poll_interval_ms of 0 would busy-spin, using 1");
            self.poll_interval_ms = 1;
        }
        if self.max_dispatch_rounds == 0 {
            self.max_dispatch_rounds = 1;
        }
        self
    }

    /// The poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The per-call I/O deadline as a `Duration`.
    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Largest read issued while receiving a file.
    pub chunk_size: usize,

    /// Where a fetched information file is written.
    pub output_path: PathBuf,

    /// Largest file the client agrees to receive. Announced sizes above
    /// this abort the transfer before anything is written.
    pub max_file_size: usize,

    /// Per-call send/receive deadline in milliseconds.
    pub io_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            output_path: PathBuf::from("xml_for_client.xml"),
            max_file_size: MAX_FRAME_SIZE,
            io_timeout_ms: Some(60_000),
        }
    }
}

impl ClientConfig {
    /// Loads a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, InfoserveError> {
        load_json(path.as_ref())
    }

    /// Clamp any out-of-range values so the config is safe to use.
    pub fn validated(mut self) -> Self {
        if self.chunk_size == 0 {
            warn!("chunk_size of 0, using {DEFAULT_CHUNK_SIZE}");
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.max_file_size > MAX_FRAME_SIZE {
            self.max_file_size = MAX_FRAME_SIZE;
        }
        self
    }

    /// The per-call I/O deadline as a `Duration`.
    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms.map(Duration::from_millis)
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, InfoserveError> {
    let text = std::fs::read_to_string(path).map_err(|source| {
        InfoserveError::File {
            path: path.to_path_buf(),
            source,
        }
    })?;
    serde_json::from_str(&text).map_err(|source| InfoserveError::Config {
        path: path.to_path_buf(),
        source,
    })
}
