//! # Infoserve
//!
//! A small TCP file server and its client.
//!
//! A [`Server`] accepts up to `capacity` clients, polls them for
//! readiness on a background worker, and answers each 4-byte request
//! code. Code `1` is answered with the server's information file as a
//! length-prefixed frame; code `2` is a join request that is only
//! logged; anything else is ignored but counted. A [`Client`] dials a
//! server, sends codes and writes received files to disk.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use infoserve::prelude::*;
//!
//! # async fn run() -> Result<(), InfoserveError> {
//! let mut server = Server::new(ServerConfig::with_port(7777));
//! server.init().await?;
//!
//! let mut client = Client::dial(
//!     &Endpoint::new("127.0.0.1", 7777),
//!     ClientConfig::default(),
//! )
//! .await?;
//! client.send_request(RequestCode::FetchInfo).await?;
//! client.close().await;
//!
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod console;
pub mod error;
pub mod server;
mod transfer;

pub use client::{Client, RequestOutcome};
pub use config::{ClientConfig, ServerConfig, DEFAULT_CHUNK_SIZE};
pub use error::InfoserveError;
pub use server::{Dispatch, Server, ServerInfo, ServerState};

/// Re-exports for convenient glob imports.
pub mod prelude {
    pub use crate::client::{Client, RequestOutcome};
    pub use crate::config::{ClientConfig, ServerConfig};
    pub use crate::console::{ClientCommand, CommandError, Reply, ServerCommand};
    pub use crate::error::InfoserveError;
    pub use crate::server::{Dispatch, Server, ServerInfo, ServerState};
    pub use infoserve_protocol::RequestCode;
    pub use infoserve_transport::{Connection, Endpoint, TransportError};
}
