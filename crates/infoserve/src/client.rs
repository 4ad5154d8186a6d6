//! The client side: dial a server, send request codes, receive files.

use std::path::{Path, PathBuf};

use infoserve_protocol::RequestCode;
use infoserve_transport::{Connection, Endpoint};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::{transfer, ClientConfig, InfoserveError};

/// What a [`Client::send_request`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The code went out and no reply was expected.
    Sent,
    /// The code went out and the reply file was written to `path`.
    Received { path: PathBuf, bytes: u64 },
}

/// One client connection to a server.
///
/// Generic over the stream so tests can run it over an in-memory pipe;
/// [`dial`](Client::dial) produces the TCP flavor.
#[derive(Debug)]
pub struct Client<S = TcpStream> {
    connection: Connection<S>,
    config: ClientConfig,
}

impl Client<TcpStream> {
    /// Resolves `endpoint` and connects to it.
    pub async fn dial(
        endpoint: &Endpoint,
        config: ClientConfig,
    ) -> Result<Self, InfoserveError> {
        let config = config.validated();
        let connection = Connection::open(endpoint, config.io_timeout()).await?;
        info!(conn = %connection.id(), %endpoint, "connected to server");
        Ok(Self { connection, config })
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already open connection.
    pub fn from_connection(connection: Connection<S>, config: ClientConfig) -> Self {
        Self {
            connection,
            config: config.validated(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Sends `code`. A fetch-info code is followed immediately by
    /// receiving the reply into the configured output path.
    ///
    /// The output file is opened before the code goes out, so a bad path
    /// fails without asking the server for anything.
    pub async fn send_request(
        &mut self,
        code: RequestCode,
    ) -> Result<RequestOutcome, InfoserveError> {
        if !code.expects_reply() {
            self.connection.send_request(code).await?;
            debug!(conn = %self.connection.id(), %code, "request sent");
            return Ok(RequestOutcome::Sent);
        }

        let path = self.config.output_path.clone();
        let file = create_output(&path).await?;
        if let Err(e) = self.connection.send_request(code).await {
            drop(file);
            discard_partial(&path).await;
            return Err(e.into());
        }
        debug!(conn = %self.connection.id(), %code, "request sent");

        let bytes = self.receive_into_file(file, &path).await?;
        Ok(RequestOutcome::Received { path, bytes })
    }

    /// Receives one file from the server and writes it to `path`.
    ///
    /// On failure the partially written file is removed and the
    /// connection is closed.
    pub async fn receive_file(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<u64, InfoserveError> {
        let path = path.as_ref();
        let file = match create_output(path).await {
            Ok(file) => file,
            Err(e) => {
                // Whatever the server sends next can no longer be consumed.
                self.connection.close().await;
                return Err(e);
            }
        };
        self.receive_into_file(file, path).await
    }

    /// Receives one file from the server into `writer`.
    ///
    /// Any failure closes the connection: the rest of the frame is still
    /// on the stream and cannot be told apart from a new header.
    pub async fn receive_file_into<W>(
        &mut self,
        writer: &mut W,
    ) -> Result<u64, InfoserveError>
    where
        W: AsyncWrite + Unpin,
    {
        let result = transfer::receive_into(
            &mut self.connection,
            writer,
            self.config.chunk_size,
            self.config.max_file_size,
        )
        .await;
        if result.is_err() {
            self.connection.close().await;
        }
        result
    }

    async fn receive_into_file(
        &mut self,
        mut file: File,
        path: &Path,
    ) -> Result<u64, InfoserveError> {
        match self.receive_file_into(&mut file).await {
            Ok(bytes) => {
                info!(
                    conn = %self.connection.id(),
                    bytes,
                    path = %path.display(),
                    "file received"
                );
                Ok(bytes)
            }
            Err(e) => {
                drop(file);
                discard_partial(path).await;
                Err(e)
            }
        }
    }

    /// Disconnects. Calling it again does nothing.
    pub async fn close(&mut self) {
        self.connection.close().await;
    }
}

async fn create_output(path: &Path) -> Result<File, InfoserveError> {
    File::create(path).await.map_err(|source| InfoserveError::File {
        path: path.to_path_buf(),
        source,
    })
}

async fn discard_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "could not remove partial file");
    }
}
