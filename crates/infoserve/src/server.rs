//! The file server: listener, connection set, worker loop.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──setup_port()──→ Created (resolved)
//!         ──open_port_for_listening()──→ Listening
//!         ──start()──→ Running ──stop()──→ Stopped
//! ```
//!
//! While listening (or after stopping) the caller drives the server by
//! hand: `accept_connection`, `check_for_requests`, `answer_requests`,
//! `send_file`. While running, the worker task owns the listener and the
//! [`ConnectionSet`] outright; they are moved into the task on `start()`
//! and handed back on `stop()`. Manual calls in the meantime fail with
//! [`InfoserveError::InvalidState`] instead of racing the worker.
//!
//! # Worker loop
//!
//! ```text
//! loop until shutdown token flips:
//!   accept one pending client (non-blocking; skipped when the set is full)
//!   poll the set for readable clients (bounded by poll_interval)
//!   for each readable client: read one request code and answer it
//! ```
//!
//! A failed read or a dead peer removes that client only. Nothing that
//! happens inside the loop ends the loop except the shutdown token.

use std::fmt;
use std::future::poll_fn;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use infoserve_protocol::RequestCode;
use infoserve_transport::{Connection, ConnectionSet, TransportError};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{transfer, InfoserveError, ServerConfig};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// The lifecycle state of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed; the port may or may not be resolved yet.
    Created,
    /// Listening socket open; no worker.
    Listening,
    /// Worker task running.
    Running,
    /// Worker stopped. Connections stay open until the server is dropped.
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Listening => write!(f, "Listening"),
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// What happened to one ready client during an answering pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Fetch-info request answered with `bytes` bytes of file.
    Served { slot: usize, bytes: u64 },
    /// Fetch-info request whose transfer failed. If the file could not be
    /// opened the client was sent a refusal header and stays connected.
    TransferFailed { slot: usize },
    /// Join request. Acknowledged in the log only.
    JoinRequested { slot: usize },
    /// A code the server has no handler for. The client stays connected.
    Unhandled { slot: usize, code: i32 },
    /// The client disconnected or sent a broken request, and was removed.
    Dropped { slot: usize },
}

/// A point-in-time summary of a server, safe to take while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub state: ServerState,
    pub port: u16,
    pub connections: usize,
    pub capacity: usize,
    pub accepted: u64,
    pub files_served: u64,
    pub unhandled_requests: u64,
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Information about server:")?;
        writeln!(f, "port: {}", self.port)?;
        writeln!(f, "Number of clients: {}/{}", self.connections, self.capacity)?;
        writeln!(f, "state: {}", self.state)?;
        writeln!(f, "accepted: {}", self.accepted)?;
        writeln!(f, "files served: {}", self.files_served)?;
        write!(f, "unhandled requests: {}", self.unhandled_requests)
    }
}

// ---------------------------------------------------------------------------
// Shared counters
// ---------------------------------------------------------------------------

/// Counters shared between the worker and whoever asks for information.
#[derive(Debug, Default)]
struct ServerStats {
    connections: AtomicUsize,
    accepted: AtomicU64,
    files_served: AtomicU64,
    unhandled: AtomicU64,
}

// ---------------------------------------------------------------------------
// ServerCore: the part the worker owns
// ---------------------------------------------------------------------------

struct ServerCore {
    listener: TcpListener,
    connections: ConnectionSet,
    config: Arc<ServerConfig>,
    stats: Arc<ServerStats>,
}

impl ServerCore {
    /// Accepts one pending client, if any, without waiting.
    async fn accept_pending(&mut self) -> Result<Option<usize>, InfoserveError> {
        // Leave extra clients in the OS backlog rather than accepting and
        // immediately dropping them.
        if self.connections.is_full() {
            return Err(TransportError::CapacityExceeded {
                capacity: self.connections.capacity(),
            }
            .into());
        }

        let listener = &self.listener;
        let accepted = poll_fn(|cx| match listener.poll_accept(cx) {
            Poll::Ready(result) => Poll::Ready(Some(result)),
            Poll::Pending => Poll::Ready(None),
        })
        .await;
        let Some(result) = accepted else {
            return Ok(None);
        };
        let (stream, peer) = result.map_err(TransportError::AcceptFailed)?;

        let connection = Connection::accepted(stream, peer)
            .with_io_timeout(self.config.io_timeout());
        let id = connection.id();
        let slot = self.connections.add(connection)?;
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        self.sync_count();
        info!(slot, conn = %id, %peer, "connection accepted");
        Ok(Some(slot))
    }

    /// Waits up to the poll interval for any client to have input.
    async fn check_for_requests(&mut self) -> bool {
        let interval = self.config.poll_interval();
        self.connections.poll_readable(interval).await > 0
    }

    /// Answers every client with pending input, re-checking readiness
    /// after each pass so requests that arrived meanwhile are served too.
    async fn answer_requests(&mut self) -> Vec<Dispatch> {
        let mut outcomes = Vec::new();
        for _ in 0..self.config.max_dispatch_rounds {
            if self.connections.poll_readable(Duration::ZERO).await == 0 {
                break;
            }
            while let Some(slot) = self.connections.take_next_ready() {
                outcomes.push(self.answer(slot).await);
            }
        }
        outcomes
    }

    async fn answer(&mut self, slot: usize) -> Dispatch {
        let Some(connection) = self.connections.get_mut(slot) else {
            return Dispatch::Dropped { slot };
        };
        let id = connection.id();

        let code = match connection.receive_request().await {
            Ok(code) => code,
            Err(e) => {
                debug!(slot, conn = %id, error = %e, "request read failed");
                self.drop_slot(slot);
                return Dispatch::Dropped { slot };
            }
        };
        debug!(slot, conn = %id, %code, "request received");

        match code {
            RequestCode::FetchInfo => {
                let path = self.config.info_file.clone();
                match self.send_file(slot, &path).await {
                    Ok(bytes) => Dispatch::Served { slot, bytes },
                    Err(e) => {
                        error!(slot, conn = %id, error = %e, "file send failed");
                        Dispatch::TransferFailed { slot }
                    }
                }
            }
            RequestCode::Join => {
                info!(slot, conn = %id, "client wants to join the game");
                Dispatch::JoinRequested { slot }
            }
            RequestCode::Unknown(code) => {
                self.stats.unhandled.fetch_add(1, Ordering::Relaxed);
                warn!(slot, conn = %id, code, "unhandled request code");
                Dispatch::Unhandled { slot, code }
            }
        }
    }

    /// Sends `path` to the client in `slot`. A client left unusable by a
    /// failed transfer is removed.
    async fn send_file(
        &mut self,
        slot: usize,
        path: &Path,
    ) -> Result<u64, InfoserveError> {
        let chunk_size = self.config.chunk_size;
        let connection = self
            .connections
            .get_mut(slot)
            .ok_or(InfoserveError::NoSuchConnection(slot))?;
        let result = transfer::send_file(connection, path, chunk_size).await;
        let alive = connection.is_connected();

        match &result {
            Ok(_) => {
                self.stats.files_served.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) if !alive => self.drop_slot(slot),
            Err(_) => {}
        }
        result
    }

    fn drop_slot(&mut self, slot: usize) {
        if let Some(connection) = self.connections.remove(slot) {
            info!(slot, conn = %connection.id(), "connection removed");
        }
        self.sync_count();
    }

    fn sync_count(&self) {
        self.stats
            .connections
            .store(self.connections.len(), Ordering::Relaxed);
    }
}

/// The worker loop. Returns the core so `stop()` can hand it back.
async fn run_worker(
    mut core: ServerCore,
    mut shutdown: watch::Receiver<bool>,
) -> ServerCore {
    debug!("server worker started");
    while !*shutdown.borrow() {
        match core.accept_pending().await {
            Ok(_) => {}
            // Full: the client waits in the backlog until a slot frees up.
            Err(InfoserveError::Transport(
                TransportError::CapacityExceeded { .. },
            )) => {}
            Err(e) => warn!(error = %e, "accept failed"),
        }

        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            ready = core.check_for_requests() => {
                if ready {
                    core.answer_requests().await;
                }
            }
        }
    }
    debug!("server worker exiting");
    core
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<ServerCore>,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A TCP server that hands out its information file on request.
///
/// # Example
///
/// ```rust,no_run
/// use infoserve::prelude::*;
///
/// # async fn run() -> Result<(), InfoserveError> {
/// let mut server = Server::new(ServerConfig::with_port(7777));
/// server.init().await?;
/// println!("{}", server.get_information());
/// server.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: Arc<ServerConfig>,
    state: ServerState,
    bind_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    core: Option<ServerCore>,
    worker: Option<Worker>,
    stats: Arc<ServerStats>,
}

impl Server {
    /// Creates a server in the `Created` state. Nothing is opened yet.
    pub fn new(config: ServerConfig) -> Self {
        let config = config.validated();
        debug!(port = config.port, capacity = config.capacity, "server created");
        Self {
            config: Arc::new(config),
            state: ServerState::Created,
            bind_addr: None,
            local_addr: None,
            core: None,
            worker: None,
            stats: Arc::new(ServerStats::default()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// The configuration in use.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The address actually bound, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Resolves the bind address. The server stays `Created`.
    pub async fn setup_port(&mut self) -> Result<SocketAddr, InfoserveError> {
        self.require(ServerState::Created, "setup_port", "created")?;
        let host = self.config.bind_host.clone();
        let port = self.config.port;
        let resolve_err = |source| InfoserveError::Resolve {
            addr: format!("{host}:{port}"),
            source,
        };

        let addr = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(resolve_err)?
            .next()
            .ok_or_else(|| {
                resolve_err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no addresses found",
                ))
            });
        let addr = match addr {
            Ok(addr) => addr,
            Err(e) => {
                warn!(error = %e, "failed to resolve port");
                return Err(e);
            }
        };

        self.bind_addr = Some(addr);
        debug!(%addr, "port resolved");
        Ok(addr)
    }

    /// Opens the listening socket: `Created → Listening`.
    ///
    /// [`setup_port`](Self::setup_port) must have succeeded first.
    pub async fn open_port_for_listening(
        &mut self,
    ) -> Result<SocketAddr, InfoserveError> {
        self.require(ServerState::Created, "open_port_for_listening", "created")?;
        let addr = self.bind_addr.ok_or(InfoserveError::InvalidState {
            state: self.state,
            operation: "open_port_for_listening",
            required: "resolved by setup_port",
        })?;

        let listener = TcpListener::bind(addr).await.map_err(|source| {
            warn!(%addr, error = %source, "failed opening port for listening");
            InfoserveError::Bind { addr, source }
        })?;
        let local = listener
            .local_addr()
            .map_err(|source| InfoserveError::Bind { addr, source })?;

        self.core = Some(ServerCore {
            listener,
            connections: ConnectionSet::with_capacity(self.config.capacity),
            config: Arc::clone(&self.config),
            stats: Arc::clone(&self.stats),
        });
        self.local_addr = Some(local);
        self.state = ServerState::Listening;
        info!(addr = %local, "port opened for listening");
        Ok(local)
    }

    /// Launches the background worker: `Listening → Running`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) -> Result<(), InfoserveError> {
        self.require(ServerState::Listening, "start", "listening")?;
        let core = self.core.take().ok_or(InfoserveError::InvalidState {
            state: self.state,
            operation: "start",
            required: "listening",
        })?;

        let (shutdown, token) = watch::channel(false);
        let handle = tokio::spawn(run_worker(core, token));
        self.worker = Some(Worker { shutdown, handle });
        self.state = ServerState::Running;
        info!("server started");
        Ok(())
    }

    /// Resolves, opens and starts in one call.
    pub async fn init(&mut self) -> Result<SocketAddr, InfoserveError> {
        self.setup_port().await?;
        let addr = self.open_port_for_listening().await?;
        self.start()?;
        Ok(addr)
    }

    /// Stops the worker and waits for it to finish: `Running → Stopped`.
    ///
    /// Connections stay open; they close when the server is dropped or
    /// [`shutdown`](Self::shutdown). Calling this when not running does
    /// nothing.
    pub async fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.shutdown.send_replace(true);
        match worker.handle.await {
            Ok(core) => self.core = Some(core),
            Err(e) => {
                error!(error = %e, "server worker failed; its connections are gone");
                self.stats.connections.store(0, Ordering::Relaxed);
            }
        }
        self.state = ServerState::Stopped;
        info!("server stopped");
    }

    /// Stops the worker, then closes every connection cleanly.
    pub async fn shutdown(mut self) {
        self.stop().await;
        if let Some(core) = self.core.as_mut() {
            core.connections.close_all().await;
            core.sync_count();
        }
    }

    /// Accepts one pending client, if any, without waiting.
    ///
    /// Returns the slot of the new client, or `None` when nobody is
    /// waiting.
    pub async fn accept_connection(
        &mut self,
    ) -> Result<Option<usize>, InfoserveError> {
        self.core_mut("accept_connection")?.accept_pending().await
    }

    /// Waits up to the poll interval and reports whether any client has
    /// pending input.
    pub async fn check_for_requests(&mut self) -> Result<bool, InfoserveError> {
        Ok(self.core_mut("check_for_requests")?.check_for_requests().await)
    }

    /// Reads and answers one request from every client with pending input.
    pub async fn answer_requests(
        &mut self,
    ) -> Result<Vec<Dispatch>, InfoserveError> {
        Ok(self.core_mut("answer_requests")?.answer_requests().await)
    }

    /// Sends any file to the client in `slot`, framed like an
    /// information reply.
    pub async fn send_file(
        &mut self,
        slot: usize,
        path: impl AsRef<Path>,
    ) -> Result<u64, InfoserveError> {
        self.core_mut("send_file")?
            .send_file(slot, path.as_ref())
            .await
    }

    /// Number of registered clients.
    pub fn connection_count(&self) -> usize {
        self.stats.connections.load(Ordering::Relaxed)
    }

    /// A snapshot of the server's port, clients and counters.
    pub fn information(&self) -> ServerInfo {
        ServerInfo {
            state: self.state,
            port: self.local_addr.map_or(self.config.port, |a| a.port()),
            connections: self.connection_count(),
            capacity: self.config.capacity,
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            files_served: self.stats.files_served.load(Ordering::Relaxed),
            unhandled_requests: self.stats.unhandled.load(Ordering::Relaxed),
        }
    }

    /// [`information`](Self::information) rendered as text.
    pub fn get_information(&self) -> String {
        self.information().to_string()
    }

    fn require(
        &self,
        state: ServerState,
        operation: &'static str,
        required: &'static str,
    ) -> Result<(), InfoserveError> {
        if self.state == state {
            Ok(())
        } else {
            Err(InfoserveError::InvalidState {
                state: self.state,
                operation,
                required,
            })
        }
    }

    fn core_mut(
        &mut self,
        operation: &'static str,
    ) -> Result<&mut ServerCore, InfoserveError> {
        let state = self.state;
        self.core.as_mut().ok_or(InfoserveError::InvalidState {
            state,
            operation,
            required: "listening or stopped",
        })
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown.send_replace(true);
            worker.handle.abort();
            debug!("server dropped while running; worker aborted");
        }
        // The listener and any remaining connections close as `core`
        // drops.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            bind_host: "127.0.0.1".into(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_new_server_is_created() {
        let server = Server::new(local_config());
        assert_eq!(server.state(), ServerState::Created);
        assert_eq!(server.local_addr(), None);
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn test_dropping_never_started_server_is_fine() {
        let server = Server::new(local_config());
        drop(server);
    }

    #[tokio::test]
    async fn test_open_requires_setup_first() {
        let mut server = Server::new(local_config());
        let err = server.open_port_for_listening().await.unwrap_err();
        assert!(matches!(err, InfoserveError::InvalidState { .. }));
        assert_eq!(server.state(), ServerState::Created);
    }

    #[tokio::test]
    async fn test_start_requires_listening() {
        let mut server = Server::new(local_config());
        assert!(server.start().is_err());
        assert_eq!(server.state(), ServerState::Created);
    }

    #[tokio::test]
    async fn test_bind_conflict_leaves_server_created() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut server = Server::new(ServerConfig {
            port,
            ..local_config()
        });
        server.setup_port().await.unwrap();
        let err = server.open_port_for_listening().await.unwrap_err();
        assert!(matches!(err, InfoserveError::Bind { .. }));
        assert_eq!(server.state(), ServerState::Created);
    }

    #[tokio::test]
    async fn test_manual_ops_rejected_while_running() {
        let mut server = Server::new(local_config());
        server.init().await.unwrap();
        assert_eq!(server.state(), ServerState::Running);

        let err = server.accept_connection().await.unwrap_err();
        assert!(matches!(
            err,
            InfoserveError::InvalidState {
                state: ServerState::Running,
                ..
            }
        ));
        assert!(server.answer_requests().await.is_err());

        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(server.accept_connection().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stop_twice_is_harmless() {
        let mut server = Server::new(local_config());
        server.init().await.unwrap();
        server.stop().await;
        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.start().is_err());
    }

    #[tokio::test]
    async fn test_information_reports_bound_port() {
        let mut server = Server::new(local_config());
        server.setup_port().await.unwrap();
        let addr = server.open_port_for_listening().await.unwrap();

        let info = server.information();
        assert_eq!(info.port, addr.port());
        assert_eq!(info.connections, 0);
        assert_eq!(info.state, ServerState::Listening);
        let text = server.get_information();
        assert!(text.starts_with("Information about server:"));
        assert!(text.contains(&format!("port: {}", addr.port())));
    }
}
