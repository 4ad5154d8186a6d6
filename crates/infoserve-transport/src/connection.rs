//! A single stream connection with request and byte-stream primitives.
//!
//! A read or write on a stream socket may move fewer bytes than asked.
//! Every method here loops until the full amount has been transferred,
//! and treats a zero-length read or write as the peer going away.
//!
//! Any failure is terminal: the connection flips to "not connected" and
//! every later call returns [`TransportError::NotConnected`]. There are
//! no retries at this layer.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use infoserve_protocol::{
    decode_frame_size, encode_frame_header, encode_refusal_header, RequestCode,
    FRAME_HEADER_LEN, REQUEST_CODE_LEN,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

use crate::{ConnectionId, Endpoint, TransportError};

/// Largest single read while receiving a frame into memory.
const FRAME_READ_CHUNK: usize = 64 * 1024;

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> ConnectionId {
    ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// One connected stream.
///
/// `S` is normally a [`TcpStream`]; any `AsyncRead + AsyncWrite` stream
/// works, which is how tests drive the accumulation loops through
/// tiny pipes.
///
/// A `Connection` is not internally synchronized. All calls take
/// `&mut self`, so the borrow checker already forbids a `close()` racing
/// an in-flight send on the same value.
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    id: ConnectionId,
    stream: Option<S>,
    peer: Option<SocketAddr>,
    connected: bool,
    io_timeout: Option<Duration>,
}

impl Connection<TcpStream> {
    /// Resolves `endpoint` and opens a stream to the first address that
    /// accepts.
    ///
    /// # Errors
    /// [`TransportError::Resolve`] if the host cannot be resolved, or
    /// [`TransportError::ConnectFailed`] carrying the last connect error.
    pub async fn open(
        endpoint: &Endpoint,
        io_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let mut last_err = None;
        for addr in endpoint.resolve().await? {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let conn = Self::accepted(stream, addr)
                        .with_io_timeout(io_timeout);
                    tracing::debug!(
                        conn = %conn.id, %endpoint, %addr, "connection opened"
                    );
                    return Ok(conn);
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(TransportError::ConnectFailed {
            endpoint: endpoint.to_string(),
            source: last_err.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "no addresses")
            }),
        })
    }

    /// Wraps a stream handed out by a listener.
    pub fn accepted(stream: TcpStream, peer: SocketAddr) -> Self {
        // Request codes are 4 bytes; don't let Nagle sit on them.
        stream.set_nodelay(true).ok();
        let mut conn = Self::from_stream(stream);
        conn.peer = Some(peer);
        conn
    }

    /// Polls whether a read on this connection would make progress.
    ///
    /// Pending input, an orderly close by the peer, and a socket error all
    /// count as readable: in each case the next read returns immediately.
    /// A closed connection is reported readable too, so that whoever
    /// polls it finds out on the next read.
    pub fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<()> {
        let Some(stream) = self.stream.as_ref().filter(|_| self.connected)
        else {
            return Poll::Ready(());
        };
        let mut peek_byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut peek_byte);
        match stream.poll_peek(cx, &mut buf) {
            Poll::Ready(_) => Poll::Ready(()),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already connected stream.
    pub fn from_stream(stream: S) -> Self {
        Self {
            id: next_id(),
            stream: Some(stream),
            peer: None,
            connected: true,
            io_timeout: None,
        }
    }

    /// Sets a deadline applied to each send or receive call.
    ///
    /// Expiry is reported as [`TransportError::TimedOut`] and is terminal,
    /// exactly like the peer disconnecting.
    pub fn with_io_timeout(mut self, io_timeout: Option<Duration>) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Returns the unique identifier for this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Address of the remote peer, when known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// `false` once the connection has failed or been closed.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Sends a 4-byte request code.
    pub async fn send_request(
        &mut self,
        code: RequestCode,
    ) -> Result<(), TransportError> {
        self.send_bytes(&code.to_bytes()).await
    }

    /// Receives exactly one 4-byte request code.
    pub async fn receive_request(
        &mut self,
    ) -> Result<RequestCode, TransportError> {
        let mut buf = [0u8; REQUEST_CODE_LEN];
        self.receive_into(&mut buf).await?;
        Ok(RequestCode::from_bytes(buf))
    }

    /// Writes all of `data`, accumulating short writes.
    pub async fn send_bytes(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let io_timeout = self.io_timeout;
        let stream = self.stream_mut()?;
        let result = with_deadline(io_timeout, write_fully(stream, data)).await;
        self.settle(result)
    }

    /// Reads exactly `n` bytes.
    pub async fn receive_exact(
        &mut self,
        n: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; n];
        self.receive_into(&mut buf).await?;
        Ok(buf)
    }

    /// Fills `buf` completely, accumulating partial reads.
    pub async fn receive_into(
        &mut self,
        buf: &mut [u8],
    ) -> Result<(), TransportError> {
        let io_timeout = self.io_timeout;
        let stream = self.stream_mut()?;
        let result = with_deadline(io_timeout, read_fully(stream, buf)).await;
        self.settle(result)
    }

    /// Performs a single read into `buf` and returns how many bytes
    /// arrived, which may be fewer than `buf.len()` but never zero.
    pub async fn receive_some(
        &mut self,
        buf: &mut [u8],
    ) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let io_timeout = self.io_timeout;
        let expected = buf.len();
        let stream = self.stream_mut()?;
        let read = async {
            match stream.read(buf).await {
                Ok(0) => Err(TransportError::PeerClosed {
                    expected,
                    received: 0,
                }),
                Ok(n) => Ok(n),
                Err(e) => Err(TransportError::ReceiveFailed(e)),
            }
        };
        let result = with_deadline(io_timeout, read).await;
        self.settle(result)
    }

    /// Sends a frame header announcing `len` payload bytes.
    pub async fn send_frame_header(
        &mut self,
        len: usize,
    ) -> Result<(), TransportError> {
        let header = encode_frame_header(len)?;
        self.send_bytes(&header).await
    }

    /// Tells the peer that the frame it asked for will not come.
    ///
    /// The connection stays usable on this side; the peer rejects the
    /// header and gives up on the transfer.
    pub async fn send_refusal(&mut self) -> Result<(), TransportError> {
        self.send_bytes(&encode_refusal_header()).await
    }

    /// Receives a frame header and returns the announced payload size.
    ///
    /// A negative or over-limit size poisons the connection: the bytes
    /// that follow cannot be interpreted any more.
    pub async fn receive_frame_header(
        &mut self,
        limit: usize,
    ) -> Result<usize, TransportError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        self.receive_into(&mut header).await?;
        let result =
            decode_frame_size(header, limit).map_err(TransportError::from);
        self.settle(result)
    }

    /// Sends a complete frame held in memory.
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.send_frame_header(payload.len()).await?;
        self.send_bytes(payload).await
    }

    /// Receives a complete frame into memory.
    ///
    /// The buffer grows as payload arrives, so a header announcing a huge
    /// frame costs nothing until the bytes actually show up.
    pub async fn receive_frame(
        &mut self,
        limit: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let size = self.receive_frame_header(limit).await?;
        let mut payload = Vec::with_capacity(size.min(FRAME_READ_CHUNK));
        let mut chunk = vec![0u8; size.min(FRAME_READ_CHUNK)];
        while payload.len() < size {
            let want = chunk.len().min(size - payload.len());
            let n = self.receive_some(&mut chunk[..want]).await?;
            payload.extend_from_slice(&chunk[..n]);
        }
        Ok(payload)
    }

    /// Closes the connection. Calling it again does nothing.
    pub async fn close(&mut self) {
        self.connected = false;
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::trace!(conn = %self.id, error = %e, "shutdown failed");
            }
            tracing::debug!(conn = %self.id, "connection closed");
        }
    }

    fn stream_mut(&mut self) -> Result<&mut S, TransportError> {
        match self.stream.as_mut() {
            Some(stream) if self.connected => Ok(stream),
            _ => Err(TransportError::NotConnected),
        }
    }

    /// Records a failed operation as the end of this connection.
    fn settle<T>(
        &mut self,
        result: Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        if let Err(e) = &result {
            tracing::debug!(conn = %self.id, error = %e, "connection failed");
            self.connected = false;
        }
        result
    }
}

async fn with_deadline<T>(
    io_timeout: Option<Duration>,
    op: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    match io_timeout {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .map_err(|_| TransportError::TimedOut(limit))?,
        None => op.await,
    }
}

async fn write_fully<W>(writer: &mut W, data: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while written < data.len() {
        let n = writer
            .write(&data[written..])
            .await
            .map_err(TransportError::SendFailed)?;
        if n == 0 {
            return Err(TransportError::SendFailed(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("stream accepted {written} of {} bytes", data.len()),
            )));
        }
        written += n;
    }
    writer.flush().await.map_err(TransportError::SendFailed)
}

async fn read_fully<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(TransportError::ReceiveFailed)?;
        if n == 0 {
            return Err(TransportError::PeerClosed {
                expected: buf.len(),
                received: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use infoserve_protocol::MAX_FRAME_SIZE;

    #[test]
    fn test_ids_are_unique() {
        let (a, b) = tokio::io::duplex(8);
        let a = Connection::from_stream(a);
        let b = Connection::from_stream(b);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let (a, b) = tokio::io::duplex(64);
        let mut client = Connection::from_stream(a);
        let mut server = Connection::from_stream(b);

        client.send_request(RequestCode::Unknown(99)).await.unwrap();
        client.send_request(RequestCode::FetchInfo).await.unwrap();
        assert_eq!(
            server.receive_request().await.unwrap(),
            RequestCode::Unknown(99)
        );
        assert_eq!(
            server.receive_request().await.unwrap(),
            RequestCode::FetchInfo
        );
    }

    #[tokio::test]
    async fn test_peer_close_mid_read_marks_disconnected() {
        let (a, b) = tokio::io::duplex(64);
        let mut writer = Connection::from_stream(a);
        let mut reader = Connection::from_stream(b);

        writer.send_bytes(&[1, 2]).await.unwrap();
        writer.close().await;

        let err = reader.receive_exact(4).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::PeerClosed {
                expected: 4,
                received: 2
            }
        ));
        assert!(!reader.is_connected());
        assert!(matches!(
            reader.receive_request().await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (a, _b) = tokio::io::duplex(8);
        let mut conn = Connection::from_stream(a);
        conn.close().await;
        conn.close().await;
        assert!(!conn.is_connected());
        assert!(matches!(
            conn.send_bytes(b"x").await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_negative_frame_header_poisons_connection() {
        let (a, b) = tokio::io::duplex(64);
        let mut writer = Connection::from_stream(a);
        let mut reader = Connection::from_stream(b);

        writer.send_bytes(&(-1i32).to_le_bytes()).await.unwrap();
        let err = reader.receive_frame_header(MAX_FRAME_SIZE).await.unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
        assert!(!reader.is_connected());
    }

    #[tokio::test]
    async fn test_receive_deadline_is_terminal() {
        let (a, _b) = tokio::io::duplex(8);
        let mut conn = Connection::from_stream(a)
            .with_io_timeout(Some(Duration::from_millis(20)));
        let err = conn.receive_request().await.unwrap_err();
        assert!(matches!(err, TransportError::TimedOut(_)));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_huge_announced_frame_fails_on_close_without_waiting() {
        let (a, b) = tokio::io::duplex(64);
        let mut writer = Connection::from_stream(a);
        let mut reader = Connection::from_stream(b);

        writer.send_frame_header(MAX_FRAME_SIZE).await.unwrap();
        writer.send_bytes(b"tiny").await.unwrap();
        writer.close().await;

        let err = reader.receive_frame(MAX_FRAME_SIZE).await.unwrap_err();
        assert!(matches!(err, TransportError::PeerClosed { .. }));
        assert!(!reader.is_connected());
    }

    #[tokio::test]
    async fn test_refusal_keeps_sender_connected() {
        let (a, b) = tokio::io::duplex(64);
        let mut sender = Connection::from_stream(a);
        let mut receiver = Connection::from_stream(b);

        sender.send_refusal().await.unwrap();
        assert!(sender.is_connected());
        let err = receiver.receive_frame(MAX_FRAME_SIZE).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(infoserve_protocol::ProtocolError::NegativeFrameSize(-1))
        ));
    }
}
