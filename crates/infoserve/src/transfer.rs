//! Bulk file transfer over a [`Connection`].
//!
//! Sending: the file length goes out as a frame header, then the
//! contents follow in fixed-size chunks, one `send_bytes` per chunk.
//!
//! Receiving: the header is validated against a limit, then reads of at
//! most `min(chunk, remaining)` bytes are appended to the output until
//! the advertised size has arrived. Never reading past the advertised
//! size keeps any bytes that follow on the stream intact.

use std::path::Path;

use infoserve_protocol::{ProtocolError, MAX_FRAME_SIZE};
use infoserve_transport::Connection;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::InfoserveError;

/// Streams the file at `path` to `connection` as one frame.
///
/// If the file cannot be opened or is too large for a frame, a refusal
/// header goes out instead so the peer stops waiting. If the file shrinks
/// after the header has gone out, the connection is closed: the peer is
/// waiting for bytes that will never come.
///
/// Returns the number of payload bytes sent.
pub(crate) async fn send_file<S>(
    connection: &mut Connection<S>,
    path: &Path,
    chunk_size: usize,
) -> Result<u64, InfoserveError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let file_err = |source| InfoserveError::File {
        path: path.to_path_buf(),
        source,
    };
    let (mut file, size) = match open_for_sending(path).await {
        Ok(opened) => opened,
        Err(e) => {
            if let Err(refusal) = connection.send_refusal().await {
                debug!(conn = %connection.id(), error = %refusal, "refusal not delivered");
            }
            return Err(e);
        }
    };

    connection.send_frame_header(size).await?;

    let mut buf = vec![0u8; chunk_size.clamp(1, size.max(1))];
    let mut sent = 0;
    while sent < size {
        let want = buf.len().min(size - sent);
        let n = match file.read(&mut buf[..want]).await {
            Ok(0) => {
                connection.close().await;
                return Err(InfoserveError::FileTruncated {
                    path: path.to_path_buf(),
                    expected: size,
                    sent,
                });
            }
            Ok(n) => n,
            Err(source) => {
                connection.close().await;
                return Err(file_err(source));
            }
        };
        connection.send_bytes(&buf[..n]).await?;
        sent += n;
        trace!(conn = %connection.id(), sent, size, "chunk sent");
    }

    debug!(conn = %connection.id(), bytes = size, path = %path.display(), "file sent");
    Ok(size as u64)
}

async fn open_for_sending(path: &Path) -> Result<(File, usize), InfoserveError> {
    let file_err = |source| InfoserveError::File {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).await.map_err(file_err)?;
    let len = file.metadata().await.map_err(file_err)?.len();
    let size = usize::try_from(len)
        .ok()
        .filter(|size| *size <= MAX_FRAME_SIZE)
        .ok_or(ProtocolError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_SIZE as u64,
        })?;
    Ok((file, size))
}

/// Receives one frame from `connection` and writes its payload to
/// `writer`. Returns the number of payload bytes received.
///
/// A failed write closes the connection, since the rest of the payload
/// is left unread on the stream.
pub(crate) async fn receive_into<S, W>(
    connection: &mut Connection<S>,
    writer: &mut W,
    chunk_size: usize,
    limit: usize,
) -> Result<u64, InfoserveError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    let size = connection.receive_frame_header(limit).await?;
    debug!(conn = %connection.id(), size, "receiving file");

    let mut buf = vec![0u8; chunk_size.clamp(1, size.max(1))];
    let mut received = 0;
    while received < size {
        let want = buf.len().min(size - received);
        let n = connection.receive_some(&mut buf[..want]).await?;
        if let Err(e) = writer.write_all(&buf[..n]).await {
            connection.close().await;
            return Err(InfoserveError::Output(e));
        }
        received += n;
        trace!(conn = %connection.id(), received, size, "chunk received");
    }
    if let Err(e) = writer.flush().await {
        connection.close().await;
        return Err(InfoserveError::Output(e));
    }

    Ok(received as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use infoserve_protocol::encode_frame;
    use infoserve_transport::TransportError;
    use rand::Rng;
    use std::path::PathBuf;

    fn temp_file(tag: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "infoserve-transfer-{tag}-{}",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_send_file_through_tiny_pipe_with_tiny_chunks() {
        let mut rng = rand::rng();
        let contents: Vec<u8> = (0..5000).map(|_| rng.random()).collect();
        let path = temp_file("tiny", &contents);

        let (a, b) = tokio::io::duplex(7);
        let mut server = Connection::from_stream(a);
        let mut client = Connection::from_stream(b);

        let send_path = path.clone();
        let sender = tokio::spawn(async move {
            send_file(&mut server, &send_path, 64).await.unwrap()
        });

        let mut out = Vec::new();
        let got = receive_into(&mut client, &mut out, 13, MAX_FRAME_SIZE)
            .await
            .unwrap();

        assert_eq!(sender.await.unwrap(), 5000);
        assert_eq!(got, 5000);
        assert_eq!(out, contents);
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_receive_stops_at_frame_boundary() {
        let (a, b) = tokio::io::duplex(1024);
        let mut server = Connection::from_stream(a);
        let mut client = Connection::from_stream(b);

        let mut wire = encode_frame(b"0123456789").unwrap();
        wire.extend_from_slice(&7i32.to_le_bytes());
        server.send_bytes(&wire).await.unwrap();

        let mut out = Vec::new();
        receive_into(&mut client, &mut out, 1024, MAX_FRAME_SIZE)
            .await
            .unwrap();
        assert_eq!(out, b"0123456789");
        // The trailing 4 bytes are still on the stream.
        assert_eq!(client.receive_exact(4).await.unwrap(), 7i32.to_le_bytes());
    }

    #[tokio::test]
    async fn test_receive_rejects_size_above_limit() {
        let (a, b) = tokio::io::duplex(64);
        let mut server = Connection::from_stream(a);
        let mut client = Connection::from_stream(b);
        server.send_frame_header(100).await.unwrap();

        let mut out = Vec::new();
        let err = receive_into(&mut client, &mut out, 16, 99)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InfoserveError::Transport(TransportError::Protocol(
                ProtocolError::FrameTooLarge { .. }
            ))
        ));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_receive_fails_when_peer_closes_early() {
        let (a, b) = tokio::io::duplex(64);
        let mut server = Connection::from_stream(a);
        let mut client = Connection::from_stream(b);
        server.send_frame_header(10).await.unwrap();
        server.send_bytes(b"abc").await.unwrap();
        server.close().await;

        let mut out = Vec::new();
        let err = receive_into(&mut client, &mut out, 4, MAX_FRAME_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InfoserveError::Transport(TransportError::PeerClosed { .. })
        ));
        assert_eq!(out, b"abc");
    }

    #[tokio::test]
    async fn test_send_missing_file_sends_refusal() {
        let (a, b) = tokio::io::duplex(64);
        let mut server = Connection::from_stream(a);
        let mut client = Connection::from_stream(b);
        let err = send_file(&mut server, Path::new("/no/such/info.xml"), 64)
            .await
            .unwrap_err();
        assert!(matches!(err, InfoserveError::File { .. }));
        assert!(server.is_connected());

        let err = client.receive_frame_header(MAX_FRAME_SIZE).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::NegativeFrameSize(-1))
        ));
    }
}
