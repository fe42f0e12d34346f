use crate::error::{ProtocolError, Result};
use crate::peer::{PeerConnection, PeerMessage};
use crate::piece::PieceStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Pause after a failed accept (e.g. descriptor exhaustion) before retrying
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Serves verified pieces to inbound peers.
///
/// Owns the listening socket. Each accepted connection gets its own task;
/// a failure there ends that connection only.
pub struct UploadServer {
    listener: TcpListener,
    store: Arc<PieceStore>,
}

impl UploadServer {
    pub async fn bind(addr: SocketAddr, store: Arc<PieceStore>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Upload server listening on {}", listener.local_addr()?);
        Ok(Self { listener, store })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever
    pub async fn run(self) {
        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            debug!("Accepted connection from {}", addr);
            let store = self.store.clone();

            tokio::spawn(async move {
                // Inbound peers only send requests, so no payload is ever accepted
                let conn = PeerConnection::new(addr, stream, 0);
                match serve_connection(conn, &store).await {
                    Ok(served) => debug!("{} disconnected after {} requests", addr, served),
                    Err(e) => warn!("Closing upload connection to {}: {}", addr, e),
                }
            });
        }
    }
}

/// Answer requests on one connection until the peer hangs up.
/// Returns the number of requests served.
pub async fn serve_connection<S>(mut conn: PeerConnection<S>, store: &PieceStore) -> Result<usize>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut served = 0;

    while let Some(message) = conn.receive_message().await? {
        let piece_index = match message {
            PeerMessage::Request { piece_index } => piece_index,
            other => {
                return Err(ProtocolError::Unexpected(format!(
                    "peer sent a response for piece {} instead of a request",
                    other.piece_index()
                ))
                .into())
            }
        };

        let response = match store.read_verified(piece_index as usize) {
            Some(data) => {
                debug!("Uploading piece {} to {}", piece_index, conn.addr());
                PeerMessage::Piece { piece_index, data }
            }
            None => {
                debug!("Piece {} not available for {}", piece_index, conn.addr());
                PeerMessage::NotFound { piece_index }
            }
        };

        conn.send_message(&response).await?;
        served += 1;
    }

    conn.shutdown().await;
    Ok(served)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::TorrentDescriptor;
    use bytes::Bytes;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    const CONTENT: &[u8] = b"abcdefghij";
    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn spawn_server(store: PieceStore) -> SocketAddr {
        let server = UploadServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(store))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    fn seeded_store() -> PieceStore {
        PieceStore::from_existing(&TorrentDescriptor::for_content(CONTENT, 4), CONTENT)
    }

    #[tokio::test]
    async fn test_serves_pieces_over_reused_connection() {
        let addr = spawn_server(seeded_store()).await;
        let mut conn = PeerConnection::connect(addr, 4, TIMEOUT).await.unwrap();

        for (index, chunk) in CONTENT.chunks(4).enumerate() {
            let response = conn.request_piece(index as u32, TIMEOUT).await.unwrap();
            assert_eq!(
                response,
                PeerMessage::Piece {
                    piece_index: index as u32,
                    data: Bytes::copy_from_slice(chunk),
                }
            );
        }
    }

    #[tokio::test]
    async fn test_out_of_range_index_is_not_found() {
        let addr = spawn_server(seeded_store()).await;
        let mut conn = PeerConnection::connect(addr, 4, TIMEOUT).await.unwrap();

        for index in [3, 1000, u32::MAX] {
            let response = conn.request_piece(index, TIMEOUT).await.unwrap();
            assert_eq!(response, PeerMessage::NotFound { piece_index: index });
        }
    }

    #[tokio::test]
    async fn test_missing_piece_is_not_found() {
        let descriptor = TorrentDescriptor::for_content(CONTENT, 4);
        let store = PieceStore::new(&descriptor);
        assert!(store.try_claim(1, "me"));
        store.commit(1, b"efgh").unwrap();
        let addr = spawn_server(store).await;

        let mut conn = PeerConnection::connect(addr, 4, TIMEOUT).await.unwrap();
        assert_eq!(
            conn.request_piece(0, TIMEOUT).await.unwrap(),
            PeerMessage::NotFound { piece_index: 0 }
        );
        assert!(matches!(
            conn.request_piece(1, TIMEOUT).await.unwrap(),
            PeerMessage::Piece { piece_index: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_malformed_connection_does_not_affect_others() {
        let addr = spawn_server(seeded_store()).await;

        let mut bad = TcpStream::connect(addr).await.unwrap();
        bad.write_all(&[0x7f, 1, 2, 3, 4]).await.unwrap();

        let mut truncated = TcpStream::connect(addr).await.unwrap();
        truncated.write_all(&[0x01, 0]).await.unwrap();
        drop(truncated);

        let mut good = PeerConnection::connect(addr, 4, TIMEOUT).await.unwrap();
        assert!(matches!(
            good.request_piece(2, TIMEOUT).await.unwrap(),
            PeerMessage::Piece { piece_index: 2, .. }
        ));

        // the server hung up on the bad peer
        let mut bad = PeerConnection::new(addr, bad, 4);
        let closed = tokio::time::timeout(TIMEOUT, bad.receive_message()).await.unwrap();
        assert!(matches!(closed, Ok(None) | Err(_)));
    }

    #[tokio::test]
    async fn test_serve_connection_counts_requests() {
        let store = seeded_store();
        let mut input = Vec::new();
        input.extend(PeerMessage::Request { piece_index: 0 }.to_bytes());
        input.extend(PeerMessage::Request { piece_index: 9 }.to_bytes());

        let mut expected = Vec::new();
        expected.extend(
            PeerMessage::Piece {
                piece_index: 0,
                data: Bytes::from_static(b"abcd"),
            }
            .to_bytes(),
        );
        expected.extend(PeerMessage::NotFound { piece_index: 9 }.to_bytes());

        let stream = tokio_test::io::Builder::new()
            .read(&input)
            .write(&expected)
            .build();
        let conn = PeerConnection::new("127.0.0.1:1".parse().unwrap(), stream, 0);
        assert_eq!(serve_connection(conn, &store).await.unwrap(), 2);
    }
}
