use super::PeerMessage;
use crate::error::{ProtocolError, Result, TorrentError};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// A live stream to a peer plus the read buffer used to reassemble frames.
///
/// Owned by exactly one serving or requesting task. Dropping it closes the
/// socket, so every exit path of the owning task releases it.
pub struct PeerConnection<S = TcpStream> {
    addr: SocketAddr,
    stream: S,
    buffer: BytesMut,
    max_payload: u32,
}

impl PeerConnection<TcpStream> {
    /// Open an outbound connection
    pub async fn connect(addr: SocketAddr, max_payload: u32, timeout: Duration) -> Result<Self> {
        debug!("Connecting to peer: {}", addr);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TorrentError::Transport(format!("connect to {} timed out", addr)))?
            .map_err(|e| TorrentError::Transport(format!("failed to connect to {}: {}", addr, e)))?;

        // Requests are tiny and latency bound
        stream.set_nodelay(true)?;

        info!("Connected to peer: {}", addr);
        Ok(Self::new(addr, stream, max_payload))
    }
}

impl<S> PeerConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(addr: SocketAddr, stream: S, max_payload: u32) -> Self {
        Self {
            addr,
            stream,
            buffer: BytesMut::with_capacity(4096),
            max_payload,
        }
    }

    /// Send a message to the peer
    pub async fn send_message(&mut self, message: &PeerMessage) -> Result<()> {
        let frame = message.to_bytes();

        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| self.transport_error("write", e))?;

        debug!(
            "Sent message to {}: type={} piece={}",
            self.addr,
            frame[0],
            message.piece_index()
        );
        Ok(())
    }

    /// Receive the next message from the peer.
    ///
    /// `Ok(None)` means the peer closed the stream cleanly between messages.
    /// A close in the middle of a frame is `ProtocolError::Truncated`.
    pub async fn receive_message(&mut self) -> Result<Option<PeerMessage>> {
        loop {
            if let Some(message) = PeerMessage::decode(&mut self.buffer, self.max_payload)? {
                debug!(
                    "Received message from {}: piece={}",
                    self.addr,
                    message.piece_index()
                );
                return Ok(Some(message));
            }

            let read = self
                .stream
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| self.transport_error("read", e))?;

            if read == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::Truncated.into());
            }
        }
    }

    /// Send a `Request` and wait for its response, bounded by `timeout`
    pub async fn request_piece(&mut self, piece_index: u32, timeout: Duration) -> Result<PeerMessage> {
        let addr = self.addr;
        self.send_message(&PeerMessage::Request { piece_index }).await?;

        let response = tokio::time::timeout(timeout, self.receive_message())
            .await
            .map_err(|_| {
                TorrentError::Transport(format!(
                    "{} did not answer request for piece {} within {:?}",
                    addr, piece_index, timeout
                ))
            })??;

        match response {
            None => Err(ProtocolError::Truncated.into()),
            Some(PeerMessage::Request { .. }) => Err(ProtocolError::Unexpected(
                "request received while awaiting a response".to_string(),
            )
            .into()),
            Some(message) if message.piece_index() != piece_index => {
                Err(ProtocolError::Unexpected(format!(
                    "asked for piece {}, got response for piece {}",
                    piece_index,
                    message.piece_index()
                ))
                .into())
            }
            Some(message) => Ok(message),
        }
    }

    /// Flush and close the write half
    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn transport_error(&self, op: &str, err: std::io::Error) -> TorrentError {
        TorrentError::Transport(format!("{} {} failed: {}", op, self.addr, err))
    }
}
