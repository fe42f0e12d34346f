use super::SchedulerConfig;
use crate::error::{ProtocolError, Result};
use crate::peer::{PeerConnection, PeerMessage};
use crate::piece::{PiecePicker, PieceStore};
use crate::tracker::Peer;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Exclusive claim on one piece. Dropping it releases the claim unless the
/// piece was verified in the meantime, so no exit path (error, timeout,
/// task abort) leaves a piece stuck in flight.
struct ClaimGuard {
    store: Arc<PieceStore>,
    index: usize,
    owner: String,
}

impl ClaimGuard {
    fn acquire(store: &Arc<PieceStore>, index: usize, owner: &str) -> Option<Self> {
        store.try_claim(index, owner).then(|| Self {
            store: store.clone(),
            index,
            owner: owner.to_string(),
        })
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.store.release(self.index, &self.owner);
    }
}

/// Downloads pieces from a single peer over one reused connection
pub struct PeerWorker {
    peer: Peer,
    owner: String,
    store: Arc<PieceStore>,
    picker: Arc<Mutex<PiecePicker>>,
    config: SchedulerConfig,
    conn: Option<PeerConnection>,
}

impl PeerWorker {
    pub fn new(
        peer: Peer,
        store: Arc<PieceStore>,
        picker: Arc<Mutex<PiecePicker>>,
        config: SchedulerConfig,
    ) -> Self {
        let owner = match &peer.peer_id {
            Some(id) => format!("{}@{}", id, peer.addr),
            None => peer.addr.to_string(),
        };
        Self {
            peer,
            owner,
            store,
            picker,
            config,
            conn: None,
        }
    }

    /// Fetch pieces until nothing is left that this peer may serve.
    /// Returns the number of pieces verified.
    ///
    /// While pieces this peer has not failed are in flight at other workers,
    /// the worker stays connected and waits for them to be released.
    pub async fn run(mut self) -> Result<usize> {
        self.picker.lock().forget_peer(self.peer.addr);
        let store = self.store.clone();
        let mut verified = 0;

        loop {
            // armed before looking, so a release in between still wakes us
            let changed = store.changed();
            let claim = match self.claim_next() {
                Some(claim) => claim,
                None if self.has_pending() => {
                    debug!("{} waiting for pieces held by other peers", self.peer.addr);
                    let _ = tokio::time::timeout(self.config.retry_interval, changed).await;
                    continue;
                }
                None => break,
            };
            drop(changed);
            let index = claim.index;

            match self.fetch(index).await {
                Ok(Some(data)) => match self.store.commit(index, &data) {
                    Ok(()) => {
                        self.picker.lock().mark_complete(index);
                        verified += 1;
                        info!(
                            "Piece {} downloaded from {} ({}/{})",
                            index,
                            self.peer.addr,
                            self.store.verified_count(),
                            self.store.piece_count()
                        );
                    }
                    Err(e) => {
                        warn!("Discarding piece {} from {}: {}", index, self.peer.addr, e);
                        self.picker.lock().record_failure(index, self.peer.addr);
                    }
                },
                Ok(None) => {
                    debug!("{} does not have piece {}", self.peer.addr, index);
                    self.picker.lock().record_failure(index, self.peer.addr);
                }
                Err(e) => {
                    // the claim guard releases the piece on the way out
                    self.conn = None;
                    return Err(e);
                }
            }
        }

        if let Some(conn) = self.conn.as_mut() {
            conn.shutdown().await;
        }
        Ok(verified)
    }

    /// Claim the lowest missing piece this peer has not already failed
    fn claim_next(&self) -> Option<ClaimGuard> {
        if self.store.is_complete() {
            return None;
        }

        let missing = self.store.missing_pieces();
        let candidates = self.picker.lock().candidates(self.peer.addr, &missing);

        // a failed claim means another worker owns the piece; try the next one
        candidates
            .into_iter()
            .find_map(|index| ClaimGuard::acquire(&self.store, index, &self.owner))
    }

    /// True while some unverified piece has not yet failed with this peer
    fn has_pending(&self) -> bool {
        let unverified = self.store.unverified_pieces();
        !self
            .picker
            .lock()
            .candidates(self.peer.addr, &unverified)
            .is_empty()
    }

    /// Request one piece. `Ok(None)` means the peer answered NotFound.
    async fn fetch(&mut self, index: usize) -> Result<Option<Bytes>> {
        let request_timeout = self.config.request_timeout;
        let conn = self.connection().await?;

        match conn.request_piece(index as u32, request_timeout).await? {
            PeerMessage::Piece { data, .. } => Ok(Some(data)),
            PeerMessage::NotFound { .. } => Ok(None),
            PeerMessage::Request { .. } => {
                Err(ProtocolError::Unexpected("request in place of a response".to_string()).into())
            }
        }
    }

    async fn connection(&mut self) -> Result<&mut PeerConnection> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                PeerConnection::connect(
                    self.peer.addr,
                    self.config.max_payload,
                    self.config.connect_timeout,
                )
                .await?
            }
        };
        Ok(self.conn.insert(conn))
    }
}
