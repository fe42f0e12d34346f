use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

/// Selects which pieces a peer's worker should try next.
///
/// Order is strictly ascending by index. Pieces that already failed with a
/// given peer (integrity mismatch or not found) are skipped for that peer
/// until its worker is restarted, so they get routed to a different peer.
#[derive(Debug, Default)]
pub struct PiecePicker {
    failed: HashMap<usize, HashSet<SocketAddr>>,
}

impl PiecePicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidate pieces for `peer` out of `pieces`, in the order given
    pub fn candidates(&self, peer: SocketAddr, pieces: &[usize]) -> Vec<usize> {
        pieces
            .iter()
            .copied()
            .filter(|index| !self.has_failed(*index, peer))
            .collect()
    }

    /// Mark a piece as failed with a peer (e.g., after failed verification)
    pub fn record_failure(&mut self, piece_index: usize, peer: SocketAddr) {
        self.failed.entry(piece_index).or_default().insert(peer);
    }

    pub fn has_failed(&self, piece_index: usize, peer: SocketAddr) -> bool {
        self.failed
            .get(&piece_index)
            .is_some_and(|peers| peers.contains(&peer))
    }

    /// Forget failures of a piece once it is verified
    pub fn mark_complete(&mut self, piece_index: usize) {
        self.failed.remove(&piece_index);
    }

    /// Give `peer` another chance at every piece it failed
    pub fn forget_peer(&mut self, peer: SocketAddr) {
        self.failed.retain(|_, peers| {
            peers.remove(&peer);
            !peers.is_empty()
        });
    }
}
