use super::PieceStatus;
use crate::error::{Result, TorrentError};
use crate::torrent::TorrentDescriptor;
use bytes::Bytes;
use parking_lot::Mutex;
use std::ops::Range;
use std::time::{Duration, Instant};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Shared record of which pieces are held, their content, and which are wanted.
///
/// Every status transition happens under one short-lived lock. No I/O and no
/// hashing is performed while it is held. Releases, reclaims and commits wake
/// the tasks waiting in [`PieceStore::changed`].
pub struct PieceStore {
    descriptor: TorrentDescriptor,
    inner: Mutex<Inner>,
    changed: Notify,
}

struct Inner {
    statuses: Vec<PieceStatus>,
    /// Backing file buffer, pre-allocated to `file_size`
    data: Vec<u8>,
    verified: usize,
}

impl PieceStore {
    /// Create a store with every piece missing
    pub fn new(descriptor: &TorrentDescriptor) -> Self {
        Self {
            descriptor: descriptor.clone(),
            inner: Mutex::new(Inner {
                statuses: vec![PieceStatus::Missing; descriptor.piece_count()],
                data: vec![0u8; descriptor.file_size as usize],
                verified: 0,
            }),
            changed: Notify::new(),
        }
    }

    /// Create a store from a local copy of the file, marking every piece whose
    /// content checks out as verified
    pub fn from_existing(descriptor: &TorrentDescriptor, content: &[u8]) -> Self {
        let store = Self::new(descriptor);
        if content.len() as u64 != descriptor.file_size {
            warn!(
                "Local copy is {} bytes, expected {}; ignoring it",
                content.len(),
                descriptor.file_size
            );
            return store;
        }

        let intact: Vec<usize> = (0..store.piece_count())
            .filter(|&index| {
                descriptor.piece_hashes[index].matches(&content[store.piece_range(index)])
            })
            .collect();

        let mut inner = store.inner.lock();
        for &index in &intact {
            let range = store.piece_range(index);
            inner.data[range.clone()].copy_from_slice(&content[range]);
            inner.statuses[index] = PieceStatus::Verified;
        }
        inner.verified = intact.len();
        drop(inner);

        info!(
            "Local copy holds {}/{} verified pieces",
            intact.len(),
            store.piece_count()
        );
        store
    }

    pub fn piece_count(&self) -> usize {
        self.descriptor.piece_count()
    }

    fn piece_range(&self, index: usize) -> Range<usize> {
        let start = self.descriptor.piece_offset(index) as usize;
        start..start + self.descriptor.piece_len(index) as usize
    }

    /// Completes on the next release, reclaim or commit.
    ///
    /// Create the future before inspecting the store, so a change that lands
    /// in between still wakes it.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// Atomically move a missing piece to in-flight for `owner`.
    ///
    /// Returns false if the piece is already in flight, verified, or out of range.
    pub fn try_claim(&self, index: usize, owner: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.statuses.get_mut(index) {
            Some(status) if *status == PieceStatus::Missing => {
                *status = PieceStatus::InFlight {
                    owner: owner.to_string(),
                    since: Instant::now(),
                };
                debug!("Piece {} claimed by {}", index, owner);
                true
            }
            _ => false,
        }
    }

    /// Give back a claim after a failed download.
    ///
    /// Only a claim still held by `owner` is reverted; a verified piece or a
    /// piece reclaimed by someone else is left alone. Returns whether a claim
    /// was released.
    pub fn release(&self, index: usize, owner: &str) -> bool {
        let mut inner = self.inner.lock();
        let held_by_owner = matches!(
            inner.statuses.get(index),
            Some(PieceStatus::InFlight { owner: holder, .. }) if holder == owner
        );
        if held_by_owner {
            inner.statuses[index] = PieceStatus::Missing;
            drop(inner);
            debug!("Piece {} released by {}", index, owner);
            self.changed.notify_waiters();
        }
        held_by_owner
    }

    /// Verify `data` against the piece hash and store it.
    ///
    /// On mismatch the piece status is left untouched, so the claimant can
    /// release it for another attempt. Committing an already verified piece
    /// is a no-op.
    pub fn commit(&self, index: usize, data: &[u8]) -> Result<()> {
        let Some(hash) = self.descriptor.piece_hashes.get(index) else {
            return Err(TorrentError::Integrity { index });
        };

        let range = self.piece_range(index);
        if data.len() != range.len() || !hash.matches(data) {
            warn!("Piece {} failed verification ({} bytes)", index, data.len());
            return Err(TorrentError::Integrity { index });
        }

        let mut inner = self.inner.lock();
        if inner.statuses[index].is_verified() {
            debug!("Piece {} already verified", index);
            return Ok(());
        }

        inner.data[range].copy_from_slice(data);
        inner.statuses[index] = PieceStatus::Verified;
        inner.verified += 1;
        drop(inner);

        debug!("Piece {} verified and stored", index);
        self.changed.notify_waiters();
        Ok(())
    }

    /// Content of a verified piece, or `None` if it is not (yet) held
    pub fn read_verified(&self, index: usize) -> Option<Bytes> {
        let inner = self.inner.lock();
        if !inner.statuses.get(index)?.is_verified() {
            return None;
        }
        Some(Bytes::copy_from_slice(&inner.data[self.piece_range(index)]))
    }

    /// Revert claims older than `timeout` so stalled downloads can be retried
    pub fn reclaim_stalled(&self, timeout: Duration) -> Vec<usize> {
        let mut inner = self.inner.lock();
        let mut reclaimed = Vec::new();

        for (index, status) in inner.statuses.iter_mut().enumerate() {
            let stalled = match &*status {
                PieceStatus::InFlight { owner, since } if since.elapsed() >= timeout => {
                    warn!("Reclaiming piece {} stalled at {}", index, owner);
                    true
                }
                _ => false,
            };
            if stalled {
                *status = PieceStatus::Missing;
                reclaimed.push(index);
            }
        }
        drop(inner);

        if !reclaimed.is_empty() {
            self.changed.notify_waiters();
        }
        reclaimed
    }

    /// Indices of missing pieces in ascending order
    pub fn missing_pieces(&self) -> Vec<usize> {
        self.inner
            .lock()
            .statuses
            .iter()
            .enumerate()
            .filter(|(_, status)| matches!(status, PieceStatus::Missing))
            .map(|(index, _)| index)
            .collect()
    }

    /// Indices of pieces not yet verified, whether missing or in flight
    pub fn unverified_pieces(&self) -> Vec<usize> {
        self.inner
            .lock()
            .statuses
            .iter()
            .enumerate()
            .filter(|(_, status)| !status.is_verified())
            .map(|(index, _)| index)
            .collect()
    }

    #[cfg(test)]
    pub fn status(&self, index: usize) -> Option<PieceStatus> {
        self.inner.lock().statuses.get(index).cloned()
    }

    pub fn verified_count(&self) -> usize {
        self.inner.lock().verified
    }

    pub fn is_complete(&self) -> bool {
        self.verified_count() == self.piece_count()
    }

    pub fn progress(&self) -> f64 {
        (self.verified_count() as f64 / self.piece_count() as f64) * 100.0
    }

    /// Copy of the whole file, available once every piece is verified
    pub fn snapshot(&self) -> Option<Vec<u8>> {
        let inner = self.inner.lock();
        (inner.verified == self.piece_count()).then(|| inner.data.clone())
    }
}
