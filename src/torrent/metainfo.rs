use super::PieceHash;
use crate::error::{Result, TorrentError};
use serde::Deserialize;

/// On-disk JSON layout of a torrent descriptor
#[derive(Debug, Deserialize)]
struct RawDescriptor {
    torrent_id: String,
    tracker_url: String,
    #[serde(default)]
    file_name: Option<String>,
    file_size: u64,
    piece_size: u64,
    pieces: Vec<String>,
}

/// Validated torrent descriptor. Read-only after load.
#[derive(Debug, Clone)]
pub struct TorrentDescriptor {
    /// Identifier the tracker groups peers by
    pub torrent_id: String,
    /// Tracker announce URL
    pub tracker_url: String,
    /// Name of the file to download into / seed from
    pub file_name: String,
    /// Total file length in bytes
    pub file_size: u64,
    /// Nominal piece length; the final piece may be shorter
    pub piece_size: u64,
    /// One digest per piece, indexed by piece number
    pub piece_hashes: Vec<PieceHash>,
}

impl TorrentDescriptor {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let raw: RawDescriptor = serde_json::from_slice(data)
            .map_err(|e| TorrentError::InvalidTorrent(e.to_string()))?;

        if raw.piece_size == 0 {
            return Err(TorrentError::InvalidTorrent(
                "'piece_size' must be positive".to_string(),
            ));
        }
        if raw.file_size == 0 {
            return Err(TorrentError::InvalidTorrent(
                "'file_size' must be positive".to_string(),
            ));
        }
        if raw.piece_size > u32::MAX as u64 {
            return Err(TorrentError::InvalidTorrent(
                "'piece_size' does not fit the wire format".to_string(),
            ));
        }

        let piece_hashes = raw
            .pieces
            .iter()
            .map(|h| PieceHash::from_hex(h))
            .collect::<Result<Vec<_>>>()?;

        let expected = raw.file_size.div_ceil(raw.piece_size) as usize;
        if piece_hashes.len() != expected {
            return Err(TorrentError::InvalidTorrent(format!(
                "expected {} piece hashes for {} bytes at {} bytes per piece, found {}",
                expected,
                raw.file_size,
                raw.piece_size,
                piece_hashes.len()
            )));
        }

        let file_name = raw.file_name.unwrap_or_else(|| raw.torrent_id.clone());

        Ok(Self {
            torrent_id: raw.torrent_id,
            tracker_url: raw.tracker_url,
            file_name,
            file_size: raw.file_size,
            piece_size: raw.piece_size,
            piece_hashes,
        })
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Byte offset of a piece within the file
    pub fn piece_offset(&self, index: usize) -> u64 {
        index as u64 * self.piece_size
    }

    /// Length of a piece (last piece might be smaller)
    pub fn piece_len(&self, index: usize) -> u64 {
        if index + 1 == self.piece_count() {
            let remainder = self.file_size % self.piece_size;
            if remainder == 0 {
                self.piece_size
            } else {
                remainder
            }
        } else {
            self.piece_size
        }
    }

    /// Build a descriptor for in-memory content. Used to seed test swarms.
    #[cfg(test)]
    pub fn for_content(content: &[u8], piece_size: u64) -> Self {
        let piece_hashes = content
            .chunks(piece_size as usize)
            .map(PieceHash::digest)
            .collect();
        Self {
            torrent_id: "test-torrent".to_string(),
            tracker_url: "http://127.0.0.1:1/announce".to_string(),
            file_name: "test.bin".to_string(),
            file_size: content.len() as u64,
            piece_size,
            piece_hashes,
        }
    }
}
