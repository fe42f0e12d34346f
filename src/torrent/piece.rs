use crate::error::{Result, TorrentError};
use sha1::{Digest, Sha1};

/// A 20-byte SHA1 hash representing a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PieceHash([u8; 20]);

impl PieceHash {
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != 20 {
            return Err(TorrentError::InvalidTorrent(
                "Piece hash must be 20 bytes".to_string(),
            ));
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(slice);
        Ok(Self(hash))
    }

    /// Parse a hex-encoded hash as found in the descriptor
    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text.trim())?;
        Self::from_slice(&bytes)
    }

    /// Hash arbitrary piece content
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&hasher.finalize());
        Self(hash)
    }

    /// True when `data` hashes to this digest
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::digest(data) == *self
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for PieceHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
