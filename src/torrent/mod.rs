mod metainfo;
mod piece;

pub use metainfo::TorrentDescriptor;
pub use piece::PieceHash;

use crate::error::{Result, TorrentError};
use std::path::Path;
use tokio::fs;

/// Load and validate a torrent descriptor file
pub async fn load_torrent_file<P: AsRef<Path>>(path: P) -> Result<TorrentDescriptor> {
    let path = path.as_ref();
    let data = fs::read(path).await.map_err(|e| {
        TorrentError::InvalidTorrent(format!("cannot read {}: {}", path.display(), e))
    })?;
    TorrentDescriptor::from_json(&data)
}
