use crate::error::{Result, TorrentError};
use crate::torrent::TorrentDescriptor;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Manages the on-disk copy of the shared file
pub struct StorageManager {
    /// Full path of the file inside the download directory
    path: PathBuf,
    /// Expected length of the file
    file_size: u64,
}

impl StorageManager {
    /// Create a new storage manager, creating the download directory if needed
    pub async fn new<P: AsRef<Path>>(download_dir: P, descriptor: &TorrentDescriptor) -> Result<Self> {
        let download_dir = download_dir.as_ref();

        fs::create_dir_all(download_dir).await.map_err(|e| {
            TorrentError::Storage(format!("cannot create {}: {}", download_dir.display(), e))
        })?;

        let path = download_dir.join(&descriptor.file_name);
        info!("Storage initialized at {}", path.display());

        Ok(Self {
            path,
            file_size: descriptor.file_size,
        })
    }

    /// Read a pre-existing local copy to seed from.
    ///
    /// Returns `None` when there is no file or its length is wrong.
    pub async fn load_existing(&self) -> Result<Option<Vec<u8>>> {
        let metadata = match fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No local copy at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(TorrentError::Storage(format!(
                    "cannot stat {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if metadata.len() != self.file_size {
            info!(
                "Ignoring local copy {} ({} bytes, expected {})",
                self.path.display(),
                metadata.len(),
                self.file_size
            );
            return Ok(None);
        }

        let data = fs::read(&self.path).await.map_err(|e| {
            TorrentError::Storage(format!("cannot read {}: {}", self.path.display(), e))
        })?;

        info!("Loaded local copy {} ({} bytes)", self.path.display(), data.len());
        Ok(Some(data))
    }

    /// Write the completed file to disk
    pub async fn write_file(&self, data: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await?;

        file.write_all(data).await?;
        file.flush().await?;

        info!("Wrote {} bytes to {}", data.len(), self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("nibble-torrent-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_write_then_load_existing() {
        let dir = scratch_dir("roundtrip");
        let descriptor = TorrentDescriptor::for_content(b"abcdefghij", 4);
        let storage = StorageManager::new(&dir, &descriptor).await.unwrap();

        assert!(storage.load_existing().await.unwrap().is_none());

        storage.write_file(b"abcdefghij").await.unwrap();
        let loaded = storage.load_existing().await.unwrap();
        assert_eq!(loaded.as_deref(), Some(&b"abcdefghij"[..]));

        let _ = fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_wrong_length_copy_is_ignored() {
        let dir = scratch_dir("short");
        let descriptor = TorrentDescriptor::for_content(b"abcdefghij", 4);
        let storage = StorageManager::new(&dir, &descriptor).await.unwrap();

        fs::write(storage.path(), b"abc").await.unwrap();
        assert!(storage.load_existing().await.unwrap().is_none());

        let _ = fs::remove_dir_all(&dir).await;
    }
}
