use crate::error::{Result, TorrentError};
use crate::piece::PieceStore;
use crate::scheduler::{DownloadScheduler, SchedulerConfig};
use crate::server::UploadServer;
use crate::storage::StorageManager;
use crate::torrent::TorrentDescriptor;
use crate::tracker::{local_ip, TrackerClient, TrackerRequest};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Configuration for the peer
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity announced to the tracker
    pub peer_id: String,
    /// Folder to download to and seed from
    pub download_dir: PathBuf,
    /// Address announced to the tracker; detected when unset
    pub announce_ip: Option<IpAddr>,
    pub listen_port: u16,
    /// Maximum number of peers downloaded from concurrently
    pub max_peers: usize,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub claim_timeout: Duration,
    pub retry_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            peer_id: crate::tracker::generate_peer_id("anonymous"),
            download_dir: PathBuf::from("."),
            announce_ip: None,
            listen_port: 8088,
            max_peers: 8,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            claim_timeout: Duration::from_secs(60),
            retry_interval: Duration::from_secs(2),
        }
    }
}

impl ClientConfig {
    fn scheduler_config(&self, descriptor: &TorrentDescriptor) -> SchedulerConfig {
        SchedulerConfig {
            max_peers: self.max_peers,
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            claim_timeout: self.claim_timeout,
            retry_interval: self.retry_interval,
            // validated to fit when the descriptor was loaded
            max_payload: descriptor.piece_size as u32,
        }
    }
}

/// A peer that seeds what it has and downloads what it lacks
pub struct TorrentClient {
    config: ClientConfig,
}

impl TorrentClient {
    pub fn new(config: ClientConfig) -> Self {
        info!("Client initialized with peer_id: {}", config.peer_id);
        Self { config }
    }

    /// Share a torrent: download every missing piece, then seed forever.
    ///
    /// Descriptor, storage and tracker failures are returned before any
    /// socket is opened.
    pub async fn run(&self, torrent_path: &Path) -> Result<()> {
        info!("Starting peer for: {}", torrent_path.display());

        let descriptor = crate::torrent::load_torrent_file(torrent_path).await?;

        info!("Torrent: {}", descriptor.torrent_id);
        info!("Total size: {} bytes", descriptor.file_size);
        info!("Pieces: {} x {} bytes", descriptor.piece_count(), descriptor.piece_size);

        let storage = StorageManager::new(&self.config.download_dir, &descriptor).await?;
        let store = Arc::new(match storage.load_existing().await? {
            Some(content) => PieceStore::from_existing(&descriptor, &content),
            None => PieceStore::new(&descriptor),
        });

        let ip = match self.config.announce_ip {
            Some(ip) => ip,
            None => local_ip().await,
        };
        let request = TrackerRequest::new(
            self.config.peer_id.clone(),
            ip,
            self.config.listen_port,
            descriptor.torrent_id.clone(),
        );

        let tracker = Arc::new(TrackerClient::new());
        let response = tracker.announce(&descriptor.tracker_url, &request).await?;

        let listen_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.config.listen_port);
        let server = UploadServer::bind(listen_addr, store.clone()).await?;
        let uploads = tokio::spawn(server.run());

        let interval = response.interval;
        let (peers_tx, peers_rx) = watch::channel(response.peers);
        // keeps re-announcing while we seed, after the scheduler lets go of its copy
        let _seeding_subscription = peers_rx.clone();
        {
            let tracker = tracker.clone();
            let tracker_url = descriptor.tracker_url.clone();
            let request = request.clone();
            tokio::spawn(async move {
                tracker
                    .reannounce_loop(&tracker_url, &request, interval, peers_tx)
                    .await;
            });
        }

        let scheduler = DownloadScheduler::new(store.clone(), self.config.scheduler_config(&descriptor));
        scheduler.run(peers_rx).await;

        if let Some(content) = store.snapshot() {
            if let Err(e) = storage.write_file(&content).await {
                error!("Failed to write {}: {}", storage.path().display(), e);
            }
        }

        info!(
            "All {} pieces verified; seeding {}",
            store.piece_count(),
            descriptor.file_name
        );

        uploads
            .await
            .map_err(|e| TorrentError::Transport(format!("upload server stopped: {}", e)))
    }
}

impl Default for TorrentClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::PieceHash;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const CONTENT: &[u8] = b"abcdefghij";

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("nibble-torrent-client-{}-{}", name, std::process::id()))
    }

    /// Minimal HTTP tracker answering every announce with the same body
    async fn fake_tracker(body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/announce", listener.local_addr().unwrap());
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let body = body.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let reply = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(reply.as_bytes()).await;
                });
            }
        });
        url
    }

    async fn write_torrent(dir: &Path, tracker_url: &str) -> PathBuf {
        tokio::fs::create_dir_all(dir).await.unwrap();
        let pieces: Vec<String> = CONTENT.chunks(4).map(|c| PieceHash::digest(c).to_hex()).collect();
        let json = serde_json::json!({
            "torrent_id": "e2e",
            "tracker_url": tracker_url,
            "file_name": "shared.bin",
            "file_size": CONTENT.len(),
            "piece_size": 4,
            "pieces": pieces,
        });
        let path = dir.join("shared.torrent");
        tokio::fs::write(&path, json.to_string()).await.unwrap();
        path
    }

    fn test_config(dir: &Path, netid: &str) -> ClientConfig {
        ClientConfig {
            peer_id: crate::tracker::generate_peer_id(netid),
            download_dir: dir.join(netid),
            announce_ip: Some("127.0.0.1".parse().unwrap()),
            listen_port: 0,
            retry_interval: Duration::from_millis(50),
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn test_downloads_from_seed_and_writes_file() {
        let dir = scratch_dir("e2e");

        // seeder serving the original file
        let seed_store = PieceStore::from_existing(
            &TorrentDescriptor::for_content(CONTENT, 4),
            CONTENT,
        );
        let server = UploadServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(seed_store))
            .await
            .unwrap();
        let seed_addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let tracker_url = fake_tracker(
            serde_json::json!({
                "interval": 60,
                "peers": [["-ECEN426-seed", seed_addr.to_string()]],
            })
            .to_string(),
        )
        .await;
        let torrent = write_torrent(&dir, &tracker_url).await;

        let config = test_config(&dir, "leech");
        let output = config.download_dir.join("shared.bin");
        let client = TorrentClient::new(config);
        let running = tokio::spawn(async move { client.run(&torrent).await });

        let mut written = None;
        for _ in 0..100 {
            if let Ok(data) = tokio::fs::read(&output).await {
                if data.len() == CONTENT.len() {
                    written = Some(data);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // still seeding
        assert!(!running.is_finished());
        running.abort();

        assert_eq!(written.as_deref(), Some(CONTENT));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_missing_torrent_file_is_fatal() {
        let client = TorrentClient::default();
        let err = client.run(Path::new("/definitely/not/here.torrent")).await.unwrap_err();
        assert!(matches!(err, TorrentError::InvalidTorrent(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_unreachable_tracker_is_fatal() {
        let dir = scratch_dir("no-tracker");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_url = format!("http://{}/announce", listener.local_addr().unwrap());
        drop(listener);

        let torrent = write_torrent(&dir, &dead_url).await;
        let client = TorrentClient::new(test_config(&dir, "lonely"));
        let err = client.run(&torrent).await.unwrap_err();
        assert!(matches!(err, TorrentError::Tracker(_)));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
