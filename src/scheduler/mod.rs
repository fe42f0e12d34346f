mod worker;

pub use worker::PeerWorker;

use crate::piece::{PiecePicker, PieceStore};
use crate::tracker::Peer;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Tuning knobs for the download side
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of peers downloaded from at once
    pub max_peers: usize,
    pub connect_timeout: Duration,
    /// How long to wait for the answer to a single request
    pub request_timeout: Duration,
    /// Claims older than this are reclaimed by the supervisor
    pub claim_timeout: Duration,
    /// Pause before a peer's worker is restarted, and between peer-list checks
    pub retry_interval: Duration,
    /// Largest payload accepted from a peer (the piece size)
    pub max_payload: u32,
}

/// Drives every missing piece to verified using the current peer list.
///
/// Each listed peer gets its own driver task, which runs a [`PeerWorker`]
/// whenever one of the `max_peers` download slots is free and restarts it
/// `retry_interval` after it returns. Peers are independent: a slow or hung
/// peer only holds up the piece it has claimed.
pub struct DownloadScheduler {
    store: Arc<PieceStore>,
    picker: Arc<Mutex<PiecePicker>>,
    config: SchedulerConfig,
}

impl DownloadScheduler {
    pub fn new(store: Arc<PieceStore>, config: SchedulerConfig) -> Self {
        Self {
            store,
            picker: Arc::new(Mutex::new(PiecePicker::new())),
            config,
        }
    }

    /// Run until every piece is verified
    pub async fn run(&self, mut peers: watch::Receiver<Vec<Peer>>) {
        if self.store.is_complete() {
            info!("All {} pieces already verified", self.store.piece_count());
            return;
        }

        // dropping the set aborts the supervisor and every driver, including
        // when `run` is cancelled
        let mut tasks = JoinSet::new();
        tasks.spawn(supervise_claims(
            self.store.clone(),
            self.config.claim_timeout,
        ));
        let permits = Arc::new(Semaphore::new(self.config.max_peers.max(1)));
        let active: Arc<Mutex<HashSet<SocketAddr>>> = Arc::default();
        let mut tracker_open = true;

        loop {
            let changed = self.store.changed();
            if self.store.is_complete() {
                break;
            }

            let peer_list = dedup_peers(peers.borrow_and_update().clone());
            if peer_list.is_empty() && active.lock().is_empty() {
                warn!("No peers to download from; waiting for the tracker");
            }
            for peer in peer_list {
                if !active.lock().insert(peer.addr) {
                    continue;
                }
                debug!("Starting driver for {}", peer.addr);
                let driver = PeerDriver {
                    active: ActivePeer {
                        active: active.clone(),
                        addr: peer.addr,
                    },
                    peer,
                    store: self.store.clone(),
                    picker: self.picker.clone(),
                    config: self.config.clone(),
                };
                tasks.spawn(driver.run(permits.clone(), peers.clone()));
            }

            tokio::select! {
                _ = changed => {}
                result = peers.changed(), if tracker_open => {
                    if result.is_err() {
                        debug!("Peer list closed; keeping the last one");
                        tracker_open = false;
                    }
                }
                _ = tokio::time::sleep(self.config.retry_interval) => {
                    debug!(
                        "{:.1}% complete with {} active peers",
                        self.store.progress(),
                        active.lock().len()
                    );
                }
            }
        }

        info!("Download complete: {} pieces verified", self.store.piece_count());
    }
}

/// Keeps one peer's worker going for as long as the peer stays listed
struct PeerDriver {
    peer: Peer,
    store: Arc<PieceStore>,
    picker: Arc<Mutex<PiecePicker>>,
    config: SchedulerConfig,
    active: ActivePeer,
}

impl PeerDriver {
    async fn run(self, permits: Arc<Semaphore>, peers: watch::Receiver<Vec<Peer>>) {
        let addr = self.peer.addr;

        while !self.store.is_complete() {
            let listed = peers.borrow().iter().any(|peer| peer.addr == addr);
            if !listed {
                debug!("{} left the peer list", addr);
                break;
            }

            let Ok(permit) = permits.acquire().await else {
                break;
            };
            let worker = PeerWorker::new(
                self.peer.clone(),
                self.store.clone(),
                self.picker.clone(),
                self.config.clone(),
            );
            match worker.run().await {
                Ok(count) => debug!("{} idle after {} pieces", addr, count),
                Err(e) => warn!("Dropping connection to {}: {}", addr, e),
            }
            drop(permit);

            if !self.store.is_complete() {
                tokio::time::sleep(self.config.retry_interval).await;
            }
        }

        drop(self.active);
    }
}

/// Registration of a running driver, removed when the driver ends or is aborted
struct ActivePeer {
    active: Arc<Mutex<HashSet<SocketAddr>>>,
    addr: SocketAddr,
}

impl Drop for ActivePeer {
    fn drop(&mut self) {
        self.active.lock().remove(&self.addr);
    }
}

/// Periodically return stalled claims to the missing pool
async fn supervise_claims(store: Arc<PieceStore>, claim_timeout: Duration) {
    let period = (claim_timeout / 2).max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval(period);

    loop {
        ticker.tick().await;
        let reclaimed = store.reclaim_stalled(claim_timeout);
        if !reclaimed.is_empty() {
            info!("Reclaimed stalled pieces {:?}", reclaimed);
        }
    }
}

/// One worker per address
fn dedup_peers(peers: Vec<Peer>) -> Vec<Peer> {
    let mut seen = HashSet::new();
    peers.into_iter().filter(|peer| seen.insert(peer.addr)).collect()
}
