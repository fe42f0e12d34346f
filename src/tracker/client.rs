use super::{Peer, TrackerRequest, TrackerResponse};
use crate::error::{Result, TorrentError};
use reqwest::Client;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lower bound on the re-announce period
const MIN_REANNOUNCE_INTERVAL: u64 = 10;

/// Client for communicating with the tracker
pub struct TrackerClient {
    client: Client,
}

impl TrackerClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Register with the tracker and get the peer list, excluding ourselves
    pub async fn announce(&self, tracker_url: &str, request: &TrackerRequest) -> Result<TrackerResponse> {
        info!("Announcing to tracker: {}", tracker_url);

        // Build URL with query parameters
        let url = reqwest::Url::parse_with_params(tracker_url, &request.to_query_params())?;

        debug!("Tracker request URL: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TorrentError::Tracker(format!("cannot reach {}: {}", tracker_url, e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| TorrentError::Tracker(format!("cannot read response: {}", e)))?;

        debug!("Tracker response status: {}, body length: {}", status, body.len());

        if !status.is_success() {
            return Err(TorrentError::Tracker(format!("HTTP error: {}", status)));
        }

        let own_addr = SocketAddr::new(request.ip, request.port);
        let tracker_response = TrackerResponse::from_json(&body)?.without_self(&request.peer_id, own_addr);

        info!(
            "Received {} peers from tracker (interval: {}s)",
            tracker_response.peers.len(),
            tracker_response.interval
        );

        Ok(tracker_response)
    }

    /// Keep announcing every `interval` seconds and publish each fresh peer
    /// list. Failures keep the previous list. Returns once every receiver
    /// is gone.
    pub async fn reannounce_loop(
        &self,
        tracker_url: &str,
        request: &TrackerRequest,
        mut interval: u64,
        peers: watch::Sender<Vec<Peer>>,
    ) {
        loop {
            let period = interval.max(MIN_REANNOUNCE_INTERVAL);
            tokio::time::sleep(Duration::from_secs(period)).await;

            if peers.is_closed() {
                debug!("No peer list subscribers left; stopping re-announce");
                return;
            }

            match self.announce(tracker_url, request).await {
                Ok(response) => {
                    interval = response.interval;
                    if peers.send(response.peers).is_err() {
                        return;
                    }
                }
                Err(e) => warn!("Re-announce failed, keeping previous peer list: {}", e),
            }
        }
    }
}

impl Default for TrackerClient {
    fn default() -> Self {
        Self::new()
    }
}
