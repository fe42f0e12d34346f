use super::Peer;
use crate::error::{Result, TorrentError};
use serde::Deserialize;
use std::net::SocketAddr;
use tracing::warn;

/// Default re-announce interval when the tracker does not send one
const DEFAULT_INTERVAL: u64 = 30;

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    interval: Option<u64>,
    #[serde(default)]
    peers: Option<Vec<serde_json::Value>>,
    #[serde(default, rename = "failure reason", alias = "failure_reason")]
    failure_reason: Option<String>,
}

/// Response from a tracker
#[derive(Debug, Clone)]
pub struct TrackerResponse {
    /// Interval in seconds to wait before next request
    pub interval: u64,
    /// List of peers
    pub peers: Vec<Peer>,
}

impl TrackerResponse {
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let raw: RawResponse = serde_json::from_slice(body)
            .map_err(|e| TorrentError::Tracker(format!("malformed response: {}", e)))?;

        if let Some(reason) = raw.failure_reason {
            return Err(TorrentError::Tracker(reason));
        }

        let entries = raw
            .peers
            .ok_or_else(|| TorrentError::Tracker("Missing 'peers' field".to_string()))?;

        let peers = entries
            .into_iter()
            .filter_map(|entry| {
                let text = entry.to_string();
                let peer = Peer::from_json(entry);
                if peer.is_none() {
                    warn!("Skipping unparseable peer entry: {}", text);
                }
                peer
            })
            .collect();

        Ok(TrackerResponse {
            interval: raw.interval.unwrap_or(DEFAULT_INTERVAL),
            peers,
        })
    }

    /// Drop entries that point back at this peer
    pub fn without_self(mut self, peer_id: &str, addr: SocketAddr) -> Self {
        self.peers
            .retain(|peer| peer.peer_id.as_deref() != Some(peer_id) && peer.addr != addr);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let body = br#"{"interval": 15, "peers": [["-ECEN426-a", "10.0.0.1:8088"], "10.0.0.2:8088", "junk"]}"#;
        let response = TrackerResponse::from_json(body).unwrap();
        assert_eq!(response.interval, 15);
        assert_eq!(response.peers.len(), 2);
    }

    #[test]
    fn test_failure_reason() {
        let err = TrackerResponse::from_json(br#"{"failure reason": "unknown torrent"}"#).unwrap_err();
        assert!(matches!(err, TorrentError::Tracker(reason) if reason == "unknown torrent"));
    }

    #[test]
    fn test_missing_peers() {
        assert!(TrackerResponse::from_json(br#"{"interval": 10}"#).is_err());
        assert!(TrackerResponse::from_json(b"<html>").is_err());
    }

    #[test]
    fn test_without_self() {
        let body = br#"{"peers": [["-ECEN426-me", "10.0.0.1:8088"], ["-ECEN426-you", "10.0.0.2:8088"], "10.0.0.9:1"]}"#;
        let response = TrackerResponse::from_json(body)
            .unwrap()
            .without_self("-ECEN426-me", "10.0.0.9:1".parse().unwrap());
        assert_eq!(response.interval, DEFAULT_INTERVAL);
        assert_eq!(response.peers.len(), 1);
        assert_eq!(response.peers[0].peer_id.as_deref(), Some("-ECEN426-you"));
    }
}
