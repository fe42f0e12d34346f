use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};

/// Represents a peer in the swarm. Lives as long as one tracker response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub addr: SocketAddr,
    pub peer_id: Option<String>,
}

impl Peer {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
            peer_id: None,
        }
    }

    pub fn with_peer_id(addr: SocketAddr, peer_id: String) -> Self {
        Self {
            addr,
            peer_id: Some(peer_id),
        }
    }

    /// Parse one entry of a tracker peer list.
    ///
    /// Accepted shapes: `["peer-id", "ip:port"]`, `"ip:port"` and
    /// `{"peer_id": .., "ip": .., "port": ..}`.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match serde_json::from_value::<PeerEntry>(value).ok()? {
            PeerEntry::Pair(peer_id, addr) => Some(Self::with_peer_id(addr.parse().ok()?, peer_id)),
            PeerEntry::Address(addr) => {
                let addr: SocketAddr = addr.parse().ok()?;
                Some(Self::new(addr.ip(), addr.port()))
            }
            PeerEntry::Dict { peer_id, ip, port } => {
                let ip: IpAddr = ip.parse().ok()?;
                Some(Self {
                    addr: SocketAddr::new(ip, port),
                    peer_id,
                })
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PeerEntry {
    Pair(String, String),
    Address(String),
    Dict {
        #[serde(default, alias = "peer id")]
        peer_id: Option<String>,
        ip: String,
        port: u16,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_pair() {
        let peer = Peer::from_json(json!(["-ECEN426-abc", "10.0.0.2:8088"])).unwrap();
        assert_eq!(peer.addr, "10.0.0.2:8088".parse().unwrap());
        assert_eq!(peer.peer_id.as_deref(), Some("-ECEN426-abc"));
    }

    #[test]
    fn test_parse_address_and_dict() {
        let peer = Peer::from_json(json!("10.0.0.3:9000")).unwrap();
        assert_eq!(peer.addr.port(), 9000);
        assert!(peer.peer_id.is_none());

        let peer = Peer::from_json(json!({"peer_id": "x", "ip": "10.0.0.4", "port": 7000})).unwrap();
        assert_eq!(peer.addr, "10.0.0.4:7000".parse().unwrap());
    }

    #[test]
    fn test_reject_garbage() {
        assert!(Peer::from_json(json!("no-port")).is_none());
        assert!(Peer::from_json(json!(42)).is_none());
        assert!(Peer::from_json(json!({"ip": "bad ip", "port": 1})).is_none());
    }
}
