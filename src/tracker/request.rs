use std::net::IpAddr;

/// Request parameters for tracker communication
#[derive(Debug, Clone)]
pub struct TrackerRequest {
    /// Our peer ID
    pub peer_id: String,
    /// Address other peers should connect to
    pub ip: IpAddr,
    /// Port this peer is listening on
    pub port: u16,
    /// Torrent being shared
    pub torrent_id: String,
}

impl TrackerRequest {
    pub fn new(peer_id: String, ip: IpAddr, port: u16, torrent_id: String) -> Self {
        Self {
            peer_id,
            ip,
            port,
            torrent_id,
        }
    }

    /// Build query parameters for HTTP request
    pub fn to_query_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("peer_id", self.peer_id.clone()),
            ("ip", self.ip.to_string()),
            ("port", self.port.to_string()),
            ("torrent_id", self.torrent_id.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params() {
        let request = TrackerRequest::new(
            "-ECEN426-me".to_string(),
            "192.168.1.5".parse().unwrap(),
            8088,
            "t1".to_string(),
        );
        let params = request.to_query_params();
        assert_eq!(params[0], ("peer_id", "-ECEN426-me".to_string()));
        assert_eq!(params[1], ("ip", "192.168.1.5".to_string()));
        assert_eq!(params[2], ("port", "8088".to_string()));
        assert_eq!(params[3], ("torrent_id", "t1".to_string()));
    }
}
