mod client;
mod peer;
mod request;
mod response;

pub use client::TrackerClient;
pub use peer::Peer;
pub use request::TrackerRequest;
pub use response::TrackerResponse;

use std::net::{IpAddr, Ipv4Addr};
use tokio::net::UdpSocket;
use tracing::debug;

/// Prefix identifying this client in peer IDs
pub const PEER_ID_PREFIX: &str = "-ECEN426-";

/// Build the peer ID for a user identity.
/// Format: -ECEN426-<netid>
pub fn generate_peer_id(netid: &str) -> String {
    format!("{}{}", PEER_ID_PREFIX, netid)
}

/// Determine the address other peers can reach us on.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick the
/// outbound interface. Falls back to loopback when there is no route.
pub async fn local_ip() -> IpAddr {
    let probe = async {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect("10.255.255.255:1").await?;
        socket.local_addr().map(|addr| addr.ip())
    };

    match probe.await {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            debug!("Cannot determine outbound address ({}), using loopback", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_peer_id() {
        assert_eq!(generate_peer_id("jdoe"), "-ECEN426-jdoe");
    }

    #[tokio::test]
    async fn test_local_ip_is_ipv4() {
        assert!(local_ip().await.is_ipv4());
    }
}
