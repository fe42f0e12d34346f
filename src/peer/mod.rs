mod connection;
mod message;

pub use connection::PeerConnection;
pub use message::PeerMessage;
