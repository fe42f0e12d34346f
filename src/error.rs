use thiserror::Error;

/// Malformed or truncated peer wire messages. Always local to one connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Connection closed mid-message")]
    Truncated,

    #[error("Declared payload length {declared} exceeds maximum of {max} bytes")]
    MalformedLength { declared: u32, max: u32 },

    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("Unexpected message: {0}")]
    Unexpected(String),
}

#[derive(Error, Debug)]
pub enum TorrentError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Piece {index} failed integrity check")]
    Integrity { index: usize },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid torrent file: {0}")]
    InvalidTorrent(String),

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TorrentError {
    /// Errors that must abort the process before any socket is opened.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TorrentError::InvalidTorrent(_)
                | TorrentError::Tracker(_)
                | TorrentError::Storage(_)
        )
    }
}

impl From<url::ParseError> for TorrentError {
    fn from(err: url::ParseError) -> Self {
        TorrentError::Tracker(format!("invalid tracker URL: {}", err))
    }
}

impl From<hex::FromHexError> for TorrentError {
    fn from(err: hex::FromHexError) -> Self {
        TorrentError::InvalidTorrent(format!("invalid piece hash: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, TorrentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(TorrentError::Tracker("down".to_string()).is_fatal());
        assert!(TorrentError::InvalidTorrent("bad".to_string()).is_fatal());
        assert!(!TorrentError::Integrity { index: 3 }.is_fatal());
        assert!(!TorrentError::Protocol(ProtocolError::Truncated).is_fatal());
        assert!(!TorrentError::Transport("reset".to_string()).is_fatal());
    }
}
