mod picker;
mod store;

pub use picker::PiecePicker;
pub use store::PieceStore;

use std::time::Instant;

/// Download state of a single piece.
///
/// `Missing -> InFlight -> Verified`, with `InFlight -> Missing` on release or
/// reclaim. `Verified` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PieceStatus {
    /// Not downloaded yet
    Missing,
    /// Claimed by one downloader
    InFlight { owner: String, since: Instant },
    /// Content matched its hash and is stored
    Verified,
}

impl PieceStatus {
    pub fn is_verified(&self) -> bool {
        matches!(self, PieceStatus::Verified)
    }
}
