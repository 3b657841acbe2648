//! Error kinds shared by the library store, sequencer, and playback layers.

use crate::protocol::SongId;

/// Failure raised by a storage backend while reading or writing.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("content quota exceeded: {requested} bytes requested, {available} bytes available")]
    QuotaExceeded { requested: u64, available: u64 },
    #[error("{0}")]
    Backend(String),
}

/// Top-level error returned by player operations.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// A persistence transaction could not commit.
    #[error("storage failure: {0}")]
    StorageFailure(#[from] StorageError),
    /// The requested song has no stored content.
    #[error("song {0} not found")]
    NotFound(SongId),
    /// The playback primitive refused to play.
    #[error("playback failure: {0}")]
    PlaybackFailure(String),
    /// Navigation was requested on an empty or out-of-range list.
    #[error("invalid index {index} for {len} songs")]
    InvalidIndex { index: usize, len: usize },
}
