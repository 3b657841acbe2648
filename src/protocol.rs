//! Event-bus protocol shared by the session manager and its clients.
//!
//! This module defines the library data model and every message payload
//! exchanged between the UI surface and the player session.

use std::fmt;

use crate::playback::primitive::PlaybackEvent;

/// Store-assigned song identifier shared by a record and its content.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize, serde::Serialize,
)]
pub struct SongId(pub i64);

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata captured at upload time, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct SongMetadata {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    /// RFC 3339 creation time.
    pub uploaded_at: String,
}

/// Persisted song metadata record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct SongRecord {
    pub id: SongId,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub uploaded_at: String,
}

impl SongRecord {
    pub fn from_metadata(id: SongId, metadata: SongMetadata) -> Self {
        Self {
            id,
            name: metadata.name,
            size: metadata.size,
            mime_type: metadata.mime_type,
            uploaded_at: metadata.uploaded_at,
        }
    }

    /// Display title. Uploads carry no tags, so the filename stands in.
    pub fn title(&self) -> &str {
        &self.name
    }
}

/// Raw audio payload stored under the owning record's id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBlob {
    pub id: SongId,
    pub data: Vec<u8>,
}

/// One file handed over by the upload surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// A file from an upload batch that could not be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFailure {
    pub name: String,
    pub reason: String,
}

/// Display preference persisted with the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value == "light" {
            Theme::Light
        } else {
            Theme::Dark
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        }
    }
}

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Library(LibraryMessage),
    Playback(PlaybackMessage),
    Session(SessionMessage),
}

/// Library-domain commands and notifications.
#[derive(Debug, Clone)]
pub enum LibraryMessage {
    UploadFiles(Vec<UploadedFile>),
    /// Delete the song at a list position.
    DeleteSong(usize),
    SetSearchQuery(String),
    RequestSongs,
    SongsChanged(Vec<SongRecord>),
    UploadFinished {
        stored: Vec<SongId>,
        failed: Vec<UploadFailure>,
    },
    /// List positions whose names match the active query.
    SearchResults(Vec<usize>),
}

/// Playback-domain commands and notifications.
#[derive(Debug, Clone)]
pub enum PlaybackMessage {
    PlayIndex(usize),
    TogglePlayPause,
    Next,
    Previous,
    /// Seek to a fraction (0.0..=1.0) of the current track's duration.
    SeekToFraction(f64),
    SetVolume(f32),
    ToggleShuffle,
    ToggleLoop,
    /// Event reported by the playback primitive.
    PrimitiveEvent(PlaybackEvent),
    NowPlaying {
        index: Option<usize>,
        name: Option<String>,
        is_playing: bool,
        shuffle_enabled: bool,
        loop_enabled: bool,
    },
    Progress {
        current: String,
        total: String,
        percent: f64,
    },
}

/// Session lifecycle commands and notifications.
#[derive(Debug, Clone)]
pub enum SessionMessage {
    ToggleTheme,
    ThemeChanged(Theme),
    Ready,
    Shutdown,
}
