//! In-memory song list backed by the durable library store.
//!
//! The list is the single ordered collection both the UI and the sequencer
//! index into, so position shifts caused by deletes are computed here once.

use log::{debug, info, warn};

use crate::error::PlayerError;
use crate::library::handles::{HandleRegistry, PlayableHandle};
use crate::library::library_store::{LibraryBackend, LibraryStore};
use crate::media_file_discovery::is_audio_mime_type;
use crate::playback::primitive::PlaybackSource;
use crate::protocol::{SongId, SongMetadata, SongRecord, UploadFailure, UploadedFile};

/// A loaded song. `handle` is `None` when the stored content could not be read.
#[derive(Debug, Clone)]
pub struct LibrarySong {
    pub record: SongRecord,
    pub handle: Option<PlayableHandle>,
}

impl LibrarySong {
    pub fn is_playable(&self) -> bool {
        self.handle.is_some()
    }
}

/// Outcome of an upload batch. Each file succeeds or fails on its own.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub stored: Vec<SongId>,
    pub failed: Vec<UploadFailure>,
    /// Names of files dropped by the audio MIME filter.
    pub skipped: Vec<String>,
}

pub struct Library<B: LibraryBackend> {
    store: LibraryStore<B>,
    songs: Vec<LibrarySong>,
    handles: HandleRegistry,
}

impl<B: LibraryBackend> Library<B> {
    pub fn new(store: LibraryStore<B>) -> Self {
        Self {
            store,
            songs: Vec::new(),
            handles: HandleRegistry::new(),
        }
    }

    /// Rebuilds the list from storage and mints a handle per readable song.
    /// Songs whose content is missing stay listed so they can be deleted.
    pub fn load(&mut self) -> Result<usize, PlayerError> {
        self.release_handles();
        self.songs.clear();

        let records = self.store.list_all()?;
        for record in records {
            let handle = match self.store.fetch_content(record.id) {
                Ok(blob) => Some(self.handles.mint(blob.data)),
                Err(err) => {
                    warn!(
                        "Library: no playable content for {} ({}): {}",
                        record.name, record.id, err
                    );
                    None
                }
            };
            self.songs.push(LibrarySong { record, handle });
        }

        info!("Library: loaded {} songs", self.songs.len());
        Ok(self.songs.len())
    }

    pub fn upload(&mut self, files: Vec<UploadedFile>) -> UploadReport {
        let mut report = UploadReport::default();

        for file in files {
            if !is_audio_mime_type(&file.mime_type) {
                debug!(
                    "Library: skipping {} with non-audio type '{}'",
                    file.name, file.mime_type
                );
                report.skipped.push(file.name);
                continue;
            }

            let metadata = SongMetadata {
                name: file.name.clone(),
                size: file.data.len() as u64,
                mime_type: file.mime_type.clone(),
                uploaded_at: chrono::Utc::now().to_rfc3339(),
            };

            match self.store.create(metadata.clone(), &file.data) {
                Ok(id) => {
                    let handle = self.handles.mint(file.data);
                    self.songs.push(LibrarySong {
                        record: SongRecord::from_metadata(id, metadata),
                        handle: Some(handle),
                    });
                    report.stored.push(id);
                }
                Err(err) => {
                    warn!("Library: failed to save {}: {}", file.name, err);
                    report.failed.push(UploadFailure {
                        name: file.name,
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            "Library: upload stored={} failed={} skipped={}",
            report.stored.len(),
            report.failed.len(),
            report.skipped.len()
        );
        report
    }

    /// Deletes the song at `position`. Its handle stops resolving before the
    /// durable delete runs; if the delete fails, the same handle is restored.
    pub fn delete_at(&mut self, position: usize) -> Result<SongRecord, PlayerError> {
        let len = self.songs.len();
        let Some(song) = self.songs.get(position) else {
            return Err(PlayerError::InvalidIndex {
                index: position,
                len,
            });
        };
        let id = song.record.id;
        let detached = song
            .handle
            .clone()
            .and_then(|handle| self.handles.take(&handle).map(|data| (handle, data)));

        if let Err(err) = self.store.delete(id) {
            if let Some((handle, data)) = detached {
                self.handles.reinstate(handle, data);
            }
            return Err(err);
        }

        let removed = self.songs.remove(position);
        debug!("Library: deleted {} at position {}", removed.record.name, position);
        Ok(removed.record)
    }

    pub fn songs(&self) -> &[LibrarySong] {
        &self.songs
    }

    pub fn get(&self, position: usize) -> Option<&LibrarySong> {
        self.songs.get(position)
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn records(&self) -> Vec<SongRecord> {
        self.songs.iter().map(|song| song.record.clone()).collect()
    }

    /// Positions whose names contain `query`, ignoring case. An empty query
    /// matches nothing.
    pub fn search(&self, query: &str) -> Vec<usize> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.songs
            .iter()
            .enumerate()
            .filter(|(_, song)| song.record.name.to_lowercase().contains(&needle))
            .map(|(position, _)| position)
            .collect()
    }

    pub fn playback_source(&self, position: usize) -> Result<PlaybackSource, PlayerError> {
        let song = self.songs.get(position).ok_or(PlayerError::InvalidIndex {
            index: position,
            len: self.songs.len(),
        })?;
        let handle = song
            .handle
            .as_ref()
            .ok_or(PlayerError::NotFound(song.record.id))?;
        let data = self
            .handles
            .resolve(handle)
            .ok_or(PlayerError::NotFound(song.record.id))?;
        Ok(PlaybackSource {
            handle: handle.clone(),
            mime_type: song.record.mime_type.clone(),
            data,
        })
    }

    pub fn live_handle_count(&self) -> usize {
        self.handles.live_count()
    }

    /// Drops every handle. Songs stay listed but are no longer playable.
    pub fn release_handles(&mut self) -> usize {
        for song in &mut self.songs {
            song.handle = None;
        }
        self.handles.release_all()
    }

    pub fn store(&self) -> &LibraryStore<B> {
        &self.store
    }
}
