//! Durable song store: metadata and content kept consistent as one unit.

use log::{debug, error, warn};

use crate::error::{PlayerError, StorageError};
use crate::protocol::{ContentBlob, SongId, SongMetadata, SongRecord};

/// Raw storage operations a backend must provide.
///
/// Backends only know about single-table writes; pairing metadata with
/// content is the job of [`LibraryStore`].
pub trait LibraryBackend {
    /// Writes a metadata row and returns its freshly assigned id.
    fn insert_metadata(&mut self, metadata: &SongMetadata) -> Result<SongId, StorageError>;
    /// Writes the content row for an id returned by `insert_metadata`.
    fn insert_content(&mut self, id: SongId, data: &[u8]) -> Result<(), StorageError>;
    fn delete_metadata(&mut self, id: SongId) -> Result<(), StorageError>;
    /// Removes metadata and content for `id` together. Absent ids are not an error.
    fn delete_song(&mut self, id: SongId) -> Result<(), StorageError>;
    fn load_metadata(&self) -> Result<Vec<SongRecord>, StorageError>;
    fn load_content(&self, id: SongId) -> Result<Option<Vec<u8>>, StorageError>;
}

pub struct LibraryStore<B: LibraryBackend> {
    backend: B,
}

impl<B: LibraryBackend> LibraryStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Stores a new song. Either both rows exist afterwards or neither does.
    pub fn create(&mut self, metadata: SongMetadata, content: &[u8]) -> Result<SongId, PlayerError> {
        let id = write_pair_with_rollback(&mut self.backend, &metadata, content)?;
        debug!(
            "LibraryStore: created song {} ({}, {} bytes)",
            id, metadata.name, metadata.size
        );
        Ok(id)
    }

    pub fn list_all(&self) -> Result<Vec<SongRecord>, PlayerError> {
        Ok(self.backend.load_metadata()?)
    }

    pub fn fetch_content(&self, id: SongId) -> Result<ContentBlob, PlayerError> {
        match self.backend.load_content(id)? {
            Some(data) => Ok(ContentBlob { id, data }),
            None => Err(PlayerError::NotFound(id)),
        }
    }

    pub fn delete(&mut self, id: SongId) -> Result<(), PlayerError> {
        self.backend.delete_song(id)?;
        Ok(())
    }
}

/// Two-phase write: the metadata row confirms the id, then the content row is
/// written under it. A failed content write deletes the metadata row again.
fn write_pair_with_rollback<B: LibraryBackend>(
    backend: &mut B,
    metadata: &SongMetadata,
    content: &[u8],
) -> Result<SongId, StorageError> {
    let id = backend.insert_metadata(metadata)?;

    if let Err(content_err) = backend.insert_content(id, content) {
        warn!(
            "LibraryStore: content write for {} ({}) failed, rolling back metadata: {}",
            id, metadata.name, content_err
        );
        if let Err(rollback_err) = backend.delete_metadata(id) {
            error!(
                "LibraryStore: rollback of metadata {} failed: {}",
                id, rollback_err
            );
        }
        return Err(content_err);
    }

    Ok(id)
}
