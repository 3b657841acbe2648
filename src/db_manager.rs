//! SQLite persistence for song metadata and audio content.
//!
//! Metadata lives in `songs`, payloads in `files`; both are keyed by the same
//! auto-assigned id.

use std::path::Path;

use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;
use crate::library::library_store::LibraryBackend;
use crate::protocol::{SongId, SongMetadata, SongRecord};

pub struct DbManager {
    conn: Connection,
    max_content_bytes: u64,
}

impl DbManager {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    log::error!(
                        "Could not create data directory {}: {}",
                        parent.display(),
                        err
                    );
                    rusqlite::Error::InvalidPath(parent.to_path_buf())
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        let db_manager = Self {
            conn,
            max_content_bytes: 0,
        };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let db_manager = Self {
            conn,
            max_content_bytes: 0,
        };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    /// Caps the total number of stored content bytes. Zero disables the cap.
    pub fn with_content_quota(mut self, max_content_bytes: u64) -> Self {
        self.max_content_bytes = max_content_bytes;
        self
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS songs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                size INTEGER NOT NULL,
                mime_type TEXT NOT NULL,
                uploaded_at TEXT NOT NULL
            )",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS songs_name ON songs(name)",
            [],
        )?;
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY,
                data BLOB NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn stored_content_bytes(&self) -> Result<u64, rusqlite::Error> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(data)), 0) FROM files",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    pub fn count_content_rows(&self) -> Result<usize, rusqlite::Error> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn check_quota(&self, requested: u64) -> Result<(), StorageError> {
        if self.max_content_bytes == 0 {
            return Ok(());
        }
        let used = self.stored_content_bytes()?;
        let available = self.max_content_bytes.saturating_sub(used);
        if requested > available {
            return Err(StorageError::QuotaExceeded {
                requested,
                available,
            });
        }
        Ok(())
    }
}

impl LibraryBackend for DbManager {
    fn insert_metadata(&mut self, metadata: &SongMetadata) -> Result<SongId, StorageError> {
        self.conn.execute(
            "INSERT INTO songs (name, size, mime_type, uploaded_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                metadata.name,
                i64::try_from(metadata.size).unwrap_or(i64::MAX),
                metadata.mime_type,
                metadata.uploaded_at
            ],
        )?;
        Ok(SongId(self.conn.last_insert_rowid()))
    }

    fn insert_content(&mut self, id: SongId, data: &[u8]) -> Result<(), StorageError> {
        self.check_quota(data.len() as u64)?;
        self.conn.execute(
            "INSERT INTO files (id, data) VALUES (?1, ?2)",
            params![id.0, data],
        )?;
        Ok(())
    }

    fn delete_metadata(&mut self, id: SongId) -> Result<(), StorageError> {
        self.conn
            .execute("DELETE FROM songs WHERE id = ?1", params![id.0])?;
        Ok(())
    }

    fn delete_song(&mut self, id: SongId) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let removed_songs = tx.execute("DELETE FROM songs WHERE id = ?1", params![id.0])?;
        let removed_files = tx.execute("DELETE FROM files WHERE id = ?1", params![id.0])?;
        tx.commit()?;
        debug!(
            "DbManager: deleted song {} (songs rows={}, files rows={})",
            id, removed_songs, removed_files
        );
        Ok(())
    }

    fn load_metadata(&self) -> Result<Vec<SongRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, size, mime_type, uploaded_at FROM songs ORDER BY id ASC",
        )?;
        let record_iter = stmt.query_map([], |row| {
            Ok(SongRecord {
                id: SongId(row.get(0)?),
                name: row.get(1)?,
                size: u64::try_from(row.get::<_, i64>(2)?).unwrap_or(0),
                mime_type: row.get(3)?,
                uploaded_at: row.get(4)?,
            })
        })?;

        let mut records = Vec::new();
        for record in record_iter {
            records.push(record?);
        }
        Ok(records)
    }

    fn load_content(&self, id: SongId) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self
            .conn
            .query_row(
                "SELECT data FROM files WHERE id = ?1",
                params![id.0],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(data)
    }
}
