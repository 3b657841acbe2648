//! Named session values persisted to a small TOML file.
//!
//! Every write goes straight to disk. Values are edited in place with
//! `toml_edit`, so comments and hand edits in the file survive rewrites.

use std::path::{Path, PathBuf};

use log::{debug, error, warn};
use toml_edit::{value, DocumentMut, Item, Table};

pub const KEY_CURRENT_SONG: &str = "currentSong";
pub const KEY_SHUFFLE: &str = "shuffle";
pub const KEY_LOOP: &str = "loop";
pub const KEY_THEME: &str = "theme";
pub const KEY_VOLUME: &str = "volume";

fn set_table_value_preserving_decor(table: &mut Table, key: &str, item: Item) {
    let existing_value_decor = table
        .get(key)
        .and_then(|current| current.as_value().map(|value| value.decor().clone()));
    table[key] = item;
    if let Some(existing_value_decor) = existing_value_decor {
        if let Some(next_value) = table[key].as_value_mut() {
            *next_value.decor_mut() = existing_value_decor;
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionStore {
    path: Option<PathBuf>,
    document: DocumentMut,
}

impl SessionStore {
    /// Opens the store at `path`. A missing or unreadable file starts empty.
    pub fn open(path: &Path) -> Self {
        let document = match std::fs::read_to_string(path) {
            Ok(text) => match text.parse::<DocumentMut>() {
                Ok(document) => document,
                Err(err) => {
                    warn!(
                        "SessionStore: ignoring unparsable {} ({})",
                        path.display(),
                        err
                    );
                    DocumentMut::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => DocumentMut::new(),
            Err(err) => {
                warn!("SessionStore: failed to read {}: {}", path.display(), err);
                DocumentMut::new()
            }
        };
        Self {
            path: Some(path.to_path_buf()),
            document,
        }
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.document.as_table().contains_key(key)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.document.get(key).and_then(Item::as_integer)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.document.get(key).and_then(Item::as_bool)
    }

    /// Integers are accepted so a hand-written `volume = 1` still reads.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        let item = self.document.get(key)?;
        item.as_float()
            .or_else(|| item.as_integer().map(|number| number as f64))
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.document
            .get(key)
            .and_then(Item::as_str)
            .map(str::to_string)
    }

    pub fn set_i64(&mut self, key: &str, number: i64) {
        self.set_item(key, value(number));
    }

    pub fn set_bool(&mut self, key: &str, flag: bool) {
        self.set_item(key, value(flag));
    }

    pub fn set_f64(&mut self, key: &str, number: f64) {
        self.set_item(key, value(number));
    }

    pub fn set_str(&mut self, key: &str, text: &str) {
        self.set_item(key, value(text));
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let removed = self.document.as_table_mut().remove(key).is_some();
        if removed {
            self.flush();
        }
        removed
    }

    /// Writes the document to disk. Failures are logged, never raised.
    pub fn flush(&self) {
        let Some(path) = self.path.as_ref() else {
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                error!(
                    "SessionStore: failed to create {}: {}",
                    parent.display(),
                    err
                );
                return;
            }
        }
        if let Err(err) = std::fs::write(path, self.document.to_string()) {
            error!("SessionStore: failed to persist {}: {}", path.display(), err);
        }
    }

    fn set_item(&mut self, key: &str, item: Item) {
        debug!("SessionStore: {} = {}", key, item.to_string().trim());
        set_table_value_preserving_decor(self.document.as_table_mut(), key, item);
        self.flush();
    }
}
