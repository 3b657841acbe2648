//! Upload surface: turns paths on disk into upload batches.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use log::debug;

use crate::protocol::{UploadFailure, UploadedFile};

pub const SUPPORTED_AUDIO_EXTENSIONS: [&str; 9] = [
    "mp3", "wav", "ogg", "flac", "aac", "m4a", "mp4", "opus", "webm",
];

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

pub fn is_supported_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_AUDIO_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

/// Guesses a MIME type from the file extension.
pub fn mime_type_for_path(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return FALLBACK_MIME_TYPE;
    };
    match ext.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "opus" => "audio/opus",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "m4a" | "mp4" => "audio/mp4",
        "webm" => "audio/webm",
        _ => FALLBACK_MIME_TYPE,
    }
}

/// Upload filter: only audio content types reach the library store.
pub fn is_audio_mime_type(mime_type: &str) -> bool {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("audio/") || essence == "application/ogg"
}

pub fn collect_audio_files_from_folder(folder_path: &Path) -> Vec<PathBuf> {
    let mut pending_directories = vec![folder_path.to_path_buf()];
    let mut tracks = Vec::new();

    while let Some(directory) = pending_directories.pop() {
        let entries = match std::fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Failed to read directory {}: {}", directory.display(), err);
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    debug!("Failed to inspect {}: {}", path.display(), err);
                    continue;
                }
            };

            if file_type.is_dir() {
                pending_directories.push(path);
            } else if file_type.is_file() && is_supported_audio_file(&path) {
                tracks.push(path);
            }
        }
    }

    tracks.sort_unstable();
    tracks
}

/// Expands folders and keeps plain files as given. Files are not filtered
/// here so that the MIME filter downstream sees every explicit pick.
pub fn collect_upload_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = BTreeSet::new();
    for path in paths {
        if path.is_dir() {
            files.extend(collect_audio_files_from_folder(path));
        } else if path.is_file() {
            files.insert(path.clone());
        } else {
            debug!("Skipping missing upload path {}", path.display());
        }
    }
    files.into_iter().collect()
}

/// Reads every path into an upload batch. Unreadable files are reported,
/// never fatal.
pub fn read_upload_batch(paths: &[PathBuf]) -> (Vec<UploadedFile>, Vec<UploadFailure>) {
    let mut uploads = Vec::new();
    let mut failures = Vec::new();

    for path in collect_upload_paths(paths) {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        match std::fs::read(&path) {
            Ok(data) => uploads.push(UploadedFile {
                name,
                mime_type: mime_type_for_path(&path).to_string(),
                data,
            }),
            Err(err) => {
                debug!("Failed to read upload {}: {}", path.display(), err);
                failures.push(UploadFailure {
                    name,
                    reason: err.to_string(),
                });
            }
        }
    }

    (uploads, failures)
}
