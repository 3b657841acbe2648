//! Offline audio player core: a durable song library, shuffle/loop track
//! sequencing, and a cache-first shell for the app's static assets.

pub mod config;
pub mod db_manager;
pub mod error;
pub mod library;
pub mod media_file_discovery;
pub mod offline_cache;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod session_manager;
pub mod session_store;
