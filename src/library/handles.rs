//! Session-scoped playable handles for stored audio blobs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::{debug, trace};
use uuid::Uuid;

const HANDLE_PREFIX: &str = "blob:echo-player/";

/// Opaque reference the playback primitive uses to read a stored blob.
/// Only valid while the registry that minted it keeps it alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlayableHandle(String);

impl PlayableHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Default)]
pub struct HandleRegistry {
    live: HashMap<PlayableHandle, Arc<[u8]>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&mut self, data: Vec<u8>) -> PlayableHandle {
        let handle = PlayableHandle(format!("{}{}", HANDLE_PREFIX, Uuid::new_v4()));
        trace!("HandleRegistry: minted {} ({} bytes)", handle, data.len());
        self.live.insert(handle.clone(), Arc::from(data));
        handle
    }

    pub fn resolve(&self, handle: &PlayableHandle) -> Option<Arc<[u8]>> {
        self.live.get(handle).cloned()
    }

    /// Returns false when the handle was already released.
    pub fn release(&mut self, handle: &PlayableHandle) -> bool {
        let released = self.live.remove(handle).is_some();
        trace!("HandleRegistry: release {} -> {}", handle, released);
        released
    }

    /// Detaches the blob behind `handle` without forgetting the handle itself,
    /// so [`HandleRegistry::reinstate`] can bring the same handle back.
    pub fn take(&mut self, handle: &PlayableHandle) -> Option<Arc<[u8]>> {
        let data = self.live.remove(handle);
        trace!("HandleRegistry: take {} -> {}", handle, data.is_some());
        data
    }

    pub fn reinstate(&mut self, handle: PlayableHandle, data: Arc<[u8]>) {
        trace!("HandleRegistry: reinstate {}", handle);
        self.live.insert(handle, data);
    }

    pub fn release_all(&mut self) -> usize {
        let count = self.live.len();
        self.live.clear();
        debug!("HandleRegistry: released {} handles", count);
        count
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::HandleRegistry;

    #[test]
    fn test_minted_handles_are_unique_and_resolvable() {
        let mut registry = HandleRegistry::new();
        let first = registry.mint(vec![1, 2]);
        let second = registry.mint(vec![1, 2]);

        assert_ne!(first, second);
        assert!(first.as_str().starts_with("blob:echo-player/"));
        assert_eq!(registry.resolve(&first).as_deref(), Some(&[1u8, 2][..]));
        assert_eq!(registry.live_count(), 2);
    }

    #[test]
    fn test_released_handle_no_longer_resolves() {
        let mut registry = HandleRegistry::new();
        let handle = registry.mint(vec![3]);

        assert!(registry.release(&handle));
        assert!(!registry.release(&handle));
        assert!(registry.resolve(&handle).is_none());
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_taken_handle_can_be_reinstated() {
        let mut registry = HandleRegistry::new();
        let handle = registry.mint(vec![7, 8]);

        let data = registry.take(&handle).expect("live handle");
        assert!(registry.resolve(&handle).is_none());
        assert!(registry.take(&handle).is_none());

        registry.reinstate(handle.clone(), data);
        assert_eq!(registry.resolve(&handle).as_deref(), Some(&[7u8, 8][..]));
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn test_release_all_reports_count() {
        let mut registry = HandleRegistry::new();
        registry.mint(vec![1]);
        registry.mint(vec![2]);
        registry.mint(vec![3]);

        assert_eq!(registry.release_all(), 3);
        assert_eq!(registry.live_count(), 0);
    }
}
