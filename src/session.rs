//! The player session: library, sequencer, playback primitive, and saved
//! preferences owned together for the lifetime of the app.

use log::{debug, info, warn};

use crate::config::PlaybackConfig;
use crate::error::PlayerError;
use crate::library::library_manager::{Library, UploadReport};
use crate::library::library_store::LibraryBackend;
use crate::playback::primitive::{play_with_recovery, PlaybackEvent, PlaybackPrimitive, TrackState};
use crate::playback::progress::{clamp_volume, format_time, progress_percent, seek_target};
use crate::playback::sequencer::{RemovalEffect, Sequencer, TrackEndedAction};
use crate::protocol::{SongRecord, Theme, UploadedFile};
use crate::session_store::{
    SessionStore, KEY_CURRENT_SONG, KEY_LOOP, KEY_SHUFFLE, KEY_THEME, KEY_VOLUME,
};

/// Snapshot of what the transport controls should show.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub index: Option<usize>,
    pub name: Option<String>,
    pub is_playing: bool,
    pub shuffle_enabled: bool,
    pub loop_enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressView {
    pub current: String,
    pub total: String,
    pub percent: f64,
}

pub struct PlayerSession<B: LibraryBackend, P: PlaybackPrimitive> {
    library: Library<B>,
    sequencer: Sequencer,
    primitive: P,
    store: SessionStore,
    track_state: TrackState,
    theme: Theme,
    volume: f32,
    search_query: String,
}

impl<B: LibraryBackend, P: PlaybackPrimitive> PlayerSession<B, P> {
    /// Loads the library and restores saved preferences. When enabled, the
    /// saved track starts playing again.
    pub fn init(
        mut library: Library<B>,
        mut sequencer: Sequencer,
        mut primitive: P,
        store: SessionStore,
        config: &PlaybackConfig,
    ) -> Self {
        if let Err(err) = library.load() {
            log::error!("PlayerSession: failed to load library: {}", err);
        }
        sequencer.set_song_count(library.len());

        let saved_index = store
            .get_i64(KEY_CURRENT_SONG)
            .and_then(|index| usize::try_from(index).ok())
            .filter(|&index| index < library.len());
        let resume_index = saved_index.filter(|_| config.resume_last_track);
        sequencer.set_current_index(resume_index);
        sequencer.set_shuffle(store.get_bool(KEY_SHUFFLE).unwrap_or(false));
        sequencer.set_loop(store.get_bool(KEY_LOOP).unwrap_or(false));

        let volume = clamp_volume(
            store
                .get_f64(KEY_VOLUME)
                .map(|volume| volume as f32)
                .unwrap_or(config.default_volume),
        );
        primitive.set_volume(volume);

        let theme = store
            .get_str(KEY_THEME)
            .map(|theme| Theme::parse(&theme))
            .unwrap_or_default();

        let mut session = Self {
            library,
            sequencer,
            primitive,
            store,
            track_state: TrackState::Stopped,
            theme,
            volume,
            search_query: String::new(),
        };

        info!(
            "PlayerSession: ready with {} songs (shuffle={}, loop={}, theme={})",
            session.library.len(),
            session.sequencer.is_shuffle_enabled(),
            session.sequencer.is_loop_enabled(),
            session.theme.as_str()
        );

        if let Some(index) = resume_index {
            if let Err(err) = session.play_index(index) {
                warn!("PlayerSession: could not resume track {}: {}", index, err);
            }
        }
        session
    }

    pub fn library(&self) -> &Library<B> {
        &self.library
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn primitive(&self) -> &P {
        &self.primitive
    }

    pub fn primitive_mut(&mut self) -> &mut P {
        &mut self.primitive
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn track_state(&self) -> TrackState {
        self.track_state
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn search_query(&self) -> &str {
        &self.search_query
    }

    pub fn songs(&self) -> Vec<SongRecord> {
        self.library.records()
    }

    pub fn upload(&mut self, files: Vec<UploadedFile>) -> UploadReport {
        let report = self.library.upload(files);
        self.sequencer.set_song_count(self.library.len());
        report
    }

    /// Deletes the song at `position`. Deleting the current track stops
    /// playback; deleting one above it keeps the same track current. A failed
    /// delete leaves playback untouched.
    pub fn delete_song(&mut self, position: usize) -> Result<SongRecord, PlayerError> {
        let removed = self.library.delete_at(position)?;

        match self.sequencer.on_song_removed(position) {
            RemovalEffect::CurrentRemoved => {
                self.primitive.pause();
                self.primitive.clear_source();
                self.track_state = TrackState::Stopped;
                self.store.remove(KEY_CURRENT_SONG);
                debug!("PlayerSession: stopped, current track deleted");
            }
            RemovalEffect::Shifted { current } => {
                self.store.set_i64(KEY_CURRENT_SONG, current as i64);
            }
            RemovalEffect::Unaffected => {}
        }
        self.sequencer.set_song_count(self.library.len());
        Ok(removed)
    }

    /// Loads the song at `index` into the primitive and starts it. The track
    /// becomes current even when the primitive refuses to play.
    pub fn play_index(&mut self, index: usize) -> Result<(), PlayerError> {
        let source = self.library.playback_source(index)?;
        self.primitive.set_source(source);
        self.sequencer.set_current_index(Some(index));
        self.store.set_i64(KEY_CURRENT_SONG, index as i64);
        self.track_state = TrackState::Stopped;

        match play_with_recovery(&mut self.primitive) {
            Ok(()) => {
                self.track_state = TrackState::Playing;
                debug!("PlayerSession: playing position {}", index);
                Ok(())
            }
            Err(err) => {
                warn!("PlayerSession: failed to play position {}: {}", index, err);
                Err(err)
            }
        }
    }

    /// Plays the next track, skipping songs without content. Returns the
    /// position that became current, if any.
    pub fn next(&mut self) -> Option<usize> {
        let index = self.sequencer.next_index()?;
        self.play_from(index, true)
    }

    pub fn previous(&mut self) -> Option<usize> {
        let index = self.sequencer.prev_index()?;
        self.play_from(index, false)
    }

    /// Returns whether the primitive is playing afterwards.
    pub fn toggle_play_pause(&mut self) -> bool {
        if !self.primitive.has_source() {
            let start = self
                .sequencer
                .current_index()
                .or_else(|| self.sequencer.next_index());
            if let Some(index) = start {
                self.play_from(index, true);
            }
        } else if self.primitive.is_paused() {
            match play_with_recovery(&mut self.primitive) {
                Ok(()) => self.track_state = TrackState::Playing,
                Err(err) => warn!("PlayerSession: failed to resume: {}", err),
            }
        } else {
            self.primitive.pause();
            self.track_state = TrackState::Paused;
        }
        !self.primitive.is_paused()
    }

    pub fn handle_event(&mut self, event: PlaybackEvent) {
        self.track_state = self.track_state.on_event(&event);
        match event {
            PlaybackEvent::Ended => match self.sequencer.on_track_ended() {
                TrackEndedAction::ReplayCurrent => {
                    self.primitive.seek(0.0);
                    match play_with_recovery(&mut self.primitive) {
                        Ok(()) => self.track_state = TrackState::Playing,
                        Err(err) => warn!("PlayerSession: failed to replay track: {}", err),
                    }
                }
                TrackEndedAction::Advance(index) => {
                    if self.play_from(index, true).is_none() {
                        self.track_state = TrackState::Stopped;
                    }
                }
                TrackEndedAction::Stop => {
                    self.track_state = TrackState::Stopped;
                }
            },
            PlaybackEvent::Error(message) => {
                warn!("PlayerSession: playback error: {}", message);
            }
            PlaybackEvent::Play | PlaybackEvent::Pause | PlaybackEvent::TimeUpdate { .. } => {}
        }
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        let enabled = self.sequencer.toggle_shuffle();
        self.store.set_bool(KEY_SHUFFLE, enabled);
        enabled
    }

    pub fn toggle_loop(&mut self) -> bool {
        let enabled = self.sequencer.toggle_loop();
        self.store.set_bool(KEY_LOOP, enabled);
        enabled
    }

    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.volume = clamp_volume(volume);
        self.primitive.set_volume(self.volume);
        self.store.set_f64(KEY_VOLUME, f64::from(self.volume));
        self.volume
    }

    pub fn toggle_theme(&mut self) -> Theme {
        self.theme = self.theme.toggled();
        self.store.set_str(KEY_THEME, self.theme.as_str());
        self.theme
    }

    /// Seeks to a share of the track. Ignored until the duration is known.
    pub fn seek_to_fraction(&mut self, fraction: f64) -> Option<f64> {
        let duration = self.primitive.duration()?;
        let target = seek_target(fraction, duration)?;
        self.primitive.seek(target);
        Some(target)
    }

    pub fn progress(&self) -> Option<ProgressView> {
        let duration = self.primitive.duration()?;
        let current = self.primitive.current_time();
        let percent = progress_percent(current, duration)?;
        Some(ProgressView {
            current: format_time(current),
            total: format_time(duration),
            percent,
        })
    }

    pub fn set_search_query(&mut self, query: &str) -> Vec<usize> {
        self.search_query = query.to_string();
        self.library.search(query)
    }

    pub fn now_playing(&self) -> NowPlaying {
        let index = self.sequencer.current_index();
        NowPlaying {
            index,
            name: index
                .and_then(|index| self.library.get(index))
                .map(|song| song.record.title().to_string()),
            is_playing: self.primitive.has_source() && !self.primitive.is_paused(),
            shuffle_enabled: self.sequencer.is_shuffle_enabled(),
            loop_enabled: self.sequencer.is_loop_enabled(),
        }
    }

    /// Stops playback and releases every playable handle.
    pub fn teardown(&mut self) -> usize {
        self.primitive.pause();
        self.primitive.clear_source();
        self.track_state = TrackState::Stopped;
        let released = self.library.release_handles();
        debug!("PlayerSession: released {} handles", released);
        released
    }

    /// Plays `start`, stepping past songs whose content is missing in the
    /// chosen direction. Each position is tried at most once; when none is
    /// playable the previous current track is kept.
    fn play_from(&mut self, start: usize, forward: bool) -> Option<usize> {
        let original = self.sequencer.current_index();
        let mut candidate = start;
        for _ in 0..self.library.len() {
            match self.play_index(candidate) {
                Ok(()) => return Some(candidate),
                Err(PlayerError::NotFound(id)) => {
                    debug!(
                        "PlayerSession: skipping position {} without content ({})",
                        candidate, id
                    );
                    self.sequencer.set_current_index(Some(candidate));
                    let step = if forward {
                        self.sequencer.next_index()
                    } else {
                        self.sequencer.prev_index()
                    };
                    match step {
                        Some(index) => candidate = index,
                        None => break,
                    }
                }
                Err(err) => {
                    debug!("PlayerSession: navigation to {} did not start: {}", candidate, err);
                    return Some(candidate);
                }
            }
        }

        warn!("PlayerSession: no playable song to navigate to");
        self.sequencer.set_current_index(original);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_manager::DbManager;
    use crate::library::library_manager::tests::RefusingDeleteBackend;
    use crate::library::library_store::LibraryStore;
    use crate::playback::primitive::HeadlessPlayback;
    use crate::protocol::SongMetadata;

    /// Two seconds of audio at the headless decode rate.
    const TWO_SECONDS: usize = 32_000;

    fn audio(name: &str) -> UploadedFile {
        UploadedFile {
            name: name.to_string(),
            mime_type: "audio/mpeg".to_string(),
            data: vec![7; TWO_SECONDS],
        }
    }

    fn library_with(names: &[&str]) -> Library<DbManager> {
        let mut library = Library::new(LibraryStore::new(
            DbManager::new_in_memory().expect("in-memory db"),
        ));
        library.upload(names.iter().map(|name| audio(name)).collect());
        library
    }

    fn session_with_store(
        names: &[&str],
        store: SessionStore,
        primitive: HeadlessPlayback,
    ) -> PlayerSession<DbManager, HeadlessPlayback> {
        PlayerSession::init(
            library_with(names),
            Sequencer::with_seed([9; 32]),
            primitive,
            store,
            &PlaybackConfig::default(),
        )
    }

    /// Library where `missing` has a metadata row but no stored content.
    fn library_missing_content(names: &[&str], missing: &str) -> Library<DbManager> {
        let mut db = DbManager::new_in_memory().expect("in-memory db");
        for name in names {
            let id = db
                .insert_metadata(&SongMetadata {
                    name: name.to_string(),
                    size: TWO_SECONDS as u64,
                    mime_type: "audio/mpeg".to_string(),
                    uploaded_at: "2026-01-01T00:00:00+00:00".to_string(),
                })
                .expect("metadata");
            if *name != missing {
                db.insert_content(id, &[7; TWO_SECONDS]).expect("content");
            }
        }
        Library::new(LibraryStore::new(db))
    }

    fn session_from(library: Library<DbManager>) -> PlayerSession<DbManager, HeadlessPlayback> {
        PlayerSession::init(
            library,
            Sequencer::with_seed([9; 32]),
            HeadlessPlayback::new(),
            SessionStore::in_memory(),
            &PlaybackConfig::default(),
        )
    }

    fn session(names: &[&str]) -> PlayerSession<DbManager, HeadlessPlayback> {
        session_with_store(names, SessionStore::in_memory(), HeadlessPlayback::new())
    }

    fn run_to_end(session: &mut PlayerSession<DbManager, HeadlessPlayback>) {
        session.primitive_mut().advance(10.0);
        let events = session.primitive_mut().drain_events();
        for event in events {
            session.handle_event(event);
        }
    }

    #[test]
    fn test_delete_below_current_keeps_same_track() {
        let mut session = session(&["a", "b", "c", "d"]);
        session.play_index(3).expect("play");

        session.delete_song(1).expect("delete");

        assert_eq!(session.sequencer().current_index(), Some(2));
        assert_eq!(session.now_playing().name.as_deref(), Some("d"));
        assert_eq!(session.store().get_i64(KEY_CURRENT_SONG), Some(2));
        assert!(session.now_playing().is_playing);
    }

    #[test]
    fn test_delete_current_stops_and_forgets_track() {
        let mut session = session(&["a", "b"]);
        session.play_index(1).expect("play");

        session.delete_song(1).expect("delete");

        assert_eq!(session.sequencer().current_index(), None);
        assert!(!session.primitive().has_source());
        assert_eq!(session.track_state(), TrackState::Stopped);
        assert!(!session.store().contains(KEY_CURRENT_SONG));
        assert_eq!(session.library().len(), 1);
    }

    #[test]
    fn test_failed_delete_of_current_keeps_playing() {
        let mut backend = RefusingDeleteBackend::new();
        backend.refuse_deletes = true;
        let mut library = Library::new(LibraryStore::new(backend));
        library.upload(vec![audio("a"), audio("b")]);
        let mut session = PlayerSession::init(
            library,
            Sequencer::with_seed([9; 32]),
            HeadlessPlayback::new(),
            SessionStore::in_memory(),
            &PlaybackConfig::default(),
        );
        session.play_index(0).expect("play");

        assert!(matches!(
            session.delete_song(0),
            Err(PlayerError::StorageFailure(_))
        ));

        assert_eq!(session.track_state(), TrackState::Playing);
        assert!(session.now_playing().is_playing);
        assert_eq!(session.sequencer().current_index(), Some(0));
        assert_eq!(session.library().len(), 2);
        let loaded = session.primitive().source().expect("source kept");
        let listed = session.library().playback_source(0).expect("still playable");
        assert_eq!(loaded.handle, listed.handle);
    }

    #[test]
    fn test_navigation_skips_songs_without_content() {
        let mut session = session_from(library_missing_content(&["a", "b", "c"], "b"));
        session.play_index(0).expect("play");

        assert_eq!(session.next(), Some(2));
        assert_eq!(session.now_playing().name.as_deref(), Some("c"));
        assert_eq!(session.previous(), Some(0));
        assert_eq!(session.store().get_i64(KEY_CURRENT_SONG), Some(0));

        run_to_end(&mut session);
        assert_eq!(session.sequencer().current_index(), Some(2));
        assert!(session.now_playing().is_playing);
        assert_eq!(session.track_state(), TrackState::Playing);
    }

    #[test]
    fn test_navigation_with_no_playable_song_keeps_current() {
        let mut session = session_from(library_missing_content(&["x", "y"], "y"));
        session.library.release_handles();

        assert_eq!(session.next(), None);
        assert_eq!(session.sequencer().current_index(), None);
        assert!(!session.primitive().has_source());
        assert!(!session.toggle_play_pause());
    }

    #[test]
    fn test_delete_invalid_position_leaves_session_usable() {
        let mut session = session(&["a"]);
        assert!(matches!(
            session.delete_song(5),
            Err(PlayerError::InvalidIndex { index: 5, len: 1 })
        ));
        assert_eq!(session.next(), Some(0));
        assert!(session.now_playing().is_playing);
    }

    #[test]
    fn test_navigation_on_empty_library_does_nothing() {
        let mut session = session(&[]);
        assert_eq!(session.next(), None);
        assert_eq!(session.previous(), None);
        assert!(!session.toggle_play_pause());
        assert_eq!(session.sequencer().current_index(), None);
    }

    #[test]
    fn test_linear_next_and_previous_wrap() {
        let mut session = session(&["a", "b", "c"]);
        assert_eq!(session.next(), Some(0));
        assert_eq!(session.previous(), Some(2));
        assert_eq!(session.next(), Some(0));
        assert_eq!(session.store().get_i64(KEY_CURRENT_SONG), Some(0));
    }

    #[test]
    fn test_loop_replays_current_track_on_end() {
        let mut session = session(&["a", "b"]);
        session.toggle_loop();
        session.play_index(1).expect("play");

        run_to_end(&mut session);

        assert_eq!(session.sequencer().current_index(), Some(1));
        assert_eq!(session.primitive().current_time(), 0.0);
        assert_eq!(session.track_state(), TrackState::Playing);
    }

    #[test]
    fn test_single_song_without_loop_wraps_to_itself() {
        let mut session = session(&["only"]);
        session.play_index(0).expect("play");

        run_to_end(&mut session);

        assert_eq!(session.sequencer().current_index(), Some(0));
        assert!(session.now_playing().is_playing);
    }

    #[test]
    fn test_end_of_track_advances_to_next() {
        let mut session = session(&["a", "b", "c"]);
        session.play_index(1).expect("play");

        run_to_end(&mut session);

        assert_eq!(session.sequencer().current_index(), Some(2));
        assert_eq!(session.primitive().current_time(), 0.0);
    }

    #[test]
    fn test_shuffle_visits_every_track_once() {
        let mut session = session(&["a", "b", "c", "d", "e"]);
        session.play_index(3).expect("play");
        assert!(session.toggle_shuffle());
        assert_eq!(session.sequencer().shuffle_order()[0], 3);

        let mut visited = vec![3];
        for _ in 0..4 {
            visited.push(session.next().expect("next"));
        }
        visited.sort_unstable();
        assert_eq!(visited, vec![0, 1, 2, 3, 4]);
        assert_eq!(session.store().get_bool(KEY_SHUFFLE), Some(true));
    }

    #[test]
    fn test_suspended_context_is_resumed_on_play() {
        let mut session =
            session_with_store(&["a"], SessionStore::in_memory(), HeadlessPlayback::suspended());
        session.play_index(0).expect("recovered play");
        assert_eq!(session.track_state(), TrackState::Playing);
    }

    #[test]
    fn test_refused_play_is_reported_and_session_recovers() {
        let mut session = session(&["a", "b"]);
        session.primitive_mut().fail_next_plays(2);

        assert!(matches!(
            session.play_index(0),
            Err(PlayerError::PlaybackFailure(_))
        ));
        assert_eq!(session.sequencer().current_index(), Some(0));
        assert!(!session.now_playing().is_playing);

        assert!(session.toggle_play_pause());
        assert_eq!(session.track_state(), TrackState::Playing);
    }

    #[test]
    fn test_toggle_play_pause_pauses_and_resumes() {
        let mut session = session(&["a"]);
        assert!(session.toggle_play_pause());
        assert!(!session.toggle_play_pause());
        assert_eq!(session.track_state(), TrackState::Paused);
        assert!(session.toggle_play_pause());
    }

    #[test]
    fn test_init_restores_saved_session() {
        let mut store = SessionStore::in_memory();
        store.set_i64(KEY_CURRENT_SONG, 1);
        store.set_bool(KEY_SHUFFLE, true);
        store.set_bool(KEY_LOOP, true);
        store.set_str(KEY_THEME, "light");
        store.set_f64(KEY_VOLUME, 0.5);

        let session = session_with_store(&["a", "b", "c"], store, HeadlessPlayback::new());

        assert_eq!(session.sequencer().current_index(), Some(1));
        assert_eq!(session.sequencer().shuffle_order()[0], 1);
        assert!(session.sequencer().is_loop_enabled());
        assert_eq!(session.theme(), Theme::Light);
        assert_eq!(session.primitive().volume(), 0.5);
        assert_eq!(session.now_playing().name.as_deref(), Some("b"));
        assert!(session.now_playing().is_playing);
    }

    #[test]
    fn test_init_ignores_out_of_range_saved_track() {
        let mut store = SessionStore::in_memory();
        store.set_i64(KEY_CURRENT_SONG, 7);

        let session = session_with_store(&["a"], store, HeadlessPlayback::new());

        assert_eq!(session.sequencer().current_index(), None);
        assert!(!session.primitive().has_source());
    }

    #[test]
    fn test_preferences_are_persisted() {
        let mut session = session(&[]);
        assert_eq!(session.set_volume(1.5), 1.0);
        assert_eq!(session.set_volume(0.3), 0.3);
        assert_eq!(session.toggle_theme(), Theme::Light);
        assert!(session.toggle_loop());

        assert_eq!(session.store().get_f64(KEY_VOLUME), Some(f64::from(0.3f32)));
        assert_eq!(session.store().get_str(KEY_THEME).as_deref(), Some("light"));
        assert_eq!(session.store().get_bool(KEY_LOOP), Some(true));
        assert_eq!(session.primitive().volume(), 0.3);
    }

    #[test]
    fn test_seek_and_progress_need_a_source() {
        let mut session = session(&["a"]);
        assert_eq!(session.seek_to_fraction(0.5), None);
        assert_eq!(session.progress(), None);

        session.play_index(0).expect("play");
        assert_eq!(session.seek_to_fraction(0.5), Some(1.0));
        let progress = session.progress().expect("progress");
        assert_eq!(progress.current, "0:01");
        assert_eq!(progress.total, "0:02");
        assert_eq!(progress.percent, 50.0);
    }

    #[test]
    fn test_upload_extends_sequencer_and_search_matches() {
        let mut session = session(&["Alpha"]);
        let report = session.upload(vec![audio("alphabet"), audio("Beta")]);
        assert_eq!(report.stored.len(), 2);
        assert_eq!(session.sequencer().song_count(), 3);
        assert_eq!(session.set_search_query("ALPHA"), vec![0, 1]);
        assert_eq!(session.search_query(), "ALPHA");
    }

    #[test]
    fn test_teardown_releases_handles() {
        let mut session = session(&["a", "b"]);
        session.play_index(0).expect("play");
        assert_eq!(session.teardown(), 2);
        assert!(!session.primitive().has_source());
        assert_eq!(session.library().live_handle_count(), 0);
    }
}
