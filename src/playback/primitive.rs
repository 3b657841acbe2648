//! Contract with the audio playback primitive, plus a headless implementation
//! used as a test double. The device-backed primitive lives in `output`.

use std::sync::Arc;

use log::{debug, warn};

use crate::error::PlayerError;
use crate::library::handles::PlayableHandle;

/// Events emitted by a playback primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Play,
    Pause,
    Ended,
    TimeUpdate {
        current_secs: f64,
        duration_secs: f64,
    },
    Error(String),
}

/// Lifecycle of the track loaded into the primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    #[default]
    Stopped,
    Playing,
    Paused,
    Ended,
}

impl TrackState {
    pub fn on_event(self, event: &PlaybackEvent) -> TrackState {
        match event {
            PlaybackEvent::Play => TrackState::Playing,
            PlaybackEvent::Pause if self == TrackState::Playing => TrackState::Paused,
            PlaybackEvent::Pause => self,
            PlaybackEvent::Ended => TrackState::Ended,
            PlaybackEvent::Error(_) => TrackState::Stopped,
            PlaybackEvent::TimeUpdate { .. } => self,
        }
    }
}

/// Everything the primitive needs to start reading a stored blob.
#[derive(Debug, Clone)]
pub struct PlaybackSource {
    pub handle: PlayableHandle,
    pub mime_type: String,
    pub data: Arc<[u8]>,
}

pub trait PlaybackPrimitive {
    fn set_source(&mut self, source: PlaybackSource);
    fn clear_source(&mut self);
    fn play(&mut self) -> Result<(), PlayerError>;
    fn pause(&mut self);
    fn is_paused(&self) -> bool;
    fn has_source(&self) -> bool;
    fn seek(&mut self, position_secs: f64);
    fn current_time(&self) -> f64;
    /// `None` until the source's duration is known.
    fn duration(&self) -> Option<f64>;
    fn set_volume(&mut self, volume: f32);
    /// Resumes a suspended output context so a retried `play` can succeed.
    fn resume_context(&mut self) -> Result<(), PlayerError>;
}

/// Starts playback, resuming the output context and retrying once on failure.
pub fn play_with_recovery<P: PlaybackPrimitive + ?Sized>(
    primitive: &mut P,
) -> Result<(), PlayerError> {
    match primitive.play() {
        Ok(()) => Ok(()),
        Err(first_err) => {
            warn!("Playback refused ({}). Resuming context and retrying", first_err);
            primitive.resume_context()?;
            primitive.play()
        }
    }
}

/// Assumed decode rate used to estimate durations without decoding.
const HEADLESS_BYTES_PER_SECOND: f64 = 16_000.0;

/// A primitive with no audio device: it tracks position in simulated time and
/// reports events through [`HeadlessPlayback::drain_events`].
#[derive(Debug, Default)]
pub struct HeadlessPlayback {
    source: Option<PlaybackSource>,
    paused: bool,
    position_secs: f64,
    volume: f32,
    suspended: bool,
    failing_plays: usize,
    events: Vec<PlaybackEvent>,
}

impl HeadlessPlayback {
    pub fn new() -> Self {
        Self {
            paused: true,
            volume: 1.0,
            ..Self::default()
        }
    }

    /// Starts with a suspended context; `play` fails until it is resumed.
    pub fn suspended() -> Self {
        Self {
            suspended: true,
            ..Self::new()
        }
    }

    /// Makes the next `count` play attempts fail regardless of context state.
    pub fn fail_next_plays(&mut self, count: usize) {
        self.failing_plays = count;
    }

    pub fn source(&self) -> Option<&PlaybackSource> {
        self.source.as_ref()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn drain_events(&mut self) -> Vec<PlaybackEvent> {
        std::mem::take(&mut self.events)
    }

    /// Moves simulated time forward while playing. Emits `Ended` once the
    /// position reaches the duration.
    pub fn advance(&mut self, secs: f64) {
        if self.paused || self.source.is_none() {
            return;
        }
        let Some(duration) = self.duration() else {
            return;
        };
        self.position_secs = (self.position_secs + secs).min(duration);
        self.events.push(PlaybackEvent::TimeUpdate {
            current_secs: self.position_secs,
            duration_secs: duration,
        });
        if self.position_secs >= duration {
            self.paused = true;
            self.events.push(PlaybackEvent::Ended);
        }
    }
}

impl PlaybackPrimitive for HeadlessPlayback {
    fn set_source(&mut self, source: PlaybackSource) {
        debug!("HeadlessPlayback: source {}", source.handle);
        self.source = Some(source);
        self.position_secs = 0.0;
        self.paused = true;
    }

    fn clear_source(&mut self) {
        self.source = None;
        self.position_secs = 0.0;
        self.paused = true;
    }

    fn play(&mut self) -> Result<(), PlayerError> {
        if self.source.is_none() {
            return Err(PlayerError::PlaybackFailure("no source loaded".to_string()));
        }
        if self.failing_plays > 0 {
            self.failing_plays -= 1;
            return Err(PlayerError::PlaybackFailure(
                "unsupported source".to_string(),
            ));
        }
        if self.suspended {
            return Err(PlayerError::PlaybackFailure(
                "output context is suspended".to_string(),
            ));
        }
        self.paused = false;
        self.events.push(PlaybackEvent::Play);
        Ok(())
    }

    fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            self.events.push(PlaybackEvent::Pause);
        }
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn has_source(&self) -> bool {
        self.source.is_some()
    }

    fn seek(&mut self, position_secs: f64) {
        let upper = self.duration().unwrap_or(0.0);
        self.position_secs = position_secs.clamp(0.0, upper);
    }

    fn current_time(&self) -> f64 {
        self.position_secs
    }

    fn duration(&self) -> Option<f64> {
        self.source
            .as_ref()
            .map(|source| source.data.len() as f64 / HEADLESS_BYTES_PER_SECOND)
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    fn resume_context(&mut self) -> Result<(), PlayerError> {
        self.suspended = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::handles::HandleRegistry;

    fn source(bytes: usize) -> PlaybackSource {
        let mut registry = HandleRegistry::new();
        let data = vec![0u8; bytes];
        let handle = registry.mint(data.clone());
        PlaybackSource {
            handle,
            mime_type: "audio/wav".to_string(),
            data: Arc::from(data),
        }
    }

    #[test]
    fn test_track_state_transitions() {
        let state = TrackState::Stopped.on_event(&PlaybackEvent::Play);
        assert_eq!(state, TrackState::Playing);
        let state = state.on_event(&PlaybackEvent::Pause);
        assert_eq!(state, TrackState::Paused);
        let state = state.on_event(&PlaybackEvent::Play);
        assert_eq!(state, TrackState::Playing);
        let state = state.on_event(&PlaybackEvent::Ended);
        assert_eq!(state, TrackState::Ended);
        assert_eq!(
            TrackState::Stopped.on_event(&PlaybackEvent::Pause),
            TrackState::Stopped
        );
        assert_eq!(
            TrackState::Playing.on_event(&PlaybackEvent::Error("codec".to_string())),
            TrackState::Stopped
        );
    }

    #[test]
    fn test_recovery_resumes_suspended_context() {
        let mut playback = HeadlessPlayback::suspended();
        playback.set_source(source(16_000));

        play_with_recovery(&mut playback).expect("retry after resume should succeed");
        assert!(!playback.is_paused());
        assert_eq!(playback.drain_events(), vec![PlaybackEvent::Play]);
    }

    #[test]
    fn test_recovery_gives_up_after_one_retry() {
        let mut playback = HeadlessPlayback::new();
        playback.set_source(source(16_000));
        playback.fail_next_plays(2);

        let err = play_with_recovery(&mut playback).expect_err("second failure surfaces");
        assert!(matches!(err, PlayerError::PlaybackFailure(_)));
        assert!(playback.is_paused());
    }

    #[test]
    fn test_advance_emits_ended_at_duration() {
        let mut playback = HeadlessPlayback::new();
        playback.set_source(source(32_000));
        playback.play().expect("play");
        playback.drain_events();

        playback.advance(1.5);
        playback.advance(1.5);

        let events = playback.drain_events();
        assert_eq!(events.last(), Some(&PlaybackEvent::Ended));
        assert!((playback.current_time() - 2.0).abs() < f64::EPSILON);
        assert!(playback.is_paused());
    }

    #[test]
    fn test_seek_is_clamped_to_duration() {
        let mut playback = HeadlessPlayback::new();
        playback.set_source(source(16_000));
        playback.seek(10.0);
        assert!((playback.current_time() - 1.0).abs() < f64::EPSILON);
        playback.seek(-3.0);
        assert_eq!(playback.current_time(), 0.0);
    }
}
