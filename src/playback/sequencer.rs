//! Track ordering under linear, shuffle, and loop modes.
//!
//! The sequencer does no I/O. It only answers which list position plays next
//! and keeps its view of the list consistent when songs are removed.

use log::{trace, warn};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// What to do once the current track finishes on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEndedAction {
    /// Loop mode: restart the current track from the beginning.
    ReplayCurrent,
    Advance(usize),
    /// Nothing left to play.
    Stop,
}

/// How removing a list position affected the current track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalEffect {
    Unaffected,
    /// The current track moved down to the given position.
    Shifted { current: usize },
    /// The current track itself was removed.
    CurrentRemoved,
}

pub struct Sequencer {
    song_count: usize,
    current_index: Option<usize>,
    shuffle_enabled: bool,
    loop_enabled: bool,
    shuffle_order: Vec<usize>,
    rng: StdRng,
}

impl Sequencer {
    pub fn new() -> Self {
        let mut seed = [0u8; 32];
        if let Err(err) = getrandom::fill(&mut seed) {
            warn!("Failed to gather random seed ({}). Falling back to clock seed", err);
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|elapsed| elapsed.as_nanos())
                .unwrap_or_default();
            seed[..16].copy_from_slice(&nanos.to_le_bytes());
        }
        Self::with_seed(seed)
    }

    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            song_count: 0,
            current_index: None,
            shuffle_enabled: false,
            loop_enabled: false,
            shuffle_order: Vec::new(),
            rng: StdRng::from_seed(seed),
        }
    }

    pub fn song_count(&self) -> usize {
        self.song_count
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    /// Out-of-range positions clear the current track.
    pub fn set_current_index(&mut self, index: Option<usize>) {
        self.current_index = index.filter(|&i| i < self.song_count);
    }

    pub fn is_shuffle_enabled(&self) -> bool {
        self.shuffle_enabled
    }

    pub fn is_loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn shuffle_order(&self) -> &[usize] {
        &self.shuffle_order
    }

    /// Updates the list length. A shuffle order in use is regenerated.
    pub fn set_song_count(&mut self, count: usize) {
        if self.song_count == count && self.order_matches_count() {
            return;
        }
        self.song_count = count;
        if self.current_index.is_some_and(|i| i >= count) {
            self.current_index = None;
        }
        if self.shuffle_enabled {
            self.regenerate_shuffle_order(count);
        }
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        if self.shuffle_enabled == enabled {
            return;
        }
        self.shuffle_enabled = enabled;
        if enabled {
            self.regenerate_shuffle_order(self.song_count);
        } else {
            // Linear mode is driven by current_index alone.
            self.shuffle_order.clear();
        }
    }

    pub fn toggle_shuffle(&mut self) -> bool {
        self.set_shuffle(!self.shuffle_enabled);
        self.shuffle_enabled
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.loop_enabled = !self.loop_enabled;
        self.loop_enabled
    }

    pub fn next_index(&self) -> Option<usize> {
        if self.song_count == 0 {
            return None;
        }

        if self.shuffle_enabled && self.order_matches_count() {
            let position = self
                .current_index
                .and_then(|current| self.shuffle_order.iter().position(|&i| i == current));
            return match position {
                Some(position) if position + 1 < self.shuffle_order.len() => {
                    Some(self.shuffle_order[position + 1])
                }
                _ => self.shuffle_order.first().copied(),
            };
        }

        match self.current_index {
            Some(current) if current + 1 < self.song_count => Some(current + 1),
            _ => Some(0),
        }
    }

    pub fn prev_index(&self) -> Option<usize> {
        if self.song_count == 0 {
            return None;
        }

        if self.shuffle_enabled && self.order_matches_count() {
            let position = self
                .current_index
                .and_then(|current| self.shuffle_order.iter().position(|&i| i == current));
            return match position {
                Some(position) if position > 0 => Some(self.shuffle_order[position - 1]),
                _ => self.shuffle_order.last().copied(),
            };
        }

        match self.current_index {
            Some(current) if current > 0 && current < self.song_count => Some(current - 1),
            _ => Some(self.song_count - 1),
        }
    }

    /// Draws a fresh uniform permutation of `0..count`. A valid current track
    /// is moved to the front so advancing never replays it immediately.
    pub fn regenerate_shuffle_order(&mut self, count: usize) {
        let mut order: Vec<usize> = (0..count).collect();
        order.shuffle(&mut self.rng);

        if let Some(current) = self.current_index.filter(|&i| i < count) {
            if let Some(position) = order.iter().position(|&i| i == current) {
                order.remove(position);
                order.insert(0, current);
            }
        }

        trace!("Sequencer: new shuffle order {:?}", order);
        self.shuffle_order = order;
    }

    pub fn on_track_ended(&self) -> TrackEndedAction {
        if self.loop_enabled && self.current_index.is_some() {
            return TrackEndedAction::ReplayCurrent;
        }
        match self.next_index() {
            Some(next) => TrackEndedAction::Advance(next),
            None => TrackEndedAction::Stop,
        }
    }

    /// Applies the removal of `position` from the list to the index space.
    pub fn on_song_removed(&mut self, position: usize) -> RemovalEffect {
        if position >= self.song_count {
            return RemovalEffect::Unaffected;
        }

        self.song_count -= 1;
        let effect = match self.current_index {
            Some(current) if current == position => {
                self.current_index = None;
                RemovalEffect::CurrentRemoved
            }
            Some(current) if current > position => {
                self.current_index = Some(current - 1);
                RemovalEffect::Shifted {
                    current: current - 1,
                }
            }
            _ => RemovalEffect::Unaffected,
        };

        if self.shuffle_enabled {
            self.regenerate_shuffle_order(self.song_count);
        }
        effect
    }

    fn order_matches_count(&self) -> bool {
        !self.shuffle_enabled || self.shuffle_order.len() == self.song_count
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}
