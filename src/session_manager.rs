use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};
use tokio::sync::broadcast::{error::TryRecvError, Receiver, Sender};

use crate::{
    library::library_store::LibraryBackend,
    playback::primitive::{PlaybackEvent, PlaybackPrimitive},
    protocol,
    session::PlayerSession,
};

// Drives the player session from bus commands
pub struct SessionManager<B: LibraryBackend, P: PlaybackPrimitive> {
    session: PlayerSession<B, P>,
    bus_consumer: Receiver<protocol::Message>,
    bus_producer: Sender<protocol::Message>,
}

impl<B: LibraryBackend, P: PlaybackPrimitive> SessionManager<B, P> {
    pub fn new(
        session: PlayerSession<B, P>,
        bus_consumer: Receiver<protocol::Message>,
        bus_producer: Sender<protocol::Message>,
    ) -> Self {
        Self {
            session,
            bus_consumer,
            bus_producer,
        }
    }

    fn publish(&self, message: protocol::Message) {
        let _ = self.bus_producer.send(message);
    }

    fn broadcast_songs_changed(&self) {
        self.publish(protocol::Message::Library(
            protocol::LibraryMessage::SongsChanged(self.session.songs()),
        ));
        if !self.session.search_query().is_empty() {
            self.publish(protocol::Message::Library(
                protocol::LibraryMessage::SearchResults(
                    self.session.library().search(self.session.search_query()),
                ),
            ));
        }
    }

    fn broadcast_now_playing(&self) {
        let now_playing = self.session.now_playing();
        self.publish(protocol::Message::Playback(
            protocol::PlaybackMessage::NowPlaying {
                index: now_playing.index,
                name: now_playing.name,
                is_playing: now_playing.is_playing,
                shuffle_enabled: now_playing.shuffle_enabled,
                loop_enabled: now_playing.loop_enabled,
            },
        ));
    }

    fn broadcast_progress(&self) {
        if let Some(progress) = self.session.progress() {
            self.publish(protocol::Message::Playback(
                protocol::PlaybackMessage::Progress {
                    current: progress.current,
                    total: progress.total,
                    percent: progress.percent,
                },
            ));
        }
    }

    fn handle_library_message(&mut self, message: protocol::LibraryMessage) {
        match message {
            protocol::LibraryMessage::UploadFiles(files) => {
                debug!("SessionManager: uploading {} files", files.len());
                let report = self.session.upload(files);
                self.publish(protocol::Message::Library(
                    protocol::LibraryMessage::UploadFinished {
                        stored: report.stored,
                        failed: report.failed,
                    },
                ));
                self.broadcast_songs_changed();
                self.broadcast_now_playing();
            }
            protocol::LibraryMessage::DeleteSong(position) => {
                match self.session.delete_song(position) {
                    Ok(removed) => {
                        debug!("SessionManager: deleted {}", removed.name);
                        self.broadcast_songs_changed();
                        self.broadcast_now_playing();
                    }
                    Err(err) => warn!("SessionManager: delete at {} failed: {}", position, err),
                }
            }
            protocol::LibraryMessage::SetSearchQuery(query) => {
                let matches = self.session.set_search_query(&query);
                self.publish(protocol::Message::Library(
                    protocol::LibraryMessage::SearchResults(matches),
                ));
            }
            protocol::LibraryMessage::RequestSongs => self.broadcast_songs_changed(),
            _ => trace!("SessionManager: ignoring library notification"),
        }
    }

    fn handle_playback_message(&mut self, message: protocol::PlaybackMessage) {
        match message {
            protocol::PlaybackMessage::PlayIndex(index) => {
                if let Err(err) = self.session.play_index(index) {
                    debug!("SessionManager: play {} did nothing: {}", index, err);
                }
                self.broadcast_now_playing();
            }
            protocol::PlaybackMessage::TogglePlayPause => {
                self.session.toggle_play_pause();
                self.broadcast_now_playing();
            }
            protocol::PlaybackMessage::Next => {
                self.session.next();
                self.broadcast_now_playing();
            }
            protocol::PlaybackMessage::Previous => {
                self.session.previous();
                self.broadcast_now_playing();
            }
            protocol::PlaybackMessage::SeekToFraction(fraction) => {
                if self.session.seek_to_fraction(fraction).is_some() {
                    self.broadcast_progress();
                }
            }
            protocol::PlaybackMessage::SetVolume(volume) => {
                self.session.set_volume(volume);
            }
            protocol::PlaybackMessage::ToggleShuffle => {
                self.session.toggle_shuffle();
                self.broadcast_now_playing();
            }
            protocol::PlaybackMessage::ToggleLoop => {
                self.session.toggle_loop();
                self.broadcast_now_playing();
            }
            protocol::PlaybackMessage::PrimitiveEvent(PlaybackEvent::TimeUpdate { .. }) => {
                self.broadcast_progress();
            }
            protocol::PlaybackMessage::PrimitiveEvent(event) => {
                self.session.handle_event(event);
                self.broadcast_now_playing();
            }
            _ => trace!("SessionManager: ignoring playback notification"),
        }
    }

    pub fn run(&mut self) {
        self.broadcast_songs_changed();
        self.broadcast_now_playing();
        self.publish(protocol::Message::Session(
            protocol::SessionMessage::ThemeChanged(self.session.theme()),
        ));
        self.publish(protocol::Message::Session(protocol::SessionMessage::Ready));

        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => match message {
                    protocol::Message::Library(message) => self.handle_library_message(message),
                    protocol::Message::Playback(message) => {
                        self.handle_playback_message(message)
                    }
                    protocol::Message::Session(protocol::SessionMessage::ToggleTheme) => {
                        let theme = self.session.toggle_theme();
                        self.publish(protocol::Message::Session(
                            protocol::SessionMessage::ThemeChanged(theme),
                        ));
                    }
                    protocol::Message::Session(protocol::SessionMessage::Shutdown) => {
                        let released = self.session.teardown();
                        info!("SessionManager: shut down, released {} handles", released);
                        break;
                    }
                    protocol::Message::Session(_) => {
                        trace!("SessionManager: ignoring session notification")
                    }
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("SessionManager: bus lagged, skipped {} messages", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    error!("SessionManager: bus closed");
                    break;
                }
            }
        }
    }
}

/// Waits for a bus message matching `predicate`. Returns `None` once the
/// manager thread has exited, the bus is closed, or `timeout` passes.
pub fn wait_for_reply<F>(
    receiver: &mut Receiver<protocol::Message>,
    manager_thread: &JoinHandle<()>,
    timeout: Duration,
    mut predicate: F,
) -> Option<protocol::Message>
where
    F: FnMut(&protocol::Message) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        match receiver.try_recv() {
            Ok(message) if predicate(&message) => return Some(message),
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Closed) => return None,
            Err(TryRecvError::Empty) => {
                if manager_thread.is_finished() {
                    warn!("SessionManager: thread exited before replying");
                    return None;
                }
                if Instant::now() >= deadline {
                    warn!("SessionManager: timed out waiting for a reply");
                    return None;
                }
                thread::sleep(Duration::from_millis(5));
            }
        }
    }
}
