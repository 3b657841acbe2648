use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::broadcast;

use echo_player::{
    config::{sanitize_config, Config},
    db_manager::DbManager,
    library::{library_manager::Library, library_store::LibraryStore},
    media_file_discovery::read_upload_batch,
    offline_cache::{OfflineShell, ShellCache, UreqFetcher},
    playback::{output::CpalPlayback, sequencer::Sequencer},
    protocol::{LibraryMessage, Message, SessionMessage},
    session::PlayerSession,
    session_manager::{wait_for_reply, SessionManager},
    session_store::SessionStore,
};

const APP_DIR_NAME: &str = "echo-player";
const MANAGER_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

fn load_or_create_config(config_file: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    if !config_file.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        if let Some(parent) = config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_file, toml::to_string(&Config::default())?)?;
    }

    let config_content = std::fs::read_to_string(config_file)?;
    let parsed = toml::from_str::<Config>(&config_content).unwrap_or_else(|err| {
        warn!(
            "Failed to parse {} ({}). Using defaults",
            config_file.display(),
            err
        );
        Config::default()
    });
    Ok(sanitize_config(parsed))
}

fn refresh_offline_shell(config: &Config, data_dir: &Path) {
    if config.offline.origin.is_empty() {
        debug!("No offline origin configured. Skipping shell install");
        return;
    }

    let cache = match ShellCache::open(&data_dir.join("shell-cache.db")) {
        Ok(cache) => cache,
        Err(err) => {
            log::error!("Failed to open shell cache: {}", err);
            return;
        }
    };
    let mut shell = OfflineShell::new(
        cache,
        UreqFetcher::new(&config.offline.origin),
        &config.offline,
    );
    match shell.install() {
        Ok(count) => info!("Offline shell cached {} assets", count),
        Err(err) => warn!("Offline shell install failed: {}", err),
    }
    match shell.activate() {
        Ok(removed) if !removed.is_empty() => info!("Removed stale shell caches: {:?}", removed),
        Ok(_) => {}
        Err(err) => warn!("Offline shell activation failed: {}", err),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Debug);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_dir = dirs::config_dir()
        .ok_or("could not determine config directory")?
        .join(APP_DIR_NAME);
    let data_dir = dirs::data_dir()
        .ok_or("could not determine data directory")?
        .join(APP_DIR_NAME);
    let config = load_or_create_config(&config_dir.join("config.toml"))?;

    let db_manager = DbManager::new(&data_dir.join(&config.library.database_file))?
        .with_content_quota(config.library.max_content_bytes);
    refresh_offline_shell(&config, &data_dir);
    let session_store = SessionStore::open(&data_dir.join("session.toml"));

    // Bus for communication between components
    let (bus_sender, _) = broadcast::channel(1024);
    let mut receiver = bus_sender.subscribe();

    let manager_bus_sender = bus_sender.clone();
    let manager_bus_receiver = bus_sender.subscribe();
    let playback_config = config.playback.clone();
    let manager_thread = thread::Builder::new()
        .name("session-manager".to_string())
        .spawn(move || {
            let session = PlayerSession::init(
                Library::new(LibraryStore::new(db_manager)),
                Sequencer::new(),
                CpalPlayback::new(manager_bus_sender.clone()),
                session_store,
                &playback_config,
            );
            let mut manager = SessionManager::new(session, manager_bus_receiver, manager_bus_sender);
            manager.run();
        })?;

    if wait_for_reply(&mut receiver, &manager_thread, MANAGER_REPLY_TIMEOUT, |message| {
        matches!(message, Message::Session(SessionMessage::Ready))
    })
    .is_none()
    {
        log::error!("Session manager did not start");
        if manager_thread.join().is_err() {
            log::error!("Session manager thread terminated due to panic");
        }
        return Err("session manager did not start".into());
    }

    let args: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    let (files, unreadable) = read_upload_batch(&args);
    for failure in &unreadable {
        warn!("Skipping {}: {}", failure.name, failure.reason);
    }

    if !files.is_empty() {
        info!("Uploading {} files", files.len());
        let _ = bus_sender.send(Message::Library(LibraryMessage::UploadFiles(files)));
        if let Some(Message::Library(LibraryMessage::UploadFinished { stored, failed })) =
            wait_for_reply(&mut receiver, &manager_thread, MANAGER_REPLY_TIMEOUT, |message| {
                matches!(
                    message,
                    Message::Library(LibraryMessage::UploadFinished { .. })
                )
            })
        {
            info!("Stored {} songs", stored.len());
            for failure in failed {
                warn!("Failed to store {}: {}", failure.name, failure.reason);
            }
        }
    }

    let _ = bus_sender.send(Message::Library(LibraryMessage::RequestSongs));
    if let Some(Message::Library(LibraryMessage::SongsChanged(songs))) =
        wait_for_reply(&mut receiver, &manager_thread, MANAGER_REPLY_TIMEOUT, |message| {
            matches!(message, Message::Library(LibraryMessage::SongsChanged(_)))
        })
    {
        info!("Library holds {} songs", songs.len());
        for (position, song) in songs.iter().enumerate() {
            info!(
                "  {:>3}  {}  ({} bytes, {}, uploaded {})",
                position, song.title(), song.size, song.mime_type, song.uploaded_at
            );
        }
    }

    let _ = bus_sender.send(Message::Session(SessionMessage::Shutdown));
    if manager_thread.join().is_err() {
        log::error!("Session manager thread terminated due to panic");
    }
    Ok(())
}
