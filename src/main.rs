mod artwork_store;
mod bridge;
mod changer_manager;
mod config;
mod console;
mod errors;
mod now_playing_poller;
mod persistence;
mod playback_mode;
mod protocol;
mod reconciler;
mod slots;

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use artwork_store::ArtworkStore;
use bridge::{apple_music::AppleMusicBridge, MusicBridge};
use changer_manager::{ChangerManager, ChangerServices};
use config::{parse_config, Config};
use console::Console;
use log::{error, info, warn};
use now_playing_poller::NowPlayingPoller;
use playback_mode::ModeEngine;
use tokio::sync::broadcast;

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

fn log_level() -> log::LevelFilter {
    std::env::var("FIVEDISC_LOG")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(log::LevelFilter::Debug)
}

fn load_or_create_config(config_file: &Path) -> Config {
    if !config_file.exists() {
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        let written = config_file
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .map_err(|err| err.to_string())
            .and_then(|_| toml::to_string(&Config::default()).map_err(|err| err.to_string()))
            .and_then(|text| std::fs::write(config_file, text).map_err(|err| err.to_string()));
        if let Err(err) = written {
            warn!("Could not write default config {}: {}", config_file.display(), err);
        }
    }

    match std::fs::read_to_string(config_file) {
        Ok(text) => parse_config(&text).unwrap_or_else(|err| {
            warn!("Ignoring invalid config {}: {}", config_file.display(), err);
            Config::default()
        }),
        Err(err) => {
            warn!("Could not read config {}: {}", config_file.display(), err);
            Config::default()
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log_level());
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_file = config::config_root().map(|root| root.join("config.toml"));
    let config = match &config_file {
        Some(path) => load_or_create_config(path),
        None => {
            warn!("No config directory available, using defaults");
            Config::default()
        }
    };

    let data_root = config::data_root().unwrap_or_else(|| std::env::temp_dir().join("fivedisc"));
    let state_file = config
        .state_file()
        .unwrap_or_else(|| data_root.join("state.json"));
    info!("Changer state file: {}", state_file.display());
    let restored = persistence::load_state(&state_file);
    let (persistence, persistence_writer) = persistence::spawn_persistence_writer(
        state_file,
        Duration::from_millis(config.storage.persist_debounce_ms),
    );

    let bridge: Arc<dyn MusicBridge> =
        Arc::new(AppleMusicBridge::new(&config.playback.queue_playlist_name));
    let poll_in_flight = Arc::new(AtomicBool::new(false));

    // Bus for communication between components
    let (bus_sender, _) = broadcast::channel(1024);

    // Subscribe the printer first so it sees the manager's initial snapshot.
    let console = Console::new(bus_sender.clone(), config_file);
    let printer = console.spawn_printer(bus_sender.subscribe());

    // Setup changer manager
    let manager_bus_receiver = bus_sender.subscribe();
    let manager_bus_sender = bus_sender.clone();
    let services = ChangerServices {
        bridge: Arc::clone(&bridge),
        artwork_store: ArtworkStore::new(data_root.join("artwork")),
        persistence: Some(persistence),
        poll_in_flight: Arc::clone(&poll_in_flight),
    };
    let engine = ModeEngine::new(
        config.playback.swap_delay_min_ms,
        config.playback.swap_delay_max_ms,
    );
    let manager_config = config.clone();
    let manager = thread::Builder::new()
        .name("changer-manager".to_string())
        .spawn(move || {
            let run_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let mut changer_manager = ChangerManager::new(
                    restored,
                    &manager_config,
                    engine,
                    services,
                    manager_bus_receiver,
                    manager_bus_sender,
                );
                changer_manager.run();
            }));
            if let Err(payload) = run_result {
                log::error!(
                    "ChangerManager thread terminated due to panic: {}",
                    panic_payload_to_string(payload.as_ref())
                );
            }
        })?;

    // Setup now-playing poller
    let poller_bus_receiver = bus_sender.subscribe();
    let poller_bus_sender = bus_sender.clone();
    let poll_interval = Duration::from_millis(config.polling.poll_interval_ms);
    let poller = thread::Builder::new()
        .name("now-playing-poller".to_string())
        .spawn(move || {
            let mut poller = NowPlayingPoller::new(
                bridge,
                poll_interval,
                poll_in_flight,
                poller_bus_receiver,
                poller_bus_sender,
            );
            poller.run();
        })?;

    console.run(std::io::stdin().lock())?;

    for (name, handle) in [("manager", manager), ("poller", poller), ("printer", printer)] {
        if handle.join().is_err() {
            error!("{} thread did not shut down cleanly", name);
        }
    }
    // The writer drains once the manager's handle is gone.
    if persistence_writer.join().is_err() {
        error!("persistence writer did not shut down cleanly");
    }

    info!("Application exiting");
    Ok(())
}
