//! Single owner of the changer state.
//!
//! The manager consumes intents, worker results and poll observations from the
//! bus one at a time. Anything that talks to the player runs on a short-lived
//! worker thread and reports back through the bus, so the loop itself never
//! blocks on the bridge.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use tokio::sync::broadcast::{error::RecvError, Receiver, Sender};

use crate::artwork_store::ArtworkStore;
use crate::bridge::{BridgeError, MusicBridge, Observation, Suggestion, SuggestionKind};
use crate::config::{sanitize_config, Config};
use crate::errors::ChangerError;
use crate::persistence::{PersistedState, PersistenceHandle};
use crate::playback_mode::{ModeEngine, NoEligibleTarget, PlayTarget, PlaybackMode, PlaybackState};
use crate::protocol::{
    self, ChangerMessage, ChangerSnapshot, ConfigMessage, NowPlayingMessage, PresentationMessage,
    TransportCommand, WorkerMessage,
};
use crate::reconciler::{self, NowPlaying, TrackEndDetector};
use crate::slots::{is_valid_slot_index, DiscSlotStore, LoadedDisc, SLOT_COUNT};

/// Collaborators the manager drives but does not own the state of.
pub struct ChangerServices {
    pub bridge: Arc<dyn MusicBridge>,
    pub artwork_store: ArtworkStore,
    pub persistence: Option<PersistenceHandle>,
    /// Shared with the poller; set while an observation is waiting to be applied.
    pub poll_in_flight: Arc<AtomicBool>,
}

#[derive(Debug, Clone)]
struct SearchSettings {
    debounce: Duration,
    min_query_chars: usize,
    result_limit: usize,
}

impl From<&Config> for SearchSettings {
    fn from(config: &Config) -> Self {
        Self {
            debounce: Duration::from_millis(config.search.debounce_ms),
            min_query_chars: config.search.min_query_chars,
            result_limit: config.search.result_limit,
        }
    }
}

enum LoadRequest {
    Current,
    Album { title: String, artist: Option<String> },
    Playlist(String),
}

impl LoadRequest {
    fn execute(&self, bridge: &dyn MusicBridge) -> Result<LoadedDisc, BridgeError> {
        match self {
            LoadRequest::Current => bridge.load_current_album_or_playlist(),
            LoadRequest::Album { title, artist } => bridge.load_album(title, artist.as_deref()),
            LoadRequest::Playlist(playlist_id) => bridge.load_playlist(playlist_id),
        }
    }
}

pub struct ChangerManager {
    slots: DiscSlotStore,
    playback: PlaybackState,
    now_playing: NowPlaying,
    suggestions: Vec<Suggestion>,
    engine: ModeEngine,
    detector: TrackEndDetector,
    services: ChangerServices,
    search: SearchSettings,
    latest_search: Option<(SuggestionKind, String)>,
    search_generation: Arc<AtomicU64>,
    load_generations: [u64; SLOT_COUNT],
    play_generation: Arc<AtomicU64>,
    bus_consumer: Receiver<protocol::Message>,
    bus_producer: Sender<protocol::Message>,
}

impl ChangerManager {
    pub fn new(
        restored: (DiscSlotStore, PlaybackState),
        config: &Config,
        engine: ModeEngine,
        services: ChangerServices,
        bus_consumer: Receiver<protocol::Message>,
        bus_producer: Sender<protocol::Message>,
    ) -> Self {
        let (slots, playback) = restored;
        Self {
            slots,
            playback,
            now_playing: NowPlaying::default(),
            suggestions: Vec::new(),
            engine,
            detector: TrackEndDetector::default(),
            services,
            search: SearchSettings::from(config),
            latest_search: None,
            search_generation: Arc::new(AtomicU64::new(0)),
            load_generations: [0; SLOT_COUNT],
            play_generation: Arc::new(AtomicU64::new(0)),
            bus_consumer,
            bus_producer,
        }
    }

    pub fn run(&mut self) {
        info!(
            "ChangerManager: started with discs {:?} loaded, mode {}",
            self.slots.loaded_indices(),
            self.playback.mode.label()
        );
        self.publish_snapshot();

        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(message) => match message {
                    protocol::Message::Changer(intent) => self.handle_intent(intent),
                    protocol::Message::Worker(result) => self.handle_worker_result(result),
                    protocol::Message::NowPlaying(NowPlayingMessage::Observed(observation)) => {
                        self.handle_observation(observation)
                    }
                    protocol::Message::Config(ConfigMessage::ConfigChanged(config)) => {
                        self.apply_config(config)
                    }
                    protocol::Message::Shutdown => {
                        info!("ChangerManager: shutting down");
                        self.persist();
                        if let Some(persistence) = &self.services.persistence {
                            persistence.flush();
                        }
                        break;
                    }
                    protocol::Message::Presentation(_) => {}
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!("ChangerManager: bus lagged, skipped {} messages", skipped);
                    // A dropped observation would otherwise stall the poller forever.
                    self.services.poll_in_flight.store(false, Ordering::SeqCst);
                }
                Err(RecvError::Closed) => {
                    error!("ChangerManager: bus closed");
                    break;
                }
            }
        }
    }

    fn handle_intent(&mut self, intent: ChangerMessage) {
        match intent {
            ChangerMessage::SetActiveDisc(slot_index) => {
                debug!("ChangerManager: engage disc {}", slot_index);
                if self.playback.set_active_disc(slot_index) {
                    self.state_changed();
                }
            }
            ChangerMessage::ToggleLid => {
                self.playback.lid_open = !self.playback.lid_open;
                debug!("ChangerManager: lid open = {}", self.playback.lid_open);
                self.state_changed();
            }
            ChangerMessage::LoadDisc(slot_index) => {
                self.request_load(slot_index, LoadRequest::Current)
            }
            ChangerMessage::LoadAlbum {
                slot_index,
                suggestion,
            } => self.request_load(
                slot_index,
                LoadRequest::Album {
                    title: suggestion.title,
                    artist: suggestion.subtitle,
                },
            ),
            ChangerMessage::LoadPlaylist {
                slot_index,
                suggestion,
            } => self.request_load(slot_index, LoadRequest::Playlist(suggestion.identifier)),
            ChangerMessage::RemoveDisc(slot_index) => self.remove_disc(slot_index),
            ChangerMessage::PasteArtwork { slot_index, bytes } => {
                self.paste_artwork(slot_index, bytes)
            }
            ChangerMessage::PlayDisc(slot_index) => {
                if !is_valid_slot_index(slot_index) {
                    debug!("ChangerManager: ignoring play of disc {}", slot_index);
                    return;
                }
                let result = self
                    .engine
                    .start(&mut self.playback, &self.slots, slot_index);
                self.play_or_report(result);
            }
            ChangerMessage::PlayAllDiscsShuffled => {
                self.playback.set_mode(PlaybackMode::FiveDiscShuffle);
                self.detector.disarm();
                let result = self.engine.advance(&mut self.playback, &self.slots, None);
                self.state_changed();
                self.play_or_report(result);
            }
            ChangerMessage::SetMode(mode) => {
                self.playback.set_mode(mode);
                if mode_auto_advances(mode) {
                    self.detector.set_whole_list(mode == PlaybackMode::DiscRepeat);
                } else {
                    self.detector.disarm();
                }
                self.publish_status(format!("Mode: {}", mode.label()));
                self.state_changed();
            }
            ChangerMessage::PlayPause => self.send_transport(TransportCommand::PlayPause),
            ChangerMessage::NextTrack => self.next_track(),
            ChangerMessage::PreviousTrack => self.send_transport(TransportCommand::Previous),
            ChangerMessage::SearchAlbums(query) => {
                self.request_search(SuggestionKind::Album, query)
            }
            ChangerMessage::SearchPlaylists(query) => {
                self.request_search(SuggestionKind::Playlist, query)
            }
            ChangerMessage::RequestSnapshot => self.publish_snapshot(),
        }
    }

    fn handle_worker_result(&mut self, result: WorkerMessage) {
        match result {
            WorkerMessage::DiscLoaded {
                slot_index,
                generation,
                result,
            } => self.apply_loaded_disc(slot_index, generation, result),
            WorkerMessage::SearchFinished {
                kind,
                query,
                result,
            } => self.apply_search_results(kind, query, result),
            WorkerMessage::PlayIssued {
                generation,
                disc_index,
                result,
            } => match result {
                Ok(()) => debug!("ChangerManager: player accepted disc {}", disc_index),
                Err(err) => {
                    if generation == self.play_generation.load(Ordering::SeqCst) {
                        self.detector.disarm();
                    }
                    self.report_error(err.into());
                }
            },
            WorkerMessage::TransportFinished { command, result } => {
                if let Err(err) = result {
                    debug!("ChangerManager: {:?} failed", command);
                    self.report_error(err.into());
                }
            }
        }
    }

    fn request_load(&mut self, slot_index: usize, request: LoadRequest) {
        if !is_valid_slot_index(slot_index) {
            debug!("ChangerManager: ignoring load into disc {}", slot_index);
            return;
        }
        if !self.playback.lid_open {
            self.report_error(ChangerError::LidClosed);
            return;
        }

        let generation = self.bump_load_generation(slot_index);
        self.publish_status(format!("Loading disc {slot_index}..."));
        let bridge = Arc::clone(&self.services.bridge);
        let bus_producer = self.bus_producer.clone();
        thread::spawn(move || {
            let result = request.execute(bridge.as_ref());
            let _ = bus_producer.send(protocol::Message::Worker(WorkerMessage::DiscLoaded {
                slot_index,
                generation,
                result,
            }));
        });
    }

    fn bump_load_generation(&mut self, slot_index: usize) -> u64 {
        let generation = &mut self.load_generations[slot_index - 1];
        *generation += 1;
        *generation
    }

    fn apply_loaded_disc(
        &mut self,
        slot_index: usize,
        generation: u64,
        result: Result<LoadedDisc, BridgeError>,
    ) {
        if !is_valid_slot_index(slot_index) || self.load_generations[slot_index - 1] != generation {
            debug!(
                "ChangerManager: dropping stale load result for disc {} (generation {})",
                slot_index, generation
            );
            return;
        }

        match result {
            Ok(mut disc) => {
                let artwork_ref = disc
                    .artwork_bytes
                    .take()
                    .and_then(|bytes| self.services.artwork_store.store(&bytes));
                let title = disc
                    .album_title
                    .clone()
                    .unwrap_or_else(|| disc.source_identifier.clone());
                let track_count = disc.track_ids.len();
                self.slots.load(slot_index, disc, artwork_ref);
                self.prune_artwork();
                info!(
                    "ChangerManager: loaded {} ({} tracks) into disc {}",
                    title, track_count, slot_index
                );
                self.publish_status(format!("Disc {slot_index}: {title}"));
                self.state_changed();
            }
            Err(err) => self.report_error(err.into()),
        }
    }

    fn remove_disc(&mut self, slot_index: usize) {
        if !is_valid_slot_index(slot_index) {
            debug!("ChangerManager: ignoring removal of disc {}", slot_index);
            return;
        }
        if !self.playback.lid_open {
            self.report_error(ChangerError::LidClosed);
            return;
        }
        // Any load still in flight for this slot is now stale.
        self.bump_load_generation(slot_index);
        self.slots.remove(slot_index);
        self.now_playing.forget_disc(slot_index);
        self.prune_artwork();
        self.publish_status(format!("Disc {slot_index} removed"));
        self.state_changed();
    }

    fn paste_artwork(&mut self, slot_index: usize, bytes: Option<Vec<u8>>) {
        if !is_valid_slot_index(slot_index) {
            return;
        }
        let Some(bytes) = bytes.filter(|bytes| !bytes.is_empty()) else {
            self.report_error(ChangerError::ClipboardEmpty);
            return;
        };
        match self.services.artwork_store.store(&bytes) {
            Some(artwork_ref) => {
                if let Some(path) = self.services.artwork_store.path_for(&artwork_ref) {
                    debug!("ChangerManager: disc {} artwork at {}", slot_index, path.display());
                }
                self.slots.set_artwork(slot_index, Some(artwork_ref));
                self.prune_artwork();
                self.publish_status(format!("Artwork updated for disc {slot_index}"));
                self.state_changed();
            }
            None => {
                error!(
                    "ChangerManager: could not store artwork under {}",
                    self.services.artwork_store.root().display()
                );
                self.publish_status("Could not save artwork".to_string());
            }
        }
    }

    fn prune_artwork(&self) {
        let removed = self.services.artwork_store.prune_unreferenced(
            self.slots
                .slots()
                .iter()
                .filter_map(|slot| slot.artwork_ref.as_deref()),
        );
        if removed > 0 {
            debug!("ChangerManager: pruned {} unused artwork files", removed);
        }
    }

    fn next_track(&mut self) {
        if !self.playback.mode.is_track_by_track() {
            self.send_transport(TransportCommand::Next);
            return;
        }
        self.detector.disarm();
        let current = self.now_playing.track_id.clone();
        let result = self
            .engine
            .advance(&mut self.playback, &self.slots, current.as_deref());
        self.play_or_report(result);
    }

    fn play_or_report(&mut self, result: Result<PlayTarget, NoEligibleTarget>) {
        match result {
            Ok(target) => self.issue_play(target),
            Err(reason) => {
                self.detector.disarm();
                self.report_error(reason.into());
            }
        }
    }

    fn issue_play(&mut self, target: PlayTarget) {
        let generation = self.play_generation.fetch_add(1, Ordering::SeqCst) + 1;
        if mode_auto_advances(self.playback.mode) {
            let whole_list = self.playback.mode == PlaybackMode::DiscRepeat;
            self.detector.arm(target.track_ids.clone(), whole_list);
        } else {
            self.detector.disarm();
        }

        self.publish_status(describe_target(&target, &self.slots));
        self.state_changed();

        let bridge = Arc::clone(&self.services.bridge);
        let bus_producer = self.bus_producer.clone();
        let latest_generation = Arc::clone(&self.play_generation);
        thread::spawn(move || {
            if !target.swap_delay.is_zero() {
                // Emulated disc swap.
                thread::sleep(target.swap_delay);
            }
            if latest_generation.load(Ordering::SeqCst) != generation {
                trace!(
                    "ChangerManager: play of disc {} superseded during swap",
                    target.disc_index
                );
                return;
            }
            let result = bridge.play_track_list(&target.track_ids, &target.label);
            let _ = bus_producer.send(protocol::Message::Worker(WorkerMessage::PlayIssued {
                generation,
                disc_index: target.disc_index,
                result,
            }));
        });
    }

    fn send_transport(&mut self, command: TransportCommand) {
        debug!("ChangerManager: forwarding {:?} to the player", command);
        let bridge = Arc::clone(&self.services.bridge);
        let bus_producer = self.bus_producer.clone();
        thread::spawn(move || {
            let result = match command {
                TransportCommand::PlayPause => bridge.play_pause(),
                TransportCommand::Next => bridge.next_track(),
                TransportCommand::Previous => bridge.previous_track(),
            };
            let _ = bus_producer.send(protocol::Message::Worker(
                WorkerMessage::TransportFinished { command, result },
            ));
        });
    }

    fn request_search(&mut self, kind: SuggestionKind, query: String) {
        let generation = self.search_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let query = query.trim().to_string();
        let significant_chars = query.chars().filter(|c| !c.is_whitespace()).count();
        if significant_chars < self.search.min_query_chars {
            trace!("ChangerManager: query {:?} too short, clearing suggestions", query);
            self.latest_search = None;
            if !self.suggestions.is_empty() {
                self.suggestions.clear();
                self.publish_snapshot();
            }
            return;
        }

        self.latest_search = Some((kind, query.clone()));
        let bridge = Arc::clone(&self.services.bridge);
        let bus_producer = self.bus_producer.clone();
        let latest_generation = Arc::clone(&self.search_generation);
        let settings = self.search.clone();
        thread::spawn(move || {
            thread::sleep(settings.debounce);
            if latest_generation.load(Ordering::SeqCst) != generation {
                trace!("ChangerManager: search {:?} superseded before running", query);
                return;
            }
            let result = match kind {
                SuggestionKind::Album => bridge.search_albums(&query, settings.result_limit),
                SuggestionKind::Playlist => bridge.search_playlists(&query, settings.result_limit),
            };
            let _ = bus_producer.send(protocol::Message::Worker(WorkerMessage::SearchFinished {
                kind,
                query,
                result,
            }));
        });
    }

    fn apply_search_results(
        &mut self,
        kind: SuggestionKind,
        query: String,
        result: Result<Vec<Suggestion>, BridgeError>,
    ) {
        let is_latest = matches!(
            &self.latest_search,
            Some((latest_kind, latest_query)) if *latest_kind == kind && *latest_query == query
        );
        if !is_latest {
            debug!("ChangerManager: dropping stale results for {:?}", query);
            return;
        }
        match result {
            Ok(suggestions) => {
                self.publish_status(format!("{} result(s) for {query}", suggestions.len()));
                self.suggestions = suggestions;
                self.publish_snapshot();
            }
            Err(err) => self.report_error(err.into()),
        }
    }

    fn handle_observation(&mut self, observation: Result<Observation, BridgeError>) {
        let previous_active = self.playback.active_disc_index;
        let now_playing =
            reconciler::reconcile(observation.as_ref().ok(), &self.slots, &mut self.playback);
        let finished = self.detector.observe(&observation);

        let now_playing_changed = now_playing != self.now_playing;
        self.now_playing = now_playing;
        if now_playing_changed && self.now_playing.is_unknown() {
            debug!("ChangerManager: player state is unknown");
        }
        if self.playback.active_disc_index != previous_active {
            self.state_changed();
        } else if now_playing_changed {
            self.publish_snapshot();
        }

        if let Some(track_id) = finished {
            debug!(
                "ChangerManager: {} finished, advancing in {} mode",
                track_id,
                self.playback.mode.label()
            );
            let result = self
                .engine
                .advance(&mut self.playback, &self.slots, Some(&track_id));
            self.play_or_report(result);
        }

        self.services.poll_in_flight.store(false, Ordering::SeqCst);
    }

    fn apply_config(&mut self, config: Config) {
        let config = sanitize_config(config);
        self.engine.set_swap_delay_range(
            config.playback.swap_delay_min_ms,
            config.playback.swap_delay_max_ms,
        );
        self.search = SearchSettings::from(&config);
        info!("ChangerManager: applied updated configuration");
    }

    fn report_error(&self, err: ChangerError) {
        match &err {
            ChangerError::NoEligibleTarget(_)
            | ChangerError::LidClosed
            | ChangerError::ClipboardEmpty => info!("ChangerManager: {}", err),
            _ => warn!("ChangerManager: {}", err),
        }
        self.publish_status(err.status_line());
    }

    fn state_changed(&self) {
        self.persist();
        self.publish_snapshot();
    }

    fn persist(&self) {
        if let Some(persistence) = &self.services.persistence {
            persistence.save(PersistedState::capture(&self.slots, &self.playback));
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = ChangerSnapshot {
            slots: self.slots.slots().to_vec(),
            playback: self.playback.clone(),
            now_playing: self.now_playing.clone(),
            suggestions: self.suggestions.clone(),
        };
        let _ = self.bus_producer.send(protocol::Message::Presentation(
            PresentationMessage::Snapshot(Box::new(snapshot)),
        ));
    }

    fn publish_status(&self, line: String) {
        let _ = self.bus_producer.send(protocol::Message::Presentation(
            PresentationMessage::Status(line),
        ));
    }
}

/// Normal mode leaves sequencing to the player.
fn mode_auto_advances(mode: PlaybackMode) -> bool {
    mode != PlaybackMode::Normal
}

fn describe_target(target: &PlayTarget, slots: &DiscSlotStore) -> String {
    let slot = slots.slot(target.disc_index);
    let track_number = match target.track_ids.as_slice() {
        [track_id] => slot.and_then(|slot| {
            slot.track_numbers_by_id
                .get(track_id)
                .copied()
                .or_else(|| slot.position_of(track_id))
        }),
        _ => None,
    };
    match track_number {
        Some(number) => format!("Disc {}, track {}", target.disc_index, number),
        None => format!("Disc {}", target.disc_index),
    }
}
