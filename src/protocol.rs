//! Event-bus protocol shared by all runtime components.
//!
//! This module defines the payloads exchanged between the console, the changer
//! manager, bridge worker threads and the now-playing poller.

use crate::bridge::{BridgeError, Observation, Suggestion, SuggestionKind};
use crate::config::Config;
use crate::playback_mode::{PlaybackMode, PlaybackState};
use crate::reconciler::NowPlaying;
use crate::slots::{DiscSlot, LoadedDisc};

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Changer(ChangerMessage),
    Worker(WorkerMessage),
    NowPlaying(NowPlayingMessage),
    Presentation(PresentationMessage),
    Config(ConfigMessage),
    /// Every service stops its loop when it sees this.
    Shutdown,
}

/// User intents handled by the changer manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangerMessage {
    SetActiveDisc(usize),
    ToggleLid,
    /// Load whatever the player is playing right now.
    LoadDisc(usize),
    LoadAlbum {
        slot_index: usize,
        suggestion: Suggestion,
    },
    LoadPlaylist {
        slot_index: usize,
        suggestion: Suggestion,
    },
    RemoveDisc(usize),
    /// Image bytes from the presentation layer; `None` when it had none.
    PasteArtwork {
        slot_index: usize,
        bytes: Option<Vec<u8>>,
    },
    PlayDisc(usize),
    PlayAllDiscsShuffled,
    SetMode(PlaybackMode),
    PlayPause,
    NextTrack,
    PreviousTrack,
    SearchAlbums(String),
    SearchPlaylists(String),
    /// Asks the manager to publish its current snapshot.
    RequestSnapshot,
}

/// Player transport commands forwarded as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    PlayPause,
    Next,
    Previous,
}

/// Results posted back by bridge worker threads.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    DiscLoaded {
        slot_index: usize,
        /// Load request generation for `slot_index`; older ones are stale.
        generation: u64,
        result: Result<LoadedDisc, BridgeError>,
    },
    SearchFinished {
        kind: SuggestionKind,
        query: String,
        result: Result<Vec<Suggestion>, BridgeError>,
    },
    PlayIssued {
        generation: u64,
        disc_index: usize,
        result: Result<(), BridgeError>,
    },
    TransportFinished {
        command: TransportCommand,
        result: Result<(), BridgeError>,
    },
}

#[derive(Debug, Clone)]
pub enum NowPlayingMessage {
    /// One poll tick, with the bridge failure when the player could not be read.
    Observed(Result<Observation, BridgeError>),
}

/// Everything a front end needs to render the changer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangerSnapshot {
    pub slots: Vec<DiscSlot>,
    pub playback: PlaybackState,
    pub now_playing: NowPlaying,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Clone)]
pub enum PresentationMessage {
    Snapshot(Box<ChangerSnapshot>),
    Status(String),
}

#[derive(Debug, Clone)]
pub enum ConfigMessage {
    ConfigChanged(Config),
}
