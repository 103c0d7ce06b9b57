//! Automation bridge abstractions and concrete implementations.

pub mod apple_music;

use crate::slots::LoadedDisc;

/// Failures reported by a bridge implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("Music is not running")]
    MusicNotRunning,
    #[error("Not authorized to control Music")]
    NotAuthorized,
    #[error("Nothing is playing")]
    NoCurrentTrack,
    #[error("Album not found")]
    NoAlbumFound,
    #[error("Playlist not found")]
    NoPlaylistFound,
    #[error("Script failed: {0}")]
    ScriptFailed(String),
}

/// Best-effort snapshot of what the player is doing right now.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub track_id: Option<String>,
    pub track_number: Option<i64>,
    pub elapsed_seconds: Option<f64>,
    pub album_title: Option<String>,
    pub artist_name: Option<String>,
    pub external_playlist_id: Option<String>,
    pub is_playing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionKind {
    Album,
    Playlist,
}

/// Search result the user can load into a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    /// Album or playlist name.
    pub title: String,
    /// Album artist for albums, empty for playlists.
    pub subtitle: Option<String>,
    /// Player-side identifier (persistent playlist id, or the album title).
    pub identifier: String,
}

/// Capability surface of the external music player.
///
/// Every call may block for a long time; callers run them off the
/// coordination thread.
pub trait MusicBridge: Send + Sync {
    fn load_current_album_or_playlist(&self) -> Result<LoadedDisc, BridgeError>;
    fn load_album(&self, title: &str, artist: Option<&str>) -> Result<LoadedDisc, BridgeError>;
    fn load_playlist(&self, playlist_id: &str) -> Result<LoadedDisc, BridgeError>;
    fn search_albums(&self, query: &str, limit: usize) -> Result<Vec<Suggestion>, BridgeError>;
    fn search_playlists(&self, query: &str, limit: usize)
        -> Result<Vec<Suggestion>, BridgeError>;
    fn current_playback_info(&self) -> Result<Observation, BridgeError>;
    fn play_track_list(&self, track_ids: &[String], label: &str) -> Result<(), BridgeError>;
    fn play_pause(&self) -> Result<(), BridgeError>;
    fn next_track(&self) -> Result<(), BridgeError>;
    fn previous_track(&self) -> Result<(), BridgeError>;
}
