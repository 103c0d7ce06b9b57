//! User-facing error taxonomy of the changer.

use crate::bridge::BridgeError;
use crate::playback_mode::NoEligibleTarget;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChangerError {
    /// Player missing or not controllable; the user can fix this.
    #[error("{0}")]
    EnvironmentUnavailable(String),
    /// Nothing matching the request exists in the player.
    #[error("{0}")]
    ContentNotFound(String),
    #[error("Music script failed: {0}")]
    ScriptExecutionFailed(String),
    #[error("{0}")]
    NoEligibleTarget(#[from] NoEligibleTarget),
    #[error("No image to paste")]
    ClipboardEmpty,
    #[error("Open the lid to change discs")]
    LidClosed,
}

impl From<BridgeError> for ChangerError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::MusicNotRunning => {
                ChangerError::EnvironmentUnavailable("Music is not running".to_string())
            }
            BridgeError::NotAuthorized => ChangerError::EnvironmentUnavailable(
                "Allow automation of Music in System Settings › Privacy & Security".to_string(),
            ),
            BridgeError::NoCurrentTrack => {
                ChangerError::ContentNotFound("Nothing is playing in Music".to_string())
            }
            BridgeError::NoAlbumFound => {
                ChangerError::ContentNotFound("Album not found".to_string())
            }
            BridgeError::NoPlaylistFound => {
                ChangerError::ContentNotFound("Playlist not found".to_string())
            }
            BridgeError::ScriptFailed(message) => ChangerError::ScriptExecutionFailed(message),
        }
    }
}

impl ChangerError {
    /// Status line shown to the user. Raw script diagnostics are only shown
    /// in debug builds.
    pub fn status_line(&self) -> String {
        match self {
            ChangerError::ScriptExecutionFailed(message) => {
                if cfg!(debug_assertions) {
                    format!("Music script failed: {message}")
                } else {
                    "Something went wrong talking to Music".to_string()
                }
            }
            other => other.to_string(),
        }
    }
}
