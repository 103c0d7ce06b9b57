//! Durable changer state: JSON schema, startup restore and debounced writes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::playback_mode::PlaybackState;
use crate::slots::{DiscSlot, DiscSlotStore};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk schema (v1).
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub disc_slots: Vec<DiscSlot>,
    #[serde(default)]
    pub playback: PlaybackState,
}

impl PersistedState {
    pub fn capture(slots: &DiscSlotStore, playback: &PlaybackState) -> Self {
        Self {
            disc_slots: slots.slots().to_vec(),
            playback: playback.clone(),
        }
    }

    /// Normalized slot store and playback state.
    pub fn into_parts(self) -> (DiscSlotStore, PlaybackState) {
        (
            DiscSlotStore::from_slots(self.disc_slots),
            self.playback.normalized(),
        )
    }

    pub fn to_json(&self) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, PersistenceError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Loads state from `path`, falling back to a fresh changer when the file is
/// missing or unreadable.
pub fn load_state(path: &Path) -> (DiscSlotStore, PlaybackState) {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!("No saved changer state at {}, starting empty", path.display());
            return (DiscSlotStore::new(), PlaybackState::default());
        }
        Err(err) => {
            warn!("Failed to read changer state {}: {}", path.display(), err);
            return (DiscSlotStore::new(), PlaybackState::default());
        }
    };
    match PersistedState::from_json(&text) {
        Ok(state) => state.into_parts(),
        Err(err) => {
            warn!("Ignoring unreadable changer state {}: {}", path.display(), err);
            (DiscSlotStore::new(), PlaybackState::default())
        }
    }
}

/// Writes `state` next to `path` and renames it into place, so a crash
/// leaves either the old or the new file.
pub fn save_state_atomic(path: &Path, state: &PersistedState) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("json.tmp");
    if temp_path.exists() {
        let _ = fs::remove_file(&temp_path);
    }
    fs::write(&temp_path, state.to_json()?)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

enum WriterCommand {
    Save(Box<PersistedState>),
    Flush,
}

/// Handle to the background writer that coalesces bursts of saves.
#[derive(Clone)]
pub struct PersistenceHandle {
    sender: Sender<WriterCommand>,
}

impl PersistenceHandle {
    pub fn save(&self, state: PersistedState) {
        if self.sender.send(WriterCommand::Save(Box::new(state))).is_err() {
            warn!("PersistenceWriter: writer thread is gone, state not saved");
        }
    }

    /// Forces any pending state to disk without waiting for the debounce.
    pub fn flush(&self) {
        let _ = self.sender.send(WriterCommand::Flush);
    }
}

/// Spawns the writer thread. It exits once every handle is dropped, writing
/// whatever is still pending.
pub fn spawn_persistence_writer(path: PathBuf, debounce: Duration) -> (PersistenceHandle, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel();
    let join = thread::spawn(move || run_writer(&path, debounce, receiver));
    (PersistenceHandle { sender }, join)
}

fn write_pending(path: &Path, pending: &mut Option<Box<PersistedState>>) {
    if let Some(state) = pending.take() {
        match save_state_atomic(path, &state) {
            Ok(()) => debug!("PersistenceWriter: saved changer state to {}", path.display()),
            Err(err) => error!(
                "PersistenceWriter: failed to save changer state to {}: {}",
                path.display(),
                err
            ),
        }
    }
}

fn run_writer(path: &Path, debounce: Duration, receiver: Receiver<WriterCommand>) {
    let mut pending: Option<Box<PersistedState>> = None;
    loop {
        let command = if pending.is_some() {
            match receiver.recv_timeout(debounce) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => {
                    write_pending(path, &mut pending);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match receiver.recv() {
                Ok(command) => command,
                Err(_) => break,
            }
        };
        match command {
            // Newer snapshots replace older ones; only the last of a burst is written.
            WriterCommand::Save(state) => pending = Some(state),
            WriterCommand::Flush => write_pending(path, &mut pending),
        }
    }
    write_pending(path, &mut pending);
}
