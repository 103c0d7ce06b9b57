//! Line-oriented terminal front end.
//!
//! Typed commands become bus intents; snapshots and status lines coming back
//! from the manager are printed as they arrive.

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use tokio::sync::broadcast::{error::RecvError, Receiver, Sender};

use crate::bridge::SuggestionKind;
use crate::config::parse_config;
use crate::playback_mode::PlaybackMode;
use crate::protocol::{self, ChangerMessage, ChangerSnapshot, ConfigMessage, PresentationMessage};

const HELP: &str = "\
commands:
  lid                     open/close the lid
  disc N                  engage disc N
  load N                  load what Music is playing into disc N
  load-album N K          load album suggestion K into disc N
  load-playlist N K       load playlist suggestion K into disc N
  remove N                empty disc N
  art N PATH              use the image at PATH as disc N artwork
  play N                  play disc N in the current mode
  shuffle-all             five-disc shuffle
  mode NAME               normal, play-all, disc-repeat, one-disc-shuffle,
                          five-disc-shuffle, spiral
  pp | next | prev        transport
  search TEXT             search albums
  search-playlists TEXT   search playlists
  status                  show the changer
  reload                  re-read config.toml
  quit";

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Changer(ChangerMessage),
    /// `number` is 1-based, as printed in the suggestion list.
    LoadSuggestion {
        slot_index: usize,
        number: usize,
        kind: SuggestionKind,
    },
    Artwork {
        slot_index: usize,
        path: PathBuf,
    },
    Status,
    Reload,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command '{0}', type 'help'")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Unknown mode '{0}'")]
    UnknownMode(String),
    #[error("No suggestion {0}, search first")]
    NoSuchSuggestion(usize),
    #[error("Could not read config: {0}")]
    Config(String),
}

fn parse_number(value: Option<&str>, usage: &'static str) -> Result<usize, CommandError> {
    value
        .and_then(|value| value.parse::<usize>().ok())
        .ok_or(CommandError::Usage(usage))
}

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let mut args = rest.split_whitespace();

    let command = match verb.to_ascii_lowercase().as_str() {
        "lid" => ConsoleCommand::Changer(ChangerMessage::ToggleLid),
        "disc" => ConsoleCommand::Changer(ChangerMessage::SetActiveDisc(parse_number(
            args.next(),
            "disc N",
        )?)),
        "load" => ConsoleCommand::Changer(ChangerMessage::LoadDisc(parse_number(
            args.next(),
            "load N",
        )?)),
        "load-album" => ConsoleCommand::LoadSuggestion {
            slot_index: parse_number(args.next(), "load-album N K")?,
            number: parse_number(args.next(), "load-album N K")?,
            kind: SuggestionKind::Album,
        },
        "load-playlist" => ConsoleCommand::LoadSuggestion {
            slot_index: parse_number(args.next(), "load-playlist N K")?,
            number: parse_number(args.next(), "load-playlist N K")?,
            kind: SuggestionKind::Playlist,
        },
        "remove" => ConsoleCommand::Changer(ChangerMessage::RemoveDisc(parse_number(
            args.next(),
            "remove N",
        )?)),
        "art" => {
            let slot_index = parse_number(args.next(), "art N PATH")?;
            // Paths may contain spaces; take everything after the slot number.
            let path = rest
                .split_once(char::is_whitespace)
                .map(|(_, path)| path.trim())
                .filter(|path| !path.is_empty())
                .ok_or(CommandError::Usage("art N PATH"))?;
            ConsoleCommand::Artwork {
                slot_index,
                path: PathBuf::from(path),
            }
        }
        "play" => ConsoleCommand::Changer(ChangerMessage::PlayDisc(parse_number(
            args.next(),
            "play N",
        )?)),
        "shuffle-all" => ConsoleCommand::Changer(ChangerMessage::PlayAllDiscsShuffled),
        "mode" => {
            let name = args.next().ok_or(CommandError::Usage("mode NAME"))?;
            let mode = PlaybackMode::from_label(name)
                .ok_or_else(|| CommandError::UnknownMode(name.to_string()))?;
            ConsoleCommand::Changer(ChangerMessage::SetMode(mode))
        }
        "pp" => ConsoleCommand::Changer(ChangerMessage::PlayPause),
        "next" => ConsoleCommand::Changer(ChangerMessage::NextTrack),
        "prev" => ConsoleCommand::Changer(ChangerMessage::PreviousTrack),
        "search" => ConsoleCommand::Changer(ChangerMessage::SearchAlbums(rest.to_string())),
        "search-playlists" => {
            ConsoleCommand::Changer(ChangerMessage::SearchPlaylists(rest.to_string()))
        }
        "status" => ConsoleCommand::Status,
        "reload" => ConsoleCommand::Reload,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        _ => return Err(CommandError::Unknown(verb.to_string())),
    };
    Ok(Some(command))
}

fn format_elapsed(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Multi-line rendering of a snapshot for the `status` command.
pub fn render_snapshot(snapshot: &ChangerSnapshot) -> String {
    let playback = &snapshot.playback;
    let mut lines = vec![format!(
        "mode {}, lid {}",
        playback.mode.label(),
        if playback.lid_open { "open" } else { "closed" }
    )];

    for slot in &snapshot.slots {
        let marker = if slot.slot_index == playback.active_disc_index {
            '>'
        } else {
            ' '
        };
        let mut line = if slot.is_loaded() {
            let title = slot
                .album_title
                .as_deref()
                .or(slot.source_identifier.as_deref())
                .unwrap_or_default();
            let mut line = format!("{marker} [{}] {title}", slot.slot_index);
            if let Some(artist) = slot.artist_name.as_deref() {
                line.push_str(&format!(" - {artist}"));
            }
            line.push_str(&format!(" ({} tracks)", slot.track_count()));
            line
        } else {
            format!("{marker} [{}] (empty)", slot.slot_index)
        };

        let now_playing = &snapshot.now_playing;
        if now_playing.disc_index == Some(slot.slot_index) {
            line.push_str(if now_playing.is_playing {
                "  playing"
            } else {
                "  paused"
            });
            if let Some(track_number) = now_playing.track_number {
                line.push_str(&format!(" track {track_number}"));
            }
            if let Some(elapsed) = now_playing.elapsed_seconds {
                line.push_str(&format!(" {}", format_elapsed(elapsed)));
            }
        }
        lines.push(line);
    }

    if !snapshot.suggestions.is_empty() {
        lines.push("suggestions:".to_string());
        for (offset, suggestion) in snapshot.suggestions.iter().enumerate() {
            let mut line = format!("  {}. {}", offset + 1, suggestion.title);
            if let Some(subtitle) = suggestion.subtitle.as_deref() {
                line.push_str(&format!(" - {subtitle}"));
            }
            lines.push(line);
        }
    }
    lines.join("\n")
}

/// Short now-playing line, or `None` while nothing known is playing.
fn now_playing_line(snapshot: &ChangerSnapshot) -> Option<String> {
    let disc_index = snapshot.now_playing.disc_index?;
    Some(match snapshot.now_playing.track_number {
        Some(track_number) => format!("now playing disc {disc_index}, track {track_number}"),
        None => format!("now playing disc {disc_index}"),
    })
}

pub struct Console {
    bus_producer: Sender<protocol::Message>,
    config_path: Option<PathBuf>,
    latest: Arc<Mutex<Option<ChangerSnapshot>>>,
    /// Set by `status`; the printer renders the next snapshot in full.
    render_requested: Arc<AtomicBool>,
}

impl Console {
    pub fn new(bus_producer: Sender<protocol::Message>, config_path: Option<PathBuf>) -> Self {
        Self {
            bus_producer,
            config_path,
            latest: Arc::new(Mutex::new(None)),
            render_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawns the printer thread that follows manager output on the bus.
    pub fn spawn_printer(&self, mut bus_consumer: Receiver<protocol::Message>) -> JoinHandle<()> {
        let latest = Arc::clone(&self.latest);
        let render_requested = Arc::clone(&self.render_requested);
        thread::spawn(move || {
            let mut last_line: Option<String> = None;
            loop {
                match bus_consumer.blocking_recv() {
                    Ok(protocol::Message::Presentation(PresentationMessage::Status(line))) => {
                        println!("» {line}");
                    }
                    Ok(protocol::Message::Presentation(PresentationMessage::Snapshot(snapshot))) => {
                        let line = now_playing_line(&snapshot);
                        if line != last_line {
                            if let Some(line) = &line {
                                println!("♪ {line}");
                            }
                            last_line = line;
                        }
                        if render_requested.swap(false, Ordering::SeqCst) {
                            println!("{}", render_snapshot(&snapshot));
                        }
                        *latest.lock().expect("snapshot lock poisoned") = Some(*snapshot);
                    }
                    Ok(protocol::Message::Shutdown) | Err(RecvError::Closed) => break,
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {}
                }
            }
        })
    }

    fn latest_snapshot(&self) -> Option<ChangerSnapshot> {
        self.latest.lock().expect("snapshot lock poisoned").clone()
    }

    /// Turns a parsed command into the bus message it stands for.
    pub fn resolve(
        &self,
        command: ConsoleCommand,
        snapshot: Option<&ChangerSnapshot>,
    ) -> Result<Option<protocol::Message>, CommandError> {
        let message = match command {
            ConsoleCommand::Changer(intent) => protocol::Message::Changer(intent),
            ConsoleCommand::LoadSuggestion {
                slot_index,
                number,
                kind,
            } => {
                let suggestion = snapshot
                    .and_then(|snapshot| snapshot.suggestions.get(number.wrapping_sub(1)))
                    .filter(|suggestion| suggestion.kind == kind)
                    .cloned()
                    .ok_or(CommandError::NoSuchSuggestion(number))?;
                protocol::Message::Changer(match kind {
                    SuggestionKind::Album => ChangerMessage::LoadAlbum {
                        slot_index,
                        suggestion,
                    },
                    SuggestionKind::Playlist => ChangerMessage::LoadPlaylist {
                        slot_index,
                        suggestion,
                    },
                })
            }
            ConsoleCommand::Artwork { slot_index, path } => {
                let bytes = match fs::read(&path) {
                    Ok(bytes) => Some(bytes),
                    Err(err) => {
                        warn!("Console: could not read {}: {}", path.display(), err);
                        None
                    }
                };
                protocol::Message::Changer(ChangerMessage::PasteArtwork { slot_index, bytes })
            }
            ConsoleCommand::Reload => {
                let path = self
                    .config_path
                    .as_deref()
                    .ok_or_else(|| CommandError::Config("no config directory".to_string()))?;
                protocol::Message::Config(ConfigMessage::ConfigChanged(read_config(path)?))
            }
            ConsoleCommand::Status => {
                self.render_requested.store(true, Ordering::SeqCst);
                protocol::Message::Changer(ChangerMessage::RequestSnapshot)
            }
            ConsoleCommand::Help | ConsoleCommand::Quit => return Ok(None),
        };
        Ok(Some(message))
    }

    fn send(&self, message: protocol::Message) {
        if self.bus_producer.send(message).is_err() {
            warn!("Console: bus has no listeners");
        }
    }

    /// Reads commands until `quit` or end of input.
    pub fn run<R: BufRead>(&self, input: R) -> io::Result<()> {
        println!("fivedisc ready, type 'help' for commands");
        for line in input.lines() {
            let line = line?;
            let command = match parse_command(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(err) => {
                    println!("{err}");
                    continue;
                }
            };
            debug!("Console: {:?}", command);

            match &command {
                ConsoleCommand::Quit => break,
                ConsoleCommand::Help => println!("{HELP}"),
                _ => {}
            }

            let snapshot = self.latest_snapshot();
            match self.resolve(command, snapshot.as_ref()) {
                Ok(Some(message)) => self.send(message),
                Ok(None) => {}
                Err(err) => println!("{err}"),
            }
            io::stdout().flush()?;
        }
        self.send(protocol::Message::Shutdown);
        Ok(())
    }
}

fn read_config(path: &Path) -> Result<crate::config::Config, CommandError> {
    let text = fs::read_to_string(path).map_err(|err| CommandError::Config(err.to_string()))?;
    parse_config(&text).map_err(|err| CommandError::Config(err.to_string()))
}
