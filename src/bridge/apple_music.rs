//! Apple Music bridge driven through `osascript`.
//!
//! Every script is assembled here. Values interpolated into a script always
//! go through [`applescript_string`]. Scripts report results as records joined
//! with ASCII separators, or as an `ERR:` marker for expected failures.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, trace, warn};

use super::{BridgeError, MusicBridge, Observation, Suggestion, SuggestionKind};
use crate::slots::{LoadedDisc, SourceType};

const FIELD_SEPARATOR: char = '\u{1f}';
const RECORD_SEPARATOR: char = '\u{1e}';
const SCRIPT_PRELUDE: &str = r#"set fs to character id 31
set rs to character id 30
if application "Music" is not running then return "ERR:NOT_RUNNING"
"#;

/// Bridge to the macOS Music application.
pub struct AppleMusicBridge {
    osascript: PathBuf,
    queue_playlist_name: String,
}

impl AppleMusicBridge {
    pub fn new(queue_playlist_name: &str) -> Self {
        Self {
            osascript: PathBuf::from("osascript"),
            queue_playlist_name: queue_playlist_name.to_string(),
        }
    }

    fn run_script(&self, script: &str) -> Result<String, BridgeError> {
        trace!("AppleMusicBridge: running script:\n{}", script);
        let output = Command::new(&self.osascript)
            .arg("-e")
            .arg(script)
            .output()
            .map_err(|err| BridgeError::ScriptFailed(format!("osascript unavailable: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(map_script_failure(&stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        // osascript terminates its output with a single newline.
        let stdout = stdout.strip_suffix('\n').unwrap_or(&stdout).to_string();
        match error_marker(&stdout) {
            Some(err) => Err(err),
            None => Ok(stdout),
        }
    }

    fn export_first_artwork(&self, track_id: &str) -> Option<Vec<u8>> {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        let path = std::env::temp_dir().join(format!("fivedisc_artwork_{nonce}.bin"));
        let script = format!(
            r#"tell application "Music"
    set artData to raw data of artwork 1 of (first track of library playlist 1 whose persistent ID is {track_id})
end tell
set outFile to open for access (POSIX file {path}) with write permission
try
    set eof outFile to 0
    write artData to outFile
    close access outFile
on error errMsg
    close access outFile
    error errMsg
end try
return "OK""#,
            track_id = applescript_string(track_id),
            path = applescript_string(&path.to_string_lossy()),
        );

        let result = self.run_script(&script);
        let bytes = match result {
            Ok(_) => std::fs::read(&path).ok(),
            Err(err) => {
                debug!("AppleMusicBridge: no artwork for {}: {}", track_id, err);
                None
            }
        };
        let _ = std::fs::remove_file(&path);
        bytes.filter(|bytes| !bytes.is_empty())
    }

    fn album_tracks_script(title: &str, artist: Option<&str>) -> String {
        let filter = match artist {
            Some(artist) => format!(
                "whose album is {} and album artist is {}",
                applescript_string(title),
                applescript_string(artist)
            ),
            None => format!("whose album is {}", applescript_string(title)),
        };
        format!(
            r#"{SCRIPT_PRELUDE}tell application "Music"
    set found to (every track of library playlist 1 {filter})
    if (count of found) is 0 then return "ERR:NO_ALBUM"
    set out to ""
    repeat with t in found
        set out to out & (persistent ID of t) & fs & (disc number of t as text) & fs & (track number of t as text) & fs & (album of t) & fs & (album artist of t) & fs & (artist of t) & rs
    end repeat
    return out
end tell"#
        )
    }
}

impl MusicBridge for AppleMusicBridge {
    fn load_current_album_or_playlist(&self) -> Result<LoadedDisc, BridgeError> {
        let script = format!(
            r#"{SCRIPT_PRELUDE}tell application "Music"
    try
        set t to current track
    on error
        return "ERR:NO_TRACK"
    end try
    set pid to ""
    set pkind to ""
    try
        set pl to current playlist
        set pid to persistent ID of pl
        set pkind to (special kind of pl) as text
        if class of pl is not user playlist then set pkind to "library"
    end try
    return (album of t) & fs & (album artist of t) & fs & (artist of t) & fs & pid & fs & pkind
end tell"#
        );
        let output = self.run_script(&script)?;
        let fields: Vec<&str> = output.split(FIELD_SEPARATOR).collect();
        let field = |index: usize| fields.get(index).map(|value| value.trim()).unwrap_or("");

        let playlist_id = field(3);
        let playlist_kind = field(4);
        if !playlist_id.is_empty() && playlist_kind == "none" {
            debug!("AppleMusicBridge: loading current playlist {}", playlist_id);
            return self.load_playlist(playlist_id);
        }

        let album = field(0);
        if album.is_empty() {
            return Err(BridgeError::NoAlbumFound);
        }
        let artist = non_empty(field(1)).or_else(|| non_empty(field(2)));
        match self.load_album(album, artist) {
            // Compilations tag the album artist inconsistently; retry by title only.
            Err(BridgeError::NoAlbumFound) if artist.is_some() => self.load_album(album, None),
            other => other,
        }
    }

    fn load_album(&self, title: &str, artist: Option<&str>) -> Result<LoadedDisc, BridgeError> {
        let output = self.run_script(&Self::album_tracks_script(title, artist))?;
        let mut disc = parse_album_tracks(&output).ok_or(BridgeError::NoAlbumFound)?;
        if let Some(first) = disc.track_ids.first() {
            disc.artwork_bytes = self.export_first_artwork(first);
        }
        Ok(disc)
    }

    fn load_playlist(&self, playlist_id: &str) -> Result<LoadedDisc, BridgeError> {
        let script = format!(
            r#"{SCRIPT_PRELUDE}tell application "Music"
    set found to (every playlist whose persistent ID is {id})
    if (count of found) is 0 then return "ERR:NO_PLAYLIST"
    set pl to item 1 of found
    set out to (name of pl) & rs
    repeat with t in (every track of pl)
        set out to out & (persistent ID of t) & rs
    end repeat
    return out
end tell"#,
            id = applescript_string(playlist_id),
        );
        let output = self.run_script(&script)?;
        let mut disc = parse_playlist_tracks(playlist_id, &output).ok_or(BridgeError::NoPlaylistFound)?;
        if let Some(first) = disc.track_ids.first() {
            disc.artwork_bytes = self.export_first_artwork(first);
        }
        Ok(disc)
    }

    fn search_albums(&self, query: &str, limit: usize) -> Result<Vec<Suggestion>, BridgeError> {
        let script = format!(
            r#"{SCRIPT_PRELUDE}tell application "Music"
    set out to ""
    repeat with t in (every track of library playlist 1 whose album contains {query})
        set out to out & (album of t) & fs & (album artist of t) & fs & (artist of t) & rs
    end repeat
    return out
end tell"#,
            query = applescript_string(query),
        );
        let output = self.run_script(&script)?;
        Ok(parse_album_suggestions(&output, limit))
    }

    fn search_playlists(&self, query: &str, limit: usize) -> Result<Vec<Suggestion>, BridgeError> {
        let script = format!(
            r#"{SCRIPT_PRELUDE}tell application "Music"
    set out to ""
    repeat with pl in (every user playlist whose name contains {query})
        set out to out & (name of pl) & fs & (persistent ID of pl) & rs
    end repeat
    return out
end tell"#,
            query = applescript_string(query),
        );
        let output = self.run_script(&script)?;
        Ok(parse_playlist_suggestions(&output, limit))
    }

    fn current_playback_info(&self) -> Result<Observation, BridgeError> {
        let script = format!(
            r#"{SCRIPT_PRELUDE}tell application "Music"
    if player state is stopped then return "ERR:NO_TRACK"
    try
        set t to current track
    on error
        return "ERR:NO_TRACK"
    end try
    set pid to ""
    try
        set pid to persistent ID of current playlist
    end try
    set isPlaying to (player state is playing) as text
    return (persistent ID of t) & fs & (track number of t as text) & fs & (player position as text) & fs & (album of t) & fs & (artist of t) & fs & pid & fs & isPlaying
end tell"#
        );
        let output = self.run_script(&script)?;
        parse_observation(&output).ok_or(BridgeError::NoCurrentTrack)
    }

    fn play_track_list(&self, track_ids: &[String], label: &str) -> Result<(), BridgeError> {
        if track_ids.is_empty() {
            return Err(BridgeError::NoCurrentTrack);
        }
        debug!(
            "AppleMusicBridge: playing {} track(s) for {}",
            track_ids.len(),
            label
        );
        let ids = track_ids
            .iter()
            .map(|id| applescript_string(id))
            .collect::<Vec<_>>()
            .join(", ");
        let script = format!(
            r#"{SCRIPT_PRELUDE}tell application "Music"
    if not (exists user playlist {name}) then make new user playlist with properties {{name:{name}}}
    set pl to user playlist {name}
    delete every track of pl
    repeat with tid in {{{ids}}}
        try
            duplicate (first track of library playlist 1 whose persistent ID is (tid as text)) to pl
        end try
    end repeat
    if (count of tracks of pl) is 0 then return "ERR:NO_TRACK"
    play pl
    return "OK"
end tell"#,
            name = applescript_string(&self.queue_playlist_name),
        );
        self.run_script(&script).map(|_| ())
    }

    fn play_pause(&self) -> Result<(), BridgeError> {
        self.run_script(&format!(
            "{SCRIPT_PRELUDE}tell application \"Music\" to playpause\nreturn \"OK\""
        ))
        .map(|_| ())
    }

    fn next_track(&self) -> Result<(), BridgeError> {
        self.run_script(&format!(
            "{SCRIPT_PRELUDE}tell application \"Music\" to next track\nreturn \"OK\""
        ))
        .map(|_| ())
    }

    fn previous_track(&self) -> Result<(), BridgeError> {
        self.run_script(&format!(
            "{SCRIPT_PRELUDE}tell application \"Music\" to back track\nreturn \"OK\""
        ))
        .map(|_| ())
    }
}

/// Quotes `value` as an AppleScript string literal.
pub fn applescript_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        match ch {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('"');
    quoted
}

fn non_empty(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

fn error_marker(output: &str) -> Option<BridgeError> {
    let marker = output.trim().strip_prefix("ERR:")?;
    Some(match marker {
        "NOT_RUNNING" => BridgeError::MusicNotRunning,
        "NO_TRACK" => BridgeError::NoCurrentTrack,
        "NO_ALBUM" => BridgeError::NoAlbumFound,
        "NO_PLAYLIST" => BridgeError::NoPlaylistFound,
        other => BridgeError::ScriptFailed(other.to_string()),
    })
}

fn map_script_failure(stderr: &str) -> BridgeError {
    if stderr.contains("-1743") || stderr.contains("Not authorized") {
        BridgeError::NotAuthorized
    } else if stderr.contains("-600") || stderr.contains("isn’t running") {
        BridgeError::MusicNotRunning
    } else {
        warn!("AppleMusicBridge: script failed: {}", stderr);
        BridgeError::ScriptFailed(stderr.to_string())
    }
}

/// AppleScript renders reals with the user's decimal separator.
fn parse_locale_float(value: &str) -> Option<f64> {
    value.trim().replace(',', ".").parse::<f64>().ok()
}

fn parse_observation(output: &str) -> Option<Observation> {
    let fields: Vec<&str> = output.split(FIELD_SEPARATOR).collect();
    if fields.len() < 7 {
        return None;
    }
    Some(Observation {
        track_id: non_empty(fields[0]).map(str::to_string),
        track_number: fields[1].trim().parse::<i64>().ok(),
        elapsed_seconds: parse_locale_float(fields[2]),
        album_title: non_empty(fields[3]).map(str::to_string),
        artist_name: non_empty(fields[4]).map(str::to_string),
        external_playlist_id: non_empty(fields[5]).map(str::to_string),
        is_playing: fields[6].trim() == "true",
    })
}

struct AlbumTrackRow {
    id: String,
    disc_number: u32,
    track_number: u32,
}

/// Builds an album disc from track rows, ordered by disc then track number.
fn parse_album_tracks(output: &str) -> Option<LoadedDisc> {
    let mut rows = Vec::new();
    let mut album_title = None;
    let mut artist_name = None;
    for record in output.split(RECORD_SEPARATOR) {
        let fields: Vec<&str> = record.split(FIELD_SEPARATOR).collect();
        if fields.len() < 6 {
            continue;
        }
        let Some(id) = non_empty(fields[0]) else {
            continue;
        };
        if album_title.is_none() {
            album_title = non_empty(fields[3]).map(str::to_string);
        }
        if artist_name.is_none() {
            artist_name = non_empty(fields[4])
                .or_else(|| non_empty(fields[5]))
                .map(str::to_string);
        }
        rows.push(AlbumTrackRow {
            id: id.to_string(),
            disc_number: fields[1].trim().parse().unwrap_or(0),
            track_number: fields[2].trim().parse().unwrap_or(0),
        });
    }
    if rows.is_empty() {
        return None;
    }
    // Stable sort keeps library order among untagged tracks.
    rows.sort_by_key(|row| (row.disc_number.max(1), row.track_number));

    let disc_numbers: std::collections::HashSet<u32> =
        rows.iter().map(|row| row.disc_number.max(1)).collect();
    // Multi-disc albums repeat track numbers, so they fall back to positions.
    let track_numbers_by_id: HashMap<String, u32> = if disc_numbers.len() > 1 {
        HashMap::new()
    } else {
        rows.iter()
            .filter(|row| row.track_number > 0)
            .map(|row| (row.id.clone(), row.track_number))
            .collect()
    };

    let title = album_title.clone().unwrap_or_default();
    let source_identifier = match &artist_name {
        Some(artist) => format!("album:{}|{}", title, artist),
        None => format!("album:{}", title),
    };
    Some(LoadedDisc {
        source_type: SourceType::Album,
        source_identifier,
        album_title,
        artist_name,
        artwork_bytes: None,
        track_ids: rows.into_iter().map(|row| row.id).collect(),
        track_numbers_by_id,
    })
}

fn parse_playlist_tracks(playlist_id: &str, output: &str) -> Option<LoadedDisc> {
    let mut records = output.split(RECORD_SEPARATOR);
    let name = records.next().and_then(non_empty)?.to_string();
    Some(LoadedDisc {
        source_type: SourceType::Playlist,
        source_identifier: playlist_id.to_string(),
        album_title: Some(name),
        artist_name: None,
        artwork_bytes: None,
        track_ids: records.filter_map(non_empty).map(str::to_string).collect(),
        track_numbers_by_id: HashMap::new(),
    })
}

fn parse_album_suggestions(output: &str, limit: usize) -> Vec<Suggestion> {
    let mut seen = std::collections::HashSet::new();
    let mut suggestions = Vec::new();
    for record in output.split(RECORD_SEPARATOR) {
        if suggestions.len() >= limit {
            break;
        }
        let fields: Vec<&str> = record.split(FIELD_SEPARATOR).collect();
        if fields.len() < 3 {
            continue;
        }
        let Some(title) = non_empty(fields[0]) else {
            continue;
        };
        let artist = non_empty(fields[1]).or_else(|| non_empty(fields[2]));
        let key = (title.to_lowercase(), artist.map(str::to_lowercase));
        if !seen.insert(key) {
            continue;
        }
        suggestions.push(Suggestion {
            kind: SuggestionKind::Album,
            title: title.to_string(),
            subtitle: artist.map(str::to_string),
            identifier: title.to_string(),
        });
    }
    suggestions
}

fn parse_playlist_suggestions(output: &str, limit: usize) -> Vec<Suggestion> {
    output
        .split(RECORD_SEPARATOR)
        .filter_map(|record| {
            let (name, id) = record.split_once(FIELD_SEPARATOR)?;
            Some(Suggestion {
                kind: SuggestionKind::Playlist,
                title: non_empty(name)?.to_string(),
                subtitle: None,
                identifier: non_empty(id)?.to_string(),
            })
        })
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[&str]) -> String {
        let separator = FIELD_SEPARATOR.to_string();
        let mut joined = fields.join(separator.as_str());
        joined.push(RECORD_SEPARATOR);
        joined
    }

    #[test]
    fn test_applescript_string_escapes_quotes_and_backslashes() {
        assert_eq!(applescript_string("plain"), "\"plain\"");
        assert_eq!(
            applescript_string("say \"hi\" \\ bye"),
            "\"say \\\"hi\\\" \\\\ bye\""
        );
        assert_eq!(applescript_string("a\nb"), "\"a\\nb\"");
    }

    #[test]
    fn test_error_markers_map_to_bridge_errors() {
        assert_eq!(error_marker("ERR:NOT_RUNNING"), Some(BridgeError::MusicNotRunning));
        assert_eq!(error_marker("ERR:NO_TRACK"), Some(BridgeError::NoCurrentTrack));
        assert_eq!(error_marker("ERR:NO_PLAYLIST"), Some(BridgeError::NoPlaylistFound));
        assert_eq!(error_marker("OK"), None);
        assert_eq!(
            map_script_failure("execution error: Not authorized to send Apple events to Music. (-1743)"),
            BridgeError::NotAuthorized
        );
    }

    #[test]
    fn test_parse_observation_reads_all_fields() {
        let separator = FIELD_SEPARATOR.to_string();
        let output = ["ABC123", "4", "61,5", "Kind of Blue", "Miles Davis", "PL9", "true"]
            .join(separator.as_str());
        let observation = parse_observation(&output).expect("observation parses");
        assert_eq!(observation.track_id.as_deref(), Some("ABC123"));
        assert_eq!(observation.track_number, Some(4));
        assert_eq!(observation.elapsed_seconds, Some(61.5));
        assert_eq!(observation.album_title.as_deref(), Some("Kind of Blue"));
        assert_eq!(observation.external_playlist_id.as_deref(), Some("PL9"));
        assert!(observation.is_playing);
        assert_eq!(parse_observation("garbage"), None);
    }

    #[test]
    fn test_parse_album_tracks_sorts_by_disc_then_track() {
        let output = [
            record(&["T3", "1", "3", "Album", "Band", "Band"]),
            record(&["T1", "1", "1", "Album", "Band", "Band"]),
            record(&["T2", "1", "2", "Album", "Band", "Band"]),
        ]
        .concat();
        let disc = parse_album_tracks(&output).expect("album parses");
        assert_eq!(disc.track_ids, vec!["T1", "T2", "T3"]);
        assert_eq!(disc.track_numbers_by_id.get("T3"), Some(&3));
        assert_eq!(disc.album_title.as_deref(), Some("Album"));
        assert_eq!(disc.artist_name.as_deref(), Some("Band"));
        assert_eq!(disc.source_type, SourceType::Album);
    }

    #[test]
    fn test_multi_disc_album_uses_positional_numbers() {
        let output = [
            record(&["B1", "2", "1", "Double", "", "Solo"]),
            record(&["A2", "1", "2", "Double", "", "Solo"]),
            record(&["A1", "1", "1", "Double", "", "Solo"]),
        ]
        .concat();
        let disc = parse_album_tracks(&output).expect("album parses");
        assert_eq!(disc.track_ids, vec!["A1", "A2", "B1"]);
        assert!(disc.track_numbers_by_id.is_empty());
        assert_eq!(disc.artist_name.as_deref(), Some("Solo"));
    }

    #[test]
    fn test_parse_playlist_tracks_keeps_order() {
        let output = format!("Road Trip{RECORD_SEPARATOR}X{RECORD_SEPARATOR}Y{RECORD_SEPARATOR}");
        let disc = parse_playlist_tracks("PL1", &output).expect("playlist parses");
        assert_eq!(disc.source_identifier, "PL1");
        assert_eq!(disc.album_title.as_deref(), Some("Road Trip"));
        assert_eq!(disc.track_ids, vec!["X", "Y"]);
        assert_eq!(disc.source_type, SourceType::Playlist);
    }

    #[test]
    fn test_album_suggestions_are_deduplicated_and_limited() {
        let output = [
            record(&["Blue", "Joni", "Joni"]),
            record(&["Blue", "Joni", "Joni"]),
            record(&["Blue Train", "", "Coltrane"]),
            record(&["Blues", "X", "X"]),
        ]
        .concat();
        let suggestions = parse_album_suggestions(&output, 2);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].title, "Blue");
        assert_eq!(suggestions[1].subtitle.as_deref(), Some("Coltrane"));
    }

    #[test]
    fn test_playlist_suggestions_carry_persistent_ids() {
        let output = [record(&["Chill", "AAA"]), record(&["", "BBB"])].concat();
        let suggestions = parse_playlist_suggestions(&output, 10);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].identifier, "AAA");
        assert_eq!(suggestions[0].kind, SuggestionKind::Playlist);
    }
}
