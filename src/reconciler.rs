//! Maps externally observed playback back onto the changer slots.

use log::{debug, trace};

use crate::bridge::{BridgeError, Observation};
use crate::playback_mode::PlaybackState;
use crate::slots::{DiscSlot, DiscSlotStore};

/// What the changer believes is playing. All fields empty means unknown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NowPlaying {
    pub disc_index: Option<usize>,
    pub track_number: Option<u32>,
    pub elapsed_seconds: Option<f64>,
    pub track_id: Option<String>,
    pub is_playing: bool,
}

impl NowPlaying {
    pub fn is_unknown(&self) -> bool {
        self == &NowPlaying::default()
    }

    /// Drops the slot reference when `slot_index` stops existing.
    pub fn forget_disc(&mut self, slot_index: usize) {
        if self.disc_index == Some(slot_index) {
            self.disc_index = None;
        }
    }
}

/// Which piece of the observation identified the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    TrackId,
    PlaylistId,
    AlbumTitle,
}

fn normalized_text(value: &str) -> String {
    value.trim().to_lowercase()
}

fn album_matches(slot: &DiscSlot, album: &str, artist: Option<&str>) -> bool {
    let Some(slot_album) = slot.album_title.as_deref() else {
        return false;
    };
    if normalized_text(slot_album) != normalized_text(album) {
        return false;
    }
    match artist.map(normalized_text).filter(|artist| !artist.is_empty()) {
        Some(artist) => slot
            .artist_name
            .as_deref()
            .is_some_and(|slot_artist| normalized_text(slot_artist) == artist),
        None => true,
    }
}

/// Finds the slot an observation belongs to. Strategies are tried in
/// priority order and slots in ascending order within each strategy.
pub fn match_slot(observation: &Observation, slots: &DiscSlotStore) -> Option<(usize, MatchReason)> {
    if let Some(track_id) = observation.track_id.as_deref() {
        if let Some(index) = slots.find_by_track_id(track_id) {
            return Some((index, MatchReason::TrackId));
        }
    }

    if let Some(playlist_id) = observation.external_playlist_id.as_deref() {
        if let Some(index) = slots.find_by_source_identifier(playlist_id) {
            return Some((index, MatchReason::PlaylistId));
        }
    }

    let album = observation
        .album_title
        .as_deref()
        .filter(|album| !album.trim().is_empty())?;
    slots
        .slots()
        .iter()
        .filter(|slot| slot.is_loaded())
        .find(|slot| album_matches(slot, album, observation.artist_name.as_deref()))
        .map(|slot| (slot.slot_index, MatchReason::AlbumTitle))
}

/// Track number to display for an observation.
pub fn resolve_track_number(observation: &Observation, matched: Option<&DiscSlot>) -> Option<u32> {
    if let Some(number) = observation.track_number.filter(|number| *number > 0) {
        return u32::try_from(number).ok();
    }
    let slot = matched?;
    let track_id = observation.track_id.as_deref()?;
    slot.track_numbers_by_id
        .get(track_id)
        .copied()
        .filter(|number| *number > 0)
        .or_else(|| slot.position_of(track_id))
}

/// Applies one poll result. A failed poll (`None`) means "unknown".
///
/// A matched slot that differs from the engaged disc is promoted to active.
pub fn reconcile(
    observation: Option<&Observation>,
    slots: &DiscSlotStore,
    state: &mut PlaybackState,
) -> NowPlaying {
    let Some(observation) = observation else {
        return NowPlaying::default();
    };

    let matched = match_slot(observation, slots);
    if let Some((index, reason)) = matched {
        trace!("Reconciler: observation matched disc {} by {:?}", index, reason);
        if state.active_disc_index != index {
            debug!(
                "Reconciler: player moved to disc {}, promoting it from disc {}",
                index, state.active_disc_index
            );
            state.active_disc_index = index;
        }
    }

    let matched_slot = matched.and_then(|(index, _)| slots.slot(index));
    NowPlaying {
        disc_index: matched.map(|(index, _)| index),
        track_number: resolve_track_number(observation, matched_slot),
        elapsed_seconds: observation.elapsed_seconds.filter(|seconds| *seconds > 0.0),
        track_id: observation.track_id.clone(),
        is_playing: observation.is_playing,
    }
}

/// Watches poll results for the end of the track list the changer issued.
#[derive(Debug, Default)]
pub struct TrackEndDetector {
    armed: Vec<String>,
    whole_list: bool,
    seen: Option<String>,
}

impl TrackEndDetector {
    /// Starts watching `track_ids`. With `whole_list`, only the end of the
    /// last track counts; otherwise the end of any armed track does.
    pub fn arm(&mut self, track_ids: Vec<String>, whole_list: bool) {
        self.armed = track_ids;
        self.whole_list = whole_list;
        self.seen = None;
    }

    /// Switches the end rule for the list already armed.
    pub fn set_whole_list(&mut self, whole_list: bool) {
        self.whole_list = whole_list;
    }

    pub fn disarm(&mut self) {
        self.armed.clear();
        self.seen = None;
    }

    pub fn is_armed(&self) -> bool {
        !self.armed.is_empty()
    }

    /// Returns the finished track id once an armed track was seen playing and
    /// the player has since stopped or moved outside the armed list.
    ///
    /// Only `NoCurrentTrack` counts as stopped. Other bridge failures say
    /// nothing about the player and leave the detector as it was.
    pub fn observe(&mut self, observation: &Result<Observation, BridgeError>) -> Option<String> {
        if !self.is_armed() {
            return None;
        }

        let current = match observation {
            Ok(observation) => observation.track_id.as_deref(),
            Err(BridgeError::NoCurrentTrack) => None,
            Err(err) => {
                trace!("Reconciler: ignoring failed poll for end detection ({})", err);
                return None;
            }
        };
        if let Some(track_id) = current {
            if self.armed.iter().any(|id| id == track_id) {
                self.seen = Some(track_id.to_string());
                return None;
            }
        }

        // Nothing of ours has started yet; the play command may still be in flight.
        let finished = self.seen.take()?;
        let counts = !self.whole_list || self.armed.last() == Some(&finished);
        self.disarm();
        if counts {
            Some(finished)
        } else {
            debug!("Reconciler: playback left the issued list early, not advancing");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::tests::disc;
    use std::collections::HashMap;

    fn observation(track_id: Option<&str>, album: Option<&str>, artist: Option<&str>) -> Observation {
        Observation {
            track_id: track_id.map(str::to_string),
            album_title: album.map(str::to_string),
            artist_name: artist.map(str::to_string),
            is_playing: true,
            ..Observation::default()
        }
    }

    fn stopped() -> Result<Observation, BridgeError> {
        Err(BridgeError::NoCurrentTrack)
    }

    fn store() -> DiscSlotStore {
        let mut store = DiscSlotStore::new();
        store.load(1, disc("one", 3), None);
        store.load(3, disc("three", 4), None);
        store
    }

    #[test]
    fn test_track_id_match_beats_album_title_match() {
        let store = store();
        // Track belongs to slot 3 while the album title is slot 1's.
        let observed = observation(Some("three-t2"), Some("one album"), None);
        assert_eq!(match_slot(&observed, &store), Some((3, MatchReason::TrackId)));
    }

    #[test]
    fn test_playlist_id_match_beats_album_title_match() {
        let store = store();
        let mut observed = observation(Some("unknown"), Some("one album"), None);
        observed.external_playlist_id = Some("three".to_string());
        assert_eq!(match_slot(&observed, &store), Some((3, MatchReason::PlaylistId)));
    }

    #[test]
    fn test_album_match_is_trimmed_case_insensitive_and_checks_artist() {
        let store = store();
        let observed = observation(None, Some("  ONE Album "), None);
        assert_eq!(match_slot(&observed, &store), Some((1, MatchReason::AlbumTitle)));

        let observed = observation(None, Some("one album"), Some("One Artist"));
        assert_eq!(match_slot(&observed, &store), Some((1, MatchReason::AlbumTitle)));

        let observed = observation(None, Some("one album"), Some("Somebody Else"));
        assert_eq!(match_slot(&observed, &store), None);
    }

    #[test]
    fn test_reconcile_promotes_matched_disc_and_resolves_position() {
        let store = store();
        let mut state = PlaybackState::default();
        let mut observed = observation(Some("three-t4"), None, None);
        observed.elapsed_seconds = Some(12.5);

        let now_playing = reconcile(Some(&observed), &store, &mut state);

        assert_eq!(state.active_disc_index, 3);
        assert_eq!(now_playing.disc_index, Some(3));
        assert_eq!(now_playing.track_number, Some(4));
        assert_eq!(now_playing.elapsed_seconds, Some(12.5));
    }

    #[test]
    fn test_reconcile_unmatched_clears_disc_and_failure_is_unknown() {
        let store = store();
        let mut state = PlaybackState::default();
        state.active_disc_index = 3;

        let mut observed = observation(Some("elsewhere"), Some("Other"), None);
        observed.track_number = Some(7);
        observed.elapsed_seconds = Some(0.0);
        let now_playing = reconcile(Some(&observed), &store, &mut state);
        assert_eq!(now_playing.disc_index, None);
        assert_eq!(now_playing.track_number, Some(7));
        assert_eq!(now_playing.elapsed_seconds, None);
        assert_eq!(state.active_disc_index, 3);

        assert!(reconcile(None, &store, &mut state).is_unknown());
    }

    #[test]
    fn test_track_number_prefers_direct_then_map_then_position() {
        let mut numbered = disc("n", 2);
        numbered.track_numbers_by_id = HashMap::from([("n-t2".to_string(), 9)]);
        let mut store = DiscSlotStore::new();
        store.load(2, numbered, None);
        let slot = store.slot(2);

        let mut observed = observation(Some("n-t2"), None, None);
        observed.track_number = Some(5);
        assert_eq!(resolve_track_number(&observed, slot), Some(5));

        observed.track_number = Some(0);
        assert_eq!(resolve_track_number(&observed, slot), Some(9));

        observed.track_id = Some("n-t1".to_string());
        assert_eq!(resolve_track_number(&observed, slot), Some(1));

        assert_eq!(resolve_track_number(&observed, None), None);
    }

    #[test]
    fn test_forget_disc_clears_only_matching_reference() {
        let mut now_playing = NowPlaying {
            disc_index: Some(2),
            ..NowPlaying::default()
        };
        now_playing.forget_disc(4);
        assert_eq!(now_playing.disc_index, Some(2));
        now_playing.forget_disc(2);
        assert_eq!(now_playing.disc_index, None);
    }

    #[test]
    fn test_detector_reports_end_after_armed_track_stops() {
        let mut detector = TrackEndDetector::default();
        detector.arm(vec!["a".to_string()], false);

        // Still waiting for the player to switch.
        assert_eq!(detector.observe(&stopped()), None);
        assert_eq!(detector.observe(&Ok(observation(Some("old"), None, None))), None);

        let mut paused = observation(Some("a"), None, None);
        assert_eq!(detector.observe(&Ok(paused.clone())), None);
        paused.is_playing = false;
        assert_eq!(detector.observe(&Ok(paused)), None);

        assert_eq!(detector.observe(&stopped()), Some("a".to_string()));
        assert!(!detector.is_armed());
        assert_eq!(detector.observe(&stopped()), None);
    }

    #[test]
    fn test_detector_whole_list_only_reports_last_track() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut detector = TrackEndDetector::default();

        detector.arm(ids.clone(), true);
        detector.observe(&Ok(observation(Some("a"), None, None)));
        detector.observe(&Ok(observation(Some("b"), None, None)));
        // User stopped mid-disc.
        assert_eq!(detector.observe(&stopped()), None);
        assert!(!detector.is_armed());

        detector.arm(ids, true);
        detector.observe(&Ok(observation(Some("c"), None, None)));
        assert_eq!(
            detector.observe(&Ok(observation(Some("x"), None, None))),
            Some("c".to_string())
        );
    }

    #[test]
    fn test_detector_ignores_transient_poll_failures() {
        let mut detector = TrackEndDetector::default();
        detector.arm(vec!["a".to_string()], false);
        detector.observe(&Ok(observation(Some("a"), None, None)));

        let slow_script = Err(BridgeError::ScriptFailed("timed out".to_string()));
        assert_eq!(detector.observe(&slow_script), None);
        assert_eq!(detector.observe(&Err(BridgeError::MusicNotRunning)), None);
        assert!(detector.is_armed());

        // The track is still playing after the hiccup.
        assert_eq!(detector.observe(&Ok(observation(Some("a"), None, None))), None);
        assert_eq!(detector.observe(&stopped()), Some("a".to_string()));
    }

    #[test]
    fn test_detector_end_rule_follows_whole_list_switch() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let mut detector = TrackEndDetector::default();
        detector.arm(ids, true);
        detector.observe(&Ok(observation(Some("a"), None, None)));

        detector.set_whole_list(false);
        assert_eq!(detector.observe(&stopped()), Some("a".to_string()));
    }
}
