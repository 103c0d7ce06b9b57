//! Playback modes and the "what plays next" engine.
//!
//! The engine never talks to the player. It looks at the slot contents and the
//! mode-scoped cursors in [`PlaybackState`] and returns the track list that
//! should be handed to the player next, or the reason nothing can be played.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::warn;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::slots::{is_valid_slot_index, DiscSlotStore, SLOT_COUNT};

/// Sequencing policy governing automatic advancement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackMode {
    #[default]
    Normal, // Player advances within the engaged disc on its own
    PlayAll,         // Every loaded disc in slot order, then stop
    DiscRepeat,      // Engaged disc over and over
    OneDiscShuffle,  // Random tracks from the engaged disc
    FiveDiscShuffle, // Random tracks from random loaded discs
    Spiral,          // Track 1 of every disc, then track 2 of every disc, ...
}

impl PlaybackMode {
    pub const ALL: [PlaybackMode; 6] = [
        PlaybackMode::Normal,
        PlaybackMode::PlayAll,
        PlaybackMode::DiscRepeat,
        PlaybackMode::OneDiscShuffle,
        PlaybackMode::FiveDiscShuffle,
        PlaybackMode::Spiral,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PlaybackMode::Normal => "normal",
            PlaybackMode::PlayAll => "play-all",
            PlaybackMode::DiscRepeat => "disc-repeat",
            PlaybackMode::OneDiscShuffle => "one-disc-shuffle",
            PlaybackMode::FiveDiscShuffle => "five-disc-shuffle",
            PlaybackMode::Spiral => "spiral",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let wanted = label.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|mode| mode.label() == wanted)
    }

    /// Modes in which the changer picks each track itself.
    pub fn is_track_by_track(self) -> bool {
        matches!(
            self,
            PlaybackMode::PlayAll
                | PlaybackMode::OneDiscShuffle
                | PlaybackMode::FiveDiscShuffle
                | PlaybackMode::Spiral
        )
    }
}

/// Spiral cursor: the next scan looks for `track_number` starting at `disc_cursor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpiralPosition {
    pub track_number: u32,
    pub disc_cursor: usize,
}

impl Default for SpiralPosition {
    fn default() -> Self {
        Self {
            track_number: 1,
            disc_cursor: 1,
        }
    }
}

/// Play-all cursor: position of the track most recently handed to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayAllCursor {
    pub disc_index: usize,
    pub track_index: usize,
}

/// Persisted changer state besides the slots themselves.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    #[serde(default = "default_disc_index")]
    pub active_disc_index: usize,
    #[serde(default)]
    pub mode: PlaybackMode,
    #[serde(default)]
    pub lid_open: bool,
    #[serde(default)]
    pub spiral_position: Option<SpiralPosition>,
    #[serde(default)]
    pub play_all_cursor: Option<PlayAllCursor>,
}

fn default_disc_index() -> usize {
    1
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            active_disc_index: 1,
            mode: PlaybackMode::Normal,
            lid_open: false,
            spiral_position: None,
            play_all_cursor: None,
        }
    }
}

impl PlaybackState {
    /// Clamps restored values back into their valid ranges.
    pub fn normalized(mut self) -> Self {
        if !is_valid_slot_index(self.active_disc_index) {
            self.active_disc_index = 1;
        }
        if self.mode != PlaybackMode::Spiral {
            self.spiral_position = None;
        }
        if self.mode != PlaybackMode::PlayAll {
            self.play_all_cursor = None;
        }
        if let Some(position) = self.spiral_position {
            // A cursor one past the last disc waits for the next track number.
            let cursor_valid = (1..=SLOT_COUNT + 1).contains(&position.disc_cursor);
            if position.track_number == 0 || !cursor_valid {
                self.spiral_position = Some(SpiralPosition::default());
            }
        }
        if let Some(cursor) = self.play_all_cursor {
            if !is_valid_slot_index(cursor.disc_index) {
                self.play_all_cursor = None;
            }
        }
        self
    }

    pub fn set_active_disc(&mut self, slot_index: usize) -> bool {
        if !is_valid_slot_index(slot_index) {
            return false;
        }
        self.active_disc_index = slot_index;
        true
    }

    /// Switches mode and resets every mode-scoped cursor to the entering
    /// mode's initial value. Re-selecting the current mode also resets.
    pub fn set_mode(&mut self, mode: PlaybackMode) {
        self.mode = mode;
        self.play_all_cursor = None;
        self.spiral_position = match mode {
            PlaybackMode::Spiral => Some(SpiralPosition::default()),
            _ => None,
        };
    }
}

/// What the player should be asked to play.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayTarget {
    pub disc_index: usize,
    /// Track list handed to the player, in play order.
    pub track_ids: Vec<String>,
    /// Display/playlist label for the issued list.
    pub label: String,
    /// Delay to apply before issuing the play command.
    pub swap_delay: Duration,
}

/// Terminal "nothing to play" outcomes. None of these are failures of the
/// changer itself; they are surfaced as status lines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoEligibleTarget {
    #[error("No discs loaded")]
    NoDiscsLoaded,
    #[error("Disc {0} is empty")]
    DiscNotLoaded(usize),
    #[error("Disc {0} has no tracks")]
    DiscHasNoTracks(usize),
    #[error("Spiral finished")]
    SpiralExhausted,
    #[error("Play-all finished")]
    PlayAllComplete,
    #[error("Track order is handled by the player in normal mode")]
    PlayerDriven,
}

/// Computes play targets for every mode.
pub struct ModeEngine {
    rng: StdRng,
    swap_delay_min_ms: u64,
    swap_delay_max_ms: u64,
}

impl ModeEngine {
    pub fn new(swap_delay_min_ms: u64, swap_delay_max_ms: u64) -> Self {
        let mut seed = [0u8; 32];
        if let Err(err) = getrandom::fill(&mut seed) {
            warn!("ModeEngine: OS randomness unavailable, seeding from clock: {}", err);
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_nanos())
                .unwrap_or_default();
            seed[..16].copy_from_slice(&nanos.to_le_bytes());
        }
        Self::with_rng(StdRng::from_seed(seed), swap_delay_min_ms, swap_delay_max_ms)
    }

    pub fn with_rng(rng: StdRng, swap_delay_min_ms: u64, swap_delay_max_ms: u64) -> Self {
        let (min, max) = if swap_delay_min_ms <= swap_delay_max_ms {
            (swap_delay_min_ms, swap_delay_max_ms)
        } else {
            (swap_delay_max_ms, swap_delay_min_ms)
        };
        Self {
            rng,
            swap_delay_min_ms: min,
            swap_delay_max_ms: max,
        }
    }

    pub fn set_swap_delay_range(&mut self, min_ms: u64, max_ms: u64) {
        self.swap_delay_min_ms = min_ms.min(max_ms);
        self.swap_delay_max_ms = min_ms.max(max_ms);
    }

    /// Target for an explicit "play disc N" request under the current mode.
    ///
    /// Engages `disc_index` and seeds the mode cursor from it.
    pub fn start(
        &mut self,
        state: &mut PlaybackState,
        slots: &DiscSlotStore,
        disc_index: usize,
    ) -> Result<PlayTarget, NoEligibleTarget> {
        if state.mode != PlaybackMode::FiveDiscShuffle && !slots.is_loaded(disc_index) {
            return Err(NoEligibleTarget::DiscNotLoaded(disc_index));
        }
        match state.mode {
            PlaybackMode::Normal | PlaybackMode::DiscRepeat => {
                let target = whole_disc(slots, disc_index)?;
                state.active_disc_index = disc_index;
                Ok(target)
            }
            PlaybackMode::OneDiscShuffle => {
                let target = self.random_track_on(slots, disc_index, None)?;
                state.active_disc_index = disc_index;
                Ok(target)
            }
            PlaybackMode::PlayAll => {
                let target = single_track(slots, disc_index, 0)
                    .ok_or(NoEligibleTarget::DiscHasNoTracks(disc_index))?;
                state.active_disc_index = disc_index;
                state.play_all_cursor = Some(PlayAllCursor {
                    disc_index,
                    track_index: 0,
                });
                Ok(target)
            }
            PlaybackMode::Spiral => {
                let mut scratch = state.clone();
                scratch.spiral_position = Some(SpiralPosition {
                    track_number: 1,
                    disc_cursor: disc_index,
                });
                let target = spiral_step(&mut scratch, slots)?;
                *state = scratch;
                Ok(target)
            }
            // The requested disc only matters as the first pick in other modes.
            PlaybackMode::FiveDiscShuffle => self.five_disc_shuffle(state, slots),
        }
    }

    /// Target after the current track (or disc, for disc repeat) finished or
    /// the user asked for the next track.
    ///
    /// On `Err` the state is left exactly as it was.
    pub fn advance(
        &mut self,
        state: &mut PlaybackState,
        slots: &DiscSlotStore,
        current_track_id: Option<&str>,
    ) -> Result<PlayTarget, NoEligibleTarget> {
        match state.mode {
            PlaybackMode::Normal => Err(NoEligibleTarget::PlayerDriven),
            PlaybackMode::DiscRepeat => {
                if !slots.is_loaded(state.active_disc_index) {
                    return Err(NoEligibleTarget::DiscNotLoaded(state.active_disc_index));
                }
                whole_disc(slots, state.active_disc_index)
            }
            PlaybackMode::OneDiscShuffle => {
                let disc_index = state.active_disc_index;
                if !slots.is_loaded(disc_index) {
                    return Err(NoEligibleTarget::DiscNotLoaded(disc_index));
                }
                self.random_track_on(slots, disc_index, current_track_id)
            }
            PlaybackMode::FiveDiscShuffle => self.five_disc_shuffle(state, slots),
            PlaybackMode::Spiral => {
                let mut scratch = state.clone();
                let target = spiral_step(&mut scratch, slots)?;
                *state = scratch;
                Ok(target)
            }
            PlaybackMode::PlayAll => {
                let (disc_index, track_index) = play_all_step(state.play_all_cursor, slots)?;
                let target = single_track(slots, disc_index, track_index)
                    .ok_or(NoEligibleTarget::DiscHasNoTracks(disc_index))?;
                state.active_disc_index = disc_index;
                state.play_all_cursor = Some(PlayAllCursor {
                    disc_index,
                    track_index,
                });
                Ok(target)
            }
        }
    }

    fn five_disc_shuffle(
        &mut self,
        state: &mut PlaybackState,
        slots: &DiscSlotStore,
    ) -> Result<PlayTarget, NoEligibleTarget> {
        let candidates: Vec<usize> = slots
            .loaded_indices()
            .into_iter()
            .filter(|index| slots.slot(*index).is_some_and(|slot| slot.track_count() > 0))
            .collect();
        if candidates.is_empty() {
            return Err(NoEligibleTarget::NoDiscsLoaded);
        }
        let disc_index = candidates[self.rng.random_range(0..candidates.len())];
        let mut target = self.random_track_on(slots, disc_index, None)?;
        target.swap_delay = Duration::from_millis(
            self.rng
                .random_range(self.swap_delay_min_ms..=self.swap_delay_max_ms),
        );
        state.active_disc_index = disc_index;
        Ok(target)
    }

    fn random_track_on(
        &mut self,
        slots: &DiscSlotStore,
        disc_index: usize,
        current_track_id: Option<&str>,
    ) -> Result<PlayTarget, NoEligibleTarget> {
        let slot = slots
            .slot(disc_index)
            .ok_or(NoEligibleTarget::DiscNotLoaded(disc_index))?;
        let track_count = slot.track_count();
        if track_count == 0 {
            return Err(NoEligibleTarget::DiscHasNoTracks(disc_index));
        }

        let current_position =
            current_track_id.and_then(|id| slot.track_ids.iter().position(|t| t == id));
        let track_index = match current_position {
            // Pick among the other tracks so the same one never plays twice in a row.
            Some(current) if track_count > 1 => {
                let pick = self.rng.random_range(0..track_count - 1);
                if pick >= current {
                    pick + 1
                } else {
                    pick
                }
            }
            _ => self.rng.random_range(0..track_count),
        };
        single_track(slots, disc_index, track_index)
            .ok_or(NoEligibleTarget::DiscHasNoTracks(disc_index))
    }
}

fn disc_label(slots: &DiscSlotStore, disc_index: usize) -> String {
    slots
        .slot(disc_index)
        .and_then(|slot| slot.album_title.clone())
        .unwrap_or_else(|| format!("Disc {disc_index}"))
}

fn whole_disc(slots: &DiscSlotStore, disc_index: usize) -> Result<PlayTarget, NoEligibleTarget> {
    let slot = slots
        .slot(disc_index)
        .ok_or(NoEligibleTarget::DiscNotLoaded(disc_index))?;
    if slot.track_ids.is_empty() {
        return Err(NoEligibleTarget::DiscHasNoTracks(disc_index));
    }
    Ok(PlayTarget {
        disc_index,
        track_ids: slot.track_ids.clone(),
        label: disc_label(slots, disc_index),
        swap_delay: Duration::ZERO,
    })
}

fn single_track(slots: &DiscSlotStore, disc_index: usize, track_index: usize) -> Option<PlayTarget> {
    let track_id = slots.slot(disc_index)?.track_ids.get(track_index)?.clone();
    Some(PlayTarget {
        disc_index,
        track_ids: vec![track_id],
        label: disc_label(slots, disc_index),
        swap_delay: Duration::ZERO,
    })
}

/// Next (disc, track index) for play-all, or completion.
fn play_all_step(
    cursor: Option<PlayAllCursor>,
    slots: &DiscSlotStore,
) -> Result<(usize, usize), NoEligibleTarget> {
    let loaded = slots.loaded_indices();
    if loaded.is_empty() {
        return Err(NoEligibleTarget::NoDiscsLoaded);
    }
    let has_track = |disc: usize, track: usize| {
        slots
            .slot(disc)
            .is_some_and(|slot| track < slot.track_ids.len())
    };

    let Some(cursor) = cursor else {
        return loaded
            .into_iter()
            .find(|disc| has_track(*disc, 0))
            .map(|disc| (disc, 0))
            .ok_or(NoEligibleTarget::PlayAllComplete);
    };

    if has_track(cursor.disc_index, cursor.track_index + 1) {
        return Ok((cursor.disc_index, cursor.track_index + 1));
    }
    loaded
        .into_iter()
        .filter(|disc| *disc > cursor.disc_index)
        .find(|disc| has_track(*disc, 0))
        .map(|disc| (disc, 0))
        .ok_or(NoEligibleTarget::PlayAllComplete)
}

/// Finds the next spiral track and moves the cursor past it.
///
/// Track numbers missing from every loaded disc are skipped in one step.
fn spiral_step(
    state: &mut PlaybackState,
    slots: &DiscSlotStore,
) -> Result<PlayTarget, NoEligibleTarget> {
    if slots.loaded_indices().is_empty() {
        return Err(NoEligibleTarget::NoDiscsLoaded);
    }
    let track_numbers = slots.track_numbers();
    let position = state.spiral_position.unwrap_or_default();

    for &track_number in track_numbers.range(position.track_number..) {
        let start = if track_number == position.track_number {
            position.disc_cursor.clamp(1, SLOT_COUNT + 1)
        } else {
            1
        };
        for disc_index in start..=SLOT_COUNT {
            let Some(slot) = slots.slot(disc_index).filter(|slot| slot.is_loaded()) else {
                continue;
            };
            let Some(track_id) = slot.track_with_number(track_number) else {
                continue;
            };
            let target = PlayTarget {
                disc_index,
                track_ids: vec![track_id.to_string()],
                label: disc_label(slots, disc_index),
                swap_delay: Duration::ZERO,
            };
            state.spiral_position = Some(spiral_cursor_after(track_number, disc_index));
            state.active_disc_index = disc_index;
            return Ok(target);
        }
    }
    Err(NoEligibleTarget::SpiralExhausted)
}

fn spiral_cursor_after(track_number: u32, disc_index: usize) -> SpiralPosition {
    if disc_index < SLOT_COUNT {
        return SpiralPosition {
            track_number,
            disc_cursor: disc_index + 1,
        };
    }
    match track_number.checked_add(1) {
        Some(next) => SpiralPosition {
            track_number: next,
            disc_cursor: 1,
        },
        // Past the last disc of the highest possible number.
        None => SpiralPosition {
            track_number,
            disc_cursor: SLOT_COUNT + 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::tests::disc;
    use std::collections::HashSet;

    fn engine() -> ModeEngine {
        ModeEngine::with_rng(StdRng::seed_from_u64(7), 350, 700)
    }

    fn store_with_counts(counts: [usize; 5]) -> DiscSlotStore {
        let mut store = DiscSlotStore::new();
        for (offset, count) in counts.iter().enumerate() {
            if *count > 0 {
                store.load(offset + 1, disc(&format!("d{}", offset + 1), *count), None);
            }
        }
        store
    }

    fn drain(
        engine: &mut ModeEngine,
        state: &mut PlaybackState,
        store: &DiscSlotStore,
    ) -> (Vec<(usize, String)>, NoEligibleTarget) {
        let mut played = Vec::new();
        loop {
            match engine.advance(state, store, None) {
                Ok(target) => {
                    assert_eq!(target.track_ids.len(), 1);
                    played.push((target.disc_index, target.track_ids[0].clone()));
                }
                Err(reason) => return (played, reason),
            }
            assert!(played.len() < 100, "sequence did not terminate");
        }
    }

    #[test]
    fn test_spiral_visits_each_track_number_across_loaded_discs() {
        let store = store_with_counts([3, 0, 5, 2, 4]);
        let mut state = PlaybackState::default();
        state.set_mode(PlaybackMode::Spiral);
        let mut engine = engine();

        let (played, reason) = drain(&mut engine, &mut state, &store);

        let expected: Vec<(usize, String)> = [
            (1, 1), (3, 1), (4, 1), (5, 1),
            (1, 2), (3, 2), (4, 2), (5, 2),
            (1, 3), (3, 3), (5, 3),
            (3, 4), (5, 4),
            (3, 5),
        ]
        .into_iter()
        .map(|(disc_index, track)| (disc_index, format!("d{disc_index}-t{track}")))
        .collect();
        assert_eq!(played, expected);
        assert_eq!(reason, NoEligibleTarget::SpiralExhausted);

        // Exhaustion is terminal.
        let before = state.clone();
        assert_eq!(
            engine.advance(&mut state, &store, None),
            Err(NoEligibleTarget::SpiralExhausted)
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_spiral_jumps_over_numbers_no_disc_has() {
        let mut store = DiscSlotStore::new();
        let mut sparse = disc("s", 2);
        sparse.track_numbers_by_id =
            [("s-t1".to_string(), 1), ("s-t2".to_string(), 200_000_000)].into_iter().collect();
        store.load(1, sparse, None);
        store.load(3, disc("p", 1), None);
        let mut state = PlaybackState::default();
        state.set_mode(PlaybackMode::Spiral);

        let (played, reason) = drain(&mut engine(), &mut state, &store);

        assert_eq!(
            played,
            vec![
                (1, "s-t1".to_string()),
                (3, "p-t1".to_string()),
                (1, "s-t2".to_string()),
            ]
        );
        assert_eq!(reason, NoEligibleTarget::SpiralExhausted);
    }

    #[test]
    fn test_spiral_highest_track_number_on_last_disc_then_exhausts() {
        let mut store = DiscSlotStore::new();
        let mut last = disc("z", 1);
        last.track_numbers_by_id = [("z-t1".to_string(), u32::MAX)].into_iter().collect();
        store.load(SLOT_COUNT, last, None);
        let mut state = PlaybackState::default();
        state.set_mode(PlaybackMode::Spiral);
        state.spiral_position = Some(SpiralPosition {
            track_number: u32::MAX,
            disc_cursor: SLOT_COUNT,
        });
        let mut engine = engine();

        let target = engine
            .advance(&mut state, &store, None)
            .expect("track numbered u32::MAX should play");
        assert_eq!(target.track_ids, vec!["z-t1".to_string()]);
        assert_eq!(
            state.spiral_position,
            Some(SpiralPosition {
                track_number: u32::MAX,
                disc_cursor: SLOT_COUNT + 1,
            })
        );
        assert_eq!(state.clone().normalized().spiral_position, state.spiral_position);

        assert_eq!(
            engine.advance(&mut state, &store, None),
            Err(NoEligibleTarget::SpiralExhausted)
        );
    }

    #[test]
    fn test_spiral_uses_explicit_track_numbers() {
        let mut store = DiscSlotStore::new();
        let mut numbered = disc("n", 2);
        numbered.track_numbers_by_id =
            [("n-t1".to_string(), 2), ("n-t2".to_string(), 1)].into_iter().collect();
        store.load(2, numbered, None);
        let mut state = PlaybackState::default();
        state.set_mode(PlaybackMode::Spiral);

        let (played, _) = drain(&mut engine(), &mut state, &store);
        assert_eq!(
            played,
            vec![(2, "n-t2".to_string()), (2, "n-t1".to_string())]
        );
    }

    #[test]
    fn test_play_all_skips_empty_slots_and_completes() {
        let store = store_with_counts([2, 0, 3, 0, 1]);
        let mut state = PlaybackState::default();
        state.set_mode(PlaybackMode::PlayAll);

        let (played, reason) = drain(&mut engine(), &mut state, &store);

        let discs: Vec<usize> = played.iter().map(|(disc_index, _)| *disc_index).collect();
        assert_eq!(discs, vec![1, 1, 3, 3, 3, 5]);
        assert_eq!(played[2].1, "d3-t1");
        assert_eq!(reason, NoEligibleTarget::PlayAllComplete);
        assert_eq!(
            state.play_all_cursor,
            Some(PlayAllCursor {
                disc_index: 5,
                track_index: 0
            })
        );
    }

    #[test]
    fn test_play_all_start_seeds_cursor_at_requested_disc() {
        let store = store_with_counts([2, 0, 1, 0, 0]);
        let mut state = PlaybackState::default();
        state.set_mode(PlaybackMode::PlayAll);
        let mut engine = engine();

        let first = engine.start(&mut state, &store, 3).unwrap();
        assert_eq!(first.track_ids, vec!["d3-t1"]);
        assert_eq!(
            engine.advance(&mut state, &store, None),
            Err(NoEligibleTarget::PlayAllComplete)
        );
        assert_eq!(
            engine.start(&mut state, &store, 2),
            Err(NoEligibleTarget::DiscNotLoaded(2))
        );
    }

    #[test]
    fn test_five_disc_shuffle_without_discs_leaves_state_unchanged() {
        let store = DiscSlotStore::new();
        let mut state = PlaybackState::default();
        state.set_mode(PlaybackMode::FiveDiscShuffle);
        state.active_disc_index = 4;
        let before = state.clone();

        assert_eq!(
            engine().advance(&mut state, &store, None),
            Err(NoEligibleTarget::NoDiscsLoaded)
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_five_disc_shuffle_picks_loaded_discs_with_swap_delay() {
        let store = store_with_counts([0, 4, 0, 3, 0]);
        let mut state = PlaybackState::default();
        state.set_mode(PlaybackMode::FiveDiscShuffle);
        let mut engine = engine();
        let mut seen_discs = HashSet::new();

        for _ in 0..60 {
            let target = engine.advance(&mut state, &store, None).unwrap();
            assert!(target.disc_index == 2 || target.disc_index == 4);
            assert!(store.slot(target.disc_index).unwrap().contains_track(&target.track_ids[0]));
            assert!(target.swap_delay >= Duration::from_millis(350));
            assert!(target.swap_delay <= Duration::from_millis(700));
            assert_eq!(state.active_disc_index, target.disc_index);
            seen_discs.insert(target.disc_index);
        }
        assert_eq!(seen_discs.len(), 2);
    }

    #[test]
    fn test_one_disc_shuffle_never_repeats_current_track() {
        let store = store_with_counts([0, 0, 3, 0, 0]);
        let mut state = PlaybackState::default();
        state.set_mode(PlaybackMode::OneDiscShuffle);
        state.active_disc_index = 3;
        let mut engine = engine();
        let mut current = "d3-t2".to_string();

        for _ in 0..50 {
            let target = engine.advance(&mut state, &store, Some(&current)).unwrap();
            assert_eq!(target.disc_index, 3);
            assert_ne!(target.track_ids[0], current);
            current = target.track_ids[0].clone();
        }
    }

    #[test]
    fn test_one_disc_shuffle_single_track_disc_replays_it() {
        let store = store_with_counts([1, 0, 0, 0, 0]);
        let mut state = PlaybackState::default();
        state.set_mode(PlaybackMode::OneDiscShuffle);
        let target = engine().advance(&mut state, &store, Some("d1-t1")).unwrap();
        assert_eq!(target.track_ids, vec!["d1-t1"]);
    }

    #[test]
    fn test_disc_repeat_restarts_active_disc_from_first_track() {
        let store = store_with_counts([0, 3, 0, 0, 0]);
        let mut state = PlaybackState::default();
        state.set_mode(PlaybackMode::DiscRepeat);
        state.active_disc_index = 2;

        let target = engine().advance(&mut state, &store, Some("d2-t3")).unwrap();
        assert_eq!(target.disc_index, 2);
        assert_eq!(target.track_ids, vec!["d2-t1", "d2-t2", "d2-t3"]);
    }

    #[test]
    fn test_normal_mode_never_auto_advances() {
        let store = store_with_counts([2, 2, 0, 0, 0]);
        let mut state = PlaybackState::default();
        assert_eq!(
            engine().advance(&mut state, &store, None),
            Err(NoEligibleTarget::PlayerDriven)
        );
        let target = engine().start(&mut state, &store, 2).unwrap();
        assert_eq!(target.track_ids, vec!["d2-t1", "d2-t2"]);
        assert_eq!(state.active_disc_index, 2);
    }

    #[test]
    fn test_mode_switch_resets_spiral_cursor() {
        let store = store_with_counts([2, 2, 0, 0, 0]);
        let mut state = PlaybackState::default();
        state.set_mode(PlaybackMode::Spiral);
        let mut engine = engine();
        engine.advance(&mut state, &store, None).unwrap();
        engine.advance(&mut state, &store, None).unwrap();
        engine.advance(&mut state, &store, None).unwrap();
        assert_ne!(state.spiral_position, Some(SpiralPosition::default()));

        state.set_mode(PlaybackMode::Normal);
        assert_eq!(state.spiral_position, None);
        state.set_mode(PlaybackMode::Spiral);
        assert_eq!(
            state.spiral_position,
            Some(SpiralPosition {
                track_number: 1,
                disc_cursor: 1
            })
        );
        let target = engine.advance(&mut state, &store, None).unwrap();
        assert_eq!(target.track_ids, vec!["d1-t1"]);
    }

    #[test]
    fn test_normalized_resets_out_of_range_active_disc() {
        let state = PlaybackState {
            active_disc_index: 9,
            mode: PlaybackMode::Normal,
            lid_open: true,
            spiral_position: Some(SpiralPosition::default()),
            play_all_cursor: None,
        }
        .normalized();
        assert_eq!(state.active_disc_index, 1);
        assert_eq!(state.spiral_position, None);
        assert!(state.lid_open);
    }

    #[test]
    fn test_mode_labels_round_trip() {
        for mode in PlaybackMode::ALL {
            assert_eq!(PlaybackMode::from_label(mode.label()), Some(mode));
        }
        assert_eq!(PlaybackMode::from_label(" Spiral "), Some(PlaybackMode::Spiral));
        assert_eq!(PlaybackMode::from_label("loop"), None);
    }
}
