//! Five fixed disc slots and the metadata loaded into each of them.

use std::collections::{BTreeSet, HashMap};

/// Number of slots in the changer. Slot indices are always `1..=SLOT_COUNT`.
pub const SLOT_COUNT: usize = 5;

/// Kind of content loaded into a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceType {
    #[default]
    Empty,
    Album,
    Playlist,
}

/// Disc payload produced by the automation bridge when something is loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedDisc {
    pub source_type: SourceType,
    pub source_identifier: String,
    pub album_title: Option<String>,
    pub artist_name: Option<String>,
    pub artwork_bytes: Option<Vec<u8>>,
    pub track_ids: Vec<String>,
    pub track_numbers_by_id: HashMap<String, u32>,
}

/// One of the five changer slots.
#[derive(Debug, Clone, PartialEq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscSlot {
    pub slot_index: usize,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub source_identifier: Option<String>,
    #[serde(default)]
    pub album_title: Option<String>,
    #[serde(default)]
    pub artist_name: Option<String>,
    #[serde(default)]
    pub artwork_ref: Option<String>,
    #[serde(default, rename = "trackIDs")]
    pub track_ids: Vec<String>,
    #[serde(default, rename = "trackNumbersByID")]
    pub track_numbers_by_id: HashMap<String, u32>,
}

impl DiscSlot {
    pub fn empty(slot_index: usize) -> Self {
        Self {
            slot_index,
            ..Self::default()
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.source_identifier.is_some()
    }

    pub fn track_count(&self) -> usize {
        self.track_ids.len()
    }

    pub fn contains_track(&self, track_id: &str) -> bool {
        self.track_ids.iter().any(|id| id == track_id)
    }

    /// 1-based position of `track_id` in the play order.
    pub fn position_of(&self, track_id: &str) -> Option<u32> {
        self.track_ids
            .iter()
            .position(|id| id == track_id)
            .map(|index| index as u32 + 1)
    }

    /// Finds the track carrying `track_number`.
    ///
    /// Slots loaded with an explicit number map are looked up by number; slots
    /// without one fall back to the positional index `track_number - 1`.
    pub fn track_with_number(&self, track_number: u32) -> Option<&str> {
        if track_number == 0 {
            return None;
        }
        if self.track_numbers_by_id.is_empty() {
            return self
                .track_ids
                .get(track_number as usize - 1)
                .map(String::as_str);
        }
        self.track_ids
            .iter()
            .find(|id| self.track_numbers_by_id.get(id.as_str()) == Some(&track_number))
            .map(String::as_str)
    }

    /// Highest track number reachable through `track_with_number`.
    /// Track numbers present on this disc, in track order.
    pub fn track_numbers(&self) -> Vec<u32> {
        if self.track_numbers_by_id.is_empty() {
            return (1..=self.track_ids.len() as u32).collect();
        }
        self.track_ids
            .iter()
            .filter_map(|id| self.track_numbers_by_id.get(id))
            .copied()
            .collect()
    }
}

pub fn is_valid_slot_index(slot_index: usize) -> bool {
    (1..=SLOT_COUNT).contains(&slot_index)
}

/// Fixed-size slot storage. Always holds exactly five slots keyed 1..=5.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscSlotStore {
    slots: Vec<DiscSlot>,
}

impl Default for DiscSlotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscSlotStore {
    pub fn new() -> Self {
        Self {
            slots: (1..=SLOT_COUNT).map(DiscSlot::empty).collect(),
        }
    }

    /// Builds a store from arbitrary persisted slots.
    ///
    /// Out-of-range indices are dropped, the first entry wins for duplicated
    /// indices and missing indices become empty slots.
    pub fn from_slots(slots: Vec<DiscSlot>) -> Self {
        let mut store = Self::new();
        let mut seen = [false; SLOT_COUNT];
        for slot in slots {
            if !is_valid_slot_index(slot.slot_index) || seen[slot.slot_index - 1] {
                continue;
            }
            seen[slot.slot_index - 1] = true;
            let index = slot.slot_index;
            store.slots[index - 1] = normalize_slot(slot);
        }
        store
    }

    pub fn slots(&self) -> &[DiscSlot] {
        &self.slots
    }

    pub fn slot(&self, slot_index: usize) -> Option<&DiscSlot> {
        if !is_valid_slot_index(slot_index) {
            return None;
        }
        self.slots.get(slot_index - 1)
    }

    pub fn is_loaded(&self, slot_index: usize) -> bool {
        self.slot(slot_index).is_some_and(DiscSlot::is_loaded)
    }

    /// Loaded slot indices in ascending order.
    pub fn loaded_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|slot| slot.is_loaded())
            .map(|slot| slot.slot_index)
            .collect()
    }

    /// Overwrites a slot with freshly loaded content. Returns `false` for an
    /// out-of-range index, leaving the store untouched.
    pub fn load(&mut self, slot_index: usize, disc: LoadedDisc, artwork_ref: Option<String>) -> bool {
        if !is_valid_slot_index(slot_index) {
            return false;
        }
        let source_identifier = if disc.source_type == SourceType::Empty {
            None
        } else {
            Some(disc.source_identifier)
        };
        self.slots[slot_index - 1] = normalize_slot(DiscSlot {
            slot_index,
            source_type: disc.source_type,
            source_identifier,
            album_title: disc.album_title,
            artist_name: disc.artist_name,
            artwork_ref,
            track_ids: disc.track_ids,
            track_numbers_by_id: disc.track_numbers_by_id,
        });
        true
    }

    /// Empties a slot. Returns `false` for an out-of-range index.
    pub fn remove(&mut self, slot_index: usize) -> bool {
        if !is_valid_slot_index(slot_index) {
            return false;
        }
        self.slots[slot_index - 1] = DiscSlot::empty(slot_index);
        true
    }

    /// Replaces only the artwork reference of a slot.
    pub fn set_artwork(&mut self, slot_index: usize, artwork_ref: Option<String>) -> bool {
        if !is_valid_slot_index(slot_index) {
            return false;
        }
        self.slots[slot_index - 1].artwork_ref = artwork_ref;
        true
    }

    pub fn find_by_track_id(&self, track_id: &str) -> Option<usize> {
        self.slots
            .iter()
            .find(|slot| slot.is_loaded() && slot.contains_track(track_id))
            .map(|slot| slot.slot_index)
    }

    pub fn find_by_source_identifier(&self, source_identifier: &str) -> Option<usize> {
        self.slots
            .iter()
            .find(|slot| slot.source_identifier.as_deref() == Some(source_identifier))
            .map(|slot| slot.slot_index)
    }

    /// Largest track number across all loaded slots.
    /// Distinct track numbers across every loaded slot, ascending.
    pub fn track_numbers(&self) -> BTreeSet<u32> {
        self.slots
            .iter()
            .filter(|slot| slot.is_loaded())
            .flat_map(DiscSlot::track_numbers)
            .collect()
    }
}

fn normalize_slot(mut slot: DiscSlot) -> DiscSlot {
    // Track ids are unique within a slot; keep the first occurrence.
    let mut seen = std::collections::HashSet::new();
    slot.track_ids.retain(|id| seen.insert(id.clone()));
    slot.track_numbers_by_id
        .retain(|id, number| *number > 0 && seen.contains(id));
    if slot.source_identifier.is_none() {
        slot.source_type = SourceType::Empty;
    }
    slot
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn disc(identifier: &str, track_count: usize) -> LoadedDisc {
        LoadedDisc {
            source_type: SourceType::Album,
            source_identifier: identifier.to_string(),
            album_title: Some(format!("{identifier} album")),
            artist_name: Some(format!("{identifier} artist")),
            artwork_bytes: None,
            track_ids: (1..=track_count)
                .map(|n| format!("{identifier}-t{n}"))
                .collect(),
            track_numbers_by_id: HashMap::new(),
        }
    }

    #[test]
    fn test_new_store_has_five_empty_slots() {
        let store = DiscSlotStore::new();
        assert_eq!(store.slots().len(), SLOT_COUNT);
        for (offset, slot) in store.slots().iter().enumerate() {
            assert_eq!(slot.slot_index, offset + 1);
            assert!(!slot.is_loaded());
        }
        assert!(store.loaded_indices().is_empty());
    }

    #[test]
    fn test_out_of_range_load_and_remove_are_noops() {
        let mut store = DiscSlotStore::new();
        store.load(2, disc("a", 3), None);
        let before = store.clone();

        assert!(!store.load(0, disc("b", 2), None));
        assert!(!store.load(6, disc("b", 2), None));
        assert!(!store.remove(0));
        assert!(!store.remove(42));

        assert_eq!(store, before);
        assert_eq!(store.slots().len(), SLOT_COUNT);
    }

    #[test]
    fn test_load_preserves_index_and_remove_clears_everything_else() {
        let mut store = DiscSlotStore::new();
        assert!(store.load(4, disc("album", 2), Some("art.png".to_string())));

        let slot = store.slot(4).expect("slot 4 exists");
        assert_eq!(slot.slot_index, 4);
        assert_eq!(slot.source_identifier.as_deref(), Some("album"));
        assert_eq!(slot.artwork_ref.as_deref(), Some("art.png"));
        assert_eq!(store.loaded_indices(), vec![4]);

        assert!(store.remove(4));
        assert_eq!(store.slot(4), Some(&DiscSlot::empty(4)));
    }

    #[test]
    fn test_from_slots_drops_invalid_and_fills_gaps() {
        let mut loaded = DiscSlot::empty(3);
        loaded.source_identifier = Some("x".to_string());
        loaded.source_type = SourceType::Playlist;
        let mut duplicate = loaded.clone();
        duplicate.source_identifier = Some("y".to_string());

        let store = DiscSlotStore::from_slots(vec![
            DiscSlot::empty(0),
            loaded.clone(),
            duplicate,
            DiscSlot::empty(9),
        ]);

        assert_eq!(store.slots().len(), SLOT_COUNT);
        assert_eq!(store.slot(3), Some(&loaded));
        assert_eq!(store.loaded_indices(), vec![3]);
    }

    #[test]
    fn test_track_with_number_prefers_number_map_then_position() {
        let mut numbered = disc("n", 3);
        numbered.track_numbers_by_id = HashMap::from([
            ("n-t1".to_string(), 2),
            ("n-t2".to_string(), 5),
        ]);
        let mut store = DiscSlotStore::new();
        store.load(1, numbered, None);
        store.load(2, disc("p", 3), None);

        let numbered = store.slot(1).unwrap();
        assert_eq!(numbered.track_with_number(5), Some("n-t2"));
        assert_eq!(numbered.track_with_number(1), None);
        assert_eq!(numbered.track_numbers(), vec![2, 5]);

        let positional = store.slot(2).unwrap();
        assert_eq!(positional.track_with_number(3), Some("p-t3"));
        assert_eq!(positional.track_with_number(4), None);
        assert_eq!(positional.track_with_number(0), None);

        assert_eq!(store.track_numbers(), BTreeSet::from([1, 2, 3, 5]));
    }

    #[test]
    fn test_duplicate_track_ids_are_collapsed_on_load() {
        let mut payload = disc("d", 2);
        payload.track_ids.push("d-t1".to_string());
        let mut store = DiscSlotStore::new();
        store.load(5, payload, None);
        assert_eq!(store.slot(5).unwrap().track_ids, vec!["d-t1", "d-t2"]);
    }
}
