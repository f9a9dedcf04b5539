//! Open-addressed Robin-Hood hash table mapping string keys to indices
//!
//! This table interns identifiers: the strings themselves live in a
//! caller-owned list, and the table stores only small integer indices into
//! that list. A lookup hashes the string and probes for a slot whose entry
//! points at an equal string.
//!
//! The whole table is one heap block. Entries are addressed downward (the
//! entry for slot 0 sits adjacent to the metadata region) and metadata bytes
//! upward, so the first cache line touched on a lookup carries both the slot
//! shift state and the home slot's metadata. A metadata byte of 0 means the
//! slot is empty; a value `p > 0` means the slot is occupied at probe
//! distance `p` from its home slot. A sentinel byte of 1 one past the last
//! slot terminates probe sequences that fall off the end.

use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Smallest table size, as a power of two.
pub const INDEX_MIN_SIZE_BASE_2: u8 = 3;

/// Probe distances reaching this value force a resize before the next insert.
pub const MAX_PROBE_DISTANCE: u32 = 255;

/// Target fill ratio of the official slot region.
pub const LOAD_FACTOR: f64 = 0.75;

/// Each slot's entry is one index into the caller's string list.
const ENTRY_SIZE: usize = std::mem::size_of::<u32>();

/// Robin-Hood hash table from externally stored string keys to `u32` indices.
///
/// The table is not internally synchronized; callers confine it to one thread
/// or guard it with their own lock.
#[derive(Debug)]
pub struct IndexHash {
    /// Single backing block: entries region, then metadata region plus the
    /// sentinel byte.
    buffer: Box<[u8]>,

    /// log2 of the official slot count.
    official_size_log2: u8,

    /// `64 - official_size_log2`; the home slot is the hash shifted right by
    /// this amount, so the top hash bits select the slot.
    key_right_shift: u8,

    /// Insertion cap derived from the load factor. Zero forces a grow on the
    /// next insert.
    max_items: u32,

    /// Number of occupied slots.
    cur_items: u32,

    /// Probe distance cap; also the number of extra slots past the official
    /// region that let a key homed at the last official slot probe forward.
    max_probe_distance: u32,
}

impl IndexHash {
    /// Build a table sized for `expected_entries` insertions without growth.
    pub fn with_expected(expected_entries: u32) -> IndexHash {
        let needed = (expected_entries as f64 / LOAD_FACTOR).ceil() as u64;
        let log2 = (needed.max(1).next_power_of_two().trailing_zeros() as u8)
            .max(INDEX_MIN_SIZE_BASE_2);
        IndexHash::with_size_log2(log2)
    }

    fn with_size_log2(official_size_log2: u8) -> IndexHash {
        let official_size = 1usize << official_size_log2;
        let max_probe_distance = official_size.min(MAX_PROBE_DISTANCE as usize) as u32;
        let num_slots = official_size + max_probe_distance as usize;

        let mut buffer = vec![0u8; num_slots * ENTRY_SIZE + num_slots + 1].into_boxed_slice();
        buffer[num_slots * ENTRY_SIZE + num_slots] = 1;

        IndexHash {
            buffer,
            official_size_log2,
            key_right_shift: 64 - official_size_log2,
            max_items: (official_size as f64 * LOAD_FACTOR) as u32,
            cur_items: 0,
            max_probe_distance,
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.cur_items as usize
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.cur_items == 0
    }

    /// Size of the official slot region.
    pub fn official_size(&self) -> usize {
        1usize << self.official_size_log2
    }

    fn num_slots(&self) -> usize {
        self.official_size() + self.max_probe_distance as usize
    }

    fn entries_len(&self) -> usize {
        self.num_slots() * ENTRY_SIZE
    }

    fn hash_key(key: &str) -> u64 {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn home_slot(&self, key: &str) -> usize {
        (Self::hash_key(key) >> self.key_right_shift) as usize
    }

    fn metadata_at(&self, slot: usize) -> u8 {
        self.buffer[self.entries_len() + slot]
    }

    fn set_metadata(&mut self, slot: usize, probe_distance: u8) {
        let offset = self.entries_len() + slot;
        self.buffer[offset] = probe_distance;
    }

    /// Entries grow downward: slot 0's entry is the last `ENTRY_SIZE` bytes
    /// before the metadata region.
    fn entry_offset(&self, slot: usize) -> usize {
        (self.num_slots() - 1 - slot) * ENTRY_SIZE
    }

    fn entry_at(&self, slot: usize) -> u32 {
        let offset = self.entry_offset(slot);
        u32::from_ne_bytes(self.buffer[offset..offset + ENTRY_SIZE].try_into().unwrap())
    }

    fn set_entry(&mut self, slot: usize, index: u32) {
        let offset = self.entry_offset(slot);
        self.buffer[offset..offset + ENTRY_SIZE].copy_from_slice(&index.to_ne_bytes());
    }

    /// Insert `idx`, keyed by `strings[idx]`.
    ///
    /// The caller guarantees the key is not already present; inserting an
    /// equal key twice is a fatal logic error and panics.
    pub fn insert_nocheck(&mut self, strings: &[String], idx: u32) {
        if self.cur_items >= self.max_items {
            self.grow(strings);
        }
        while !self.try_insert(strings, idx) {
            self.grow(strings);
        }
    }

    /// One Robin-Hood insertion attempt. Returns false when the attempt ran
    /// out of probe room, in which case `max_items` has been zeroed and the
    /// caller must grow the table and retry.
    fn try_insert(&mut self, strings: &[String], idx: u32) -> bool {
        let key = strings[idx as usize].as_str();
        let mut slot = self.home_slot(key);
        let mut probe: u32 = 1;
        loop {
            let stored = self.metadata_at(slot) as u32;
            if stored < probe {
                if stored != 0 {
                    // The occupant is closer to home than we are: take its
                    // slot and shift the run up to the next gap forward.
                    let gap = match self.find_gap(slot) {
                        Some(gap) => gap,
                        None => {
                            self.max_items = 0;
                            return false;
                        }
                    };
                    for s in slot..gap {
                        if self.metadata_at(s) as u32 >= self.max_probe_distance {
                            self.max_items = 0;
                            return false;
                        }
                    }
                    self.shift_up(slot, gap);
                }
                self.set_entry(slot, idx);
                self.set_metadata(slot, probe as u8);
                self.cur_items += 1;
                if probe >= self.max_probe_distance {
                    self.max_items = 0;
                }
                return true;
            }
            if stored == probe {
                let occupant = self.entry_at(slot);
                if strings[occupant as usize] == key {
                    panic!("duplicate key inserted into index hash: {key:?}");
                }
            }
            slot += 1;
            probe += 1;
            if probe > self.max_probe_distance {
                self.max_items = 0;
                return false;
            }
        }
    }

    /// First empty slot at or after `slot + 1`, if any before the end.
    fn find_gap(&self, slot: usize) -> Option<usize> {
        let mut gap = slot + 1;
        while gap < self.num_slots() {
            if self.metadata_at(gap) == 0 {
                return Some(gap);
            }
            gap += 1;
        }
        None
    }

    /// Move the occupants of `[slot, gap)` one slot forward into the gap.
    /// Each moved occupant's probe distance grows by one.
    fn shift_up(&mut self, slot: usize, gap: usize) {
        let meta_base = self.entries_len();
        for s in (slot..gap).rev() {
            let bumped = self.buffer[meta_base + s] as u32 + 1;
            debug_assert!(bumped <= self.max_probe_distance);
            self.buffer[meta_base + s + 1] = bumped as u8;
            if bumped >= self.max_probe_distance {
                self.max_items = 0;
            }
        }
        // The run's entries are contiguous bytes (entries are addressed
        // downward), so one copy moves the whole block toward the gap.
        let num_slots = self.num_slots();
        let src_start = (num_slots - gap) * ENTRY_SIZE;
        let src_end = (num_slots - slot) * ENTRY_SIZE;
        self.buffer
            .copy_within(src_start..src_end, src_start - ENTRY_SIZE);
    }

    /// Look up the index stored for `key`, comparing candidate slots against
    /// the caller's string list.
    pub fn fetch(&self, strings: &[String], key: &str) -> Option<u32> {
        if self.cur_items == 0 {
            return None;
        }
        let mut slot = self.home_slot(key);
        let mut probe: u32 = 1;
        loop {
            let stored = self.metadata_at(slot) as u32;
            if stored == probe {
                let occupant = self.entry_at(slot);
                if strings[occupant as usize] == key {
                    return Some(occupant);
                }
            } else if stored < probe {
                // Robin-Hood ordering: a key this far from home would have
                // displaced the occupant, so it cannot be further along.
                return None;
            }
            slot += 1;
            probe += 1;
        }
    }

    /// Rebuild at double the official size and reinsert every occupied slot
    /// in array order. Loops on the rare rebuild that itself runs out of
    /// probe room.
    fn grow(&mut self, strings: &[String]) {
        let mut log2 = self.official_size_log2 + 1;
        'rebuild: loop {
            let mut bigger = IndexHash::with_size_log2(log2);
            for slot in 0..self.num_slots() {
                if self.metadata_at(slot) != 0 && !bigger.try_insert(strings, self.entry_at(slot))
                {
                    log2 += 1;
                    continue 'rebuild;
                }
            }
            *self = bigger;
            return;
        }
    }

    /// Probe distances along the array may rise by at most one per slot.
    #[cfg(test)]
    fn probe_distances_ordered(&self) -> bool {
        (0..self.num_slots() - 1)
            .all(|i| self.metadata_at(i + 1) as u32 <= self.metadata_at(i) as u32 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_list(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_build_minimum_size() {
        let table = IndexHash::with_expected(0);
        assert_eq!(table.official_size(), 1 << INDEX_MIN_SIZE_BASE_2);
        assert!(table.is_empty());
    }

    #[test]
    fn test_build_sized_for_expected_entries() {
        // 100 entries at 0.75 load need 134 slots, so 256 official slots.
        let table = IndexHash::with_expected(100);
        assert_eq!(table.official_size(), 256);
    }

    #[test]
    fn test_insert_and_fetch() {
        let strings = string_list(&["a", "b", "c", "d", "e"]);
        let mut table = IndexHash::with_expected(strings.len() as u32);

        for idx in 0..strings.len() as u32 {
            table.insert_nocheck(&strings, idx);
        }

        assert_eq!(table.len(), 5);
        for (idx, key) in strings.iter().enumerate() {
            assert_eq!(table.fetch(&strings, key), Some(idx as u32));
        }
    }

    #[test]
    fn test_fetch_missing_key() {
        let strings = string_list(&["present"]);
        let mut table = IndexHash::with_expected(1);
        table.insert_nocheck(&strings, 0);

        assert_eq!(table.fetch(&strings, "absent"), None);
    }

    #[test]
    fn test_fetch_on_empty_table() {
        let table = IndexHash::with_expected(8);
        assert_eq!(table.fetch(&[], "anything"), None);
    }

    #[test]
    fn test_growth_preserves_mappings() {
        let strings: Vec<String> = (0..100).map(|i| format!("key_{i}")).collect();
        let mut table = IndexHash::with_expected(4);
        let initial_size = table.official_size();

        for idx in 0..strings.len() as u32 {
            table.insert_nocheck(&strings, idx);
        }

        assert!(table.official_size() > initial_size);
        assert_eq!(table.len(), 100);
        for (idx, key) in strings.iter().enumerate() {
            assert_eq!(table.fetch(&strings, key), Some(idx as u32));
        }
    }

    #[test]
    fn test_final_mappings_independent_of_initial_size() {
        let strings: Vec<String> = (0..200).map(|i| format!("ident{i}")).collect();

        for expected in [0, 4, 64, 300] {
            let mut table = IndexHash::with_expected(expected);
            for idx in 0..strings.len() as u32 {
                table.insert_nocheck(&strings, idx);
            }
            assert_eq!(table.len(), 200);
            for (idx, key) in strings.iter().enumerate() {
                assert_eq!(table.fetch(&strings, key), Some(idx as u32));
            }
        }
    }

    #[test]
    fn test_robin_hood_invariant_holds() {
        let strings: Vec<String> = (0..150).map(|i| format!("sym-{i}")).collect();
        let mut table = IndexHash::with_expected(8);

        for idx in 0..strings.len() as u32 {
            table.insert_nocheck(&strings, idx);
            assert!(table.probe_distances_ordered());
        }
    }

    #[test]
    #[should_panic(expected = "duplicate key")]
    fn test_duplicate_insert_is_fatal() {
        let strings = string_list(&["dup", "dup"]);
        let mut table = IndexHash::with_expected(2);
        table.insert_nocheck(&strings, 0);
        table.insert_nocheck(&strings, 1);
    }

    #[test]
    fn test_dense_fill_forces_displacement() {
        // A tiny table guarantees collisions, exercising the steal-and-shift
        // path and the load-factor grow path together.
        let strings: Vec<String> = (0..40).map(|i| format!("{i}")).collect();
        let mut table = IndexHash::with_expected(0);

        for idx in 0..strings.len() as u32 {
            table.insert_nocheck(&strings, idx);
        }

        assert_eq!(table.len(), 40);
        for (idx, key) in strings.iter().enumerate() {
            assert_eq!(table.fetch(&strings, key), Some(idx as u32));
        }
        assert!(table.probe_distances_ordered());
    }
}
