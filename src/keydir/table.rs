//! KeyDir implementation
//!
//! HashMap-based key index with RwLock for concurrency.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::KeyDirEntry;

/// In-memory key index held for the engine's lifetime
///
/// Mutations happen only after the matching append is durable, so every
/// entry refers to a record that is on disk.
pub struct KeyDir {
    entries: RwLock<HashMap<Vec<u8>, KeyDirEntry>>,
}

impl KeyDir {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Build an index from recovered entries (tombstones are skipped)
    pub fn from_entries(entries: impl IntoIterator<Item = (Vec<u8>, KeyDirEntry)>) -> Self {
        let map = entries
            .into_iter()
            .filter(|(_, entry)| !entry.tombstone)
            .collect();
        Self {
            entries: RwLock::new(map),
        }
    }

    /// Insert or overwrite the entry for a key, returning the previous one
    pub fn upsert(&self, key: Vec<u8>, entry: KeyDirEntry) -> Option<KeyDirEntry> {
        debug_assert!(!entry.tombstone, "tombstones never enter the live index");
        self.entries.write().insert(key, entry)
    }

    /// Remove a key, returning the entry it had
    pub fn remove(&self, key: &[u8]) -> Option<KeyDirEntry> {
        self.entries.write().remove(key)
    }

    /// Look up the current entry for a key
    pub fn lookup(&self, key: &[u8]) -> Option<KeyDirEntry> {
        self.entries.read().get(key).copied()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Apply a batch of compare-and-set repoints under one write lock.
    ///
    /// Readers see either none or all of the batch. Returns how many keys
    /// were repointed; the rest changed since `expected` was read.
    pub fn repoint_all(&self, repoints: Vec<Repoint>) -> usize {
        let mut entries = self.entries.write();
        let mut applied = 0;
        for Repoint { key, expected, new } in repoints {
            if let Some(current) = entries.get_mut(&key) {
                if *current == expected {
                    *current = new;
                    applied += 1;
                }
            }
        }
        applied
    }

    /// Copy the whole index at a single instant
    pub fn snapshot(&self) -> KeyDirSnapshot {
        KeyDirSnapshot {
            entries: self.entries.read().clone(),
        }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for KeyDir {
    fn default() -> Self {
        Self::new()
    }
}

/// A key whose record was copied elsewhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repoint {
    pub key: Vec<u8>,
    /// Entry the key must still have for the repoint to apply
    pub expected: KeyDirEntry,
    pub new: KeyDirEntry,
}

/// Point-in-time copy of the key index
#[derive(Debug, Clone, Default)]
pub struct KeyDirSnapshot {
    entries: HashMap<Vec<u8>, KeyDirEntry>,
}

impl KeyDirSnapshot {
    pub fn get(&self, key: &[u8]) -> Option<&KeyDirEntry> {
        self.entries.get(key)
    }

    /// Whether the snapshot still considers the record at (segment, offset) live
    pub fn is_live(&self, key: &[u8], segment_id: u64, offset: u64) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.points_at(segment_id, offset))
    }

    /// Iterate over every (key, entry) pair
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &KeyDirEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
