//! Key Index Module
//!
//! In-memory map from key to the location of its newest record.
//!
//! ## Responsibilities
//! - O(1) point lookups for the read path
//! - Single source of truth for "does this key exist and where"
//! - Consistent snapshots for compaction
//! - Compare-and-set repointing when compaction moves a record
//!
//! ## Data Structure Choice
//! HashMap wrapped in a parking_lot RwLock:
//! - No range scans are needed, so ordering buys nothing
//! - Readers share the lock; writers hold it only for the map update

mod table;

pub use table::{KeyDir, KeyDirSnapshot, Repoint};

/// Location and metadata of the newest record for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDirEntry {
    /// Segment holding the record
    pub segment_id: u64,

    /// Byte offset of the record inside the segment
    pub offset: u64,

    /// Encoded record length (header included)
    pub length: u32,

    /// Timestamp of the record
    pub timestamp: u64,

    /// Whether the record is a tombstone.
    /// Only recovery tracks tombstones; the live index never stores them.
    pub tombstone: bool,
}

impl KeyDirEntry {
    /// Entry for a live record
    pub fn live(segment_id: u64, offset: u64, length: u32, timestamp: u64) -> Self {
        Self {
            segment_id,
            offset,
            length,
            timestamp,
            tombstone: false,
        }
    }

    /// Whether this entry describes the record at (segment, offset)
    pub fn points_at(&self, segment_id: u64, offset: u64) -> bool {
        self.segment_id == segment_id && self.offset == offset
    }

    /// Whether a record at (timestamp, segment, offset) supersedes this entry.
    ///
    /// Later timestamp wins; equal timestamps go to the later file position.
    pub fn superseded_by(&self, timestamp: u64, segment_id: u64, offset: u64) -> bool {
        (timestamp, segment_id, offset) >= (self.timestamp, self.segment_id, self.offset)
    }
}
