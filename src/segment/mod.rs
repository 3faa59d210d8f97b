//! Segment Module
//!
//! Append-only segment files plus the side files that travel with them.
//!
//! ## Responsibilities
//! - Append encoded records to the active segment and rotate it
//! - Resolve (segment, offset, length) to a verified record
//! - Sequentially scan a segment for recovery and compaction
//! - Write and validate hint files
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── 000001.seg        sealed segment
//!   ├── 000001.hint       hint file for 000001.seg
//!   ├── 000004.seg        active segment (always the highest id)
//!   ├── 000005.merge      merge output not yet committed
//!   └── MERGE_MANIFEST    segments superseded by a committed merge
//! ```

mod hint;
mod iterator;
mod reader;
mod writer;

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

pub use hint::{HintEntry, HintFile};
pub use iterator::{ScanStop, ScannedRecord, SegmentIterator};
pub use reader::SegmentReader;
pub use writer::{PendingHint, SegmentFile, SegmentWriter};

// =============================================================================
// File Naming
// =============================================================================

/// Extension of segment files
pub const SEGMENT_EXT: &str = "seg";

/// Extension of hint files
pub const HINT_EXT: &str = "hint";

/// Extension of merge output that has not been committed yet
pub const MERGE_EXT: &str = "merge";

/// Name of the merge manifest
pub const MANIFEST_FILENAME: &str = "MERGE_MANIFEST";

/// Path of segment `id`: "000042.seg"
pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:06}.{}", id, SEGMENT_EXT))
}

/// Path of the hint file for segment `id`: "000042.hint"
pub fn hint_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:06}.{}", id, HINT_EXT))
}

/// Path of uncommitted merge output `id`: "000042.merge"
pub fn merge_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:06}.{}", id, MERGE_EXT))
}

/// Parse the id from a file name with the given extension
/// "000042.seg" → Some(42)
pub fn parse_file_id(path: &Path, ext: &str) -> Option<u64> {
    if path.extension()?.to_str()? != ext {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// Ids of every file in `dir` with the given extension, ascending
pub fn list_ids(dir: &Path, ext: &str) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            if let Some(id) = parse_file_id(&path, ext) {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// fsync a directory so renames and deletions inside it are durable
pub fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

// =============================================================================
// Shared Types
// =============================================================================

/// Where an appended record landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    pub segment_id: u64,
    pub offset: u64,
    pub length: u32,
}

/// Hands out segment ids.
///
/// Rotation and compaction draw from the same counter so ids never repeat.
#[derive(Debug)]
pub struct SegmentIds {
    next: AtomicU64,
}

impl SegmentIds {
    /// Start allocating at `next`
    pub fn new(next: u64) -> Self {
        Self {
            next: AtomicU64::new(next.max(1)),
        }
    }

    /// Take the next unused id
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The id the next `allocate` call returns
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}
