//! Recovery
//!
//! Rebuilds the key index from the segments on disk before the engine
//! serves any request.
//!
//! ## Algorithm
//! 1. Discard uncommitted merge output and finish any committed merge
//!    recorded in the manifest
//! 2. Replay segments in ascending id order; sealed segments may be loaded
//!    from a valid hint file, the last (active) segment is always scanned
//! 3. A decode failure at the tail of the last segment is a torn write: the
//!    file is truncated to the last good record. Any other decode failure
//!    is fatal.
//! 4. For every key, the record with the greatest (timestamp, segment,
//!    offset) wins; tombstones are tracked during replay so an older value
//!    can never resurrect a deleted key

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use crate::compaction::MergeManifest;
use crate::error::{CaskError, Result};
use crate::keydir::{KeyDir, KeyDirEntry};
use crate::segment::{
    self, hint_path, segment_path, HintEntry, HintFile, ScanStop, SegmentIterator, HINT_EXT,
    MERGE_EXT, SEGMENT_EXT,
};

/// Statistics from a recovery run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Segments replayed (by scan or hint)
    pub segments_loaded: u64,

    /// Segments replayed from a hint file
    pub hints_used: u64,

    /// Records applied to the replay table
    pub records_replayed: u64,

    /// Keys live after replay
    pub live_keys: u64,

    /// Greatest timestamp seen in any record
    pub max_timestamp: u64,

    /// Bytes cut from the tail of the last segment
    pub truncated_bytes: u64,

    /// Whether a torn write was removed
    pub was_truncated: bool,

    /// Uncommitted merge files deleted
    pub merge_files_removed: u64,

    /// Whether an interrupted merge was finished from its manifest
    pub manifest_replayed: bool,
}

/// Everything the engine needs to resume after recovery
pub struct RecoveredState {
    /// Index of live keys
    pub keydir: KeyDir,

    /// Id of the last segment and one hint entry per record it holds
    pub active: Option<(u64, Vec<HintEntry>)>,

    /// First id no existing segment uses
    pub next_segment_id: u64,

    pub result: RecoveryResult,
}

/// Handles recovery at startup
pub struct Recovery;

impl Recovery {
    /// Recover the database in `dir`
    pub fn run(dir: &Path) -> Result<RecoveredState> {
        let mut result = RecoveryResult::default();

        Self::clean_up(dir, &mut result)?;

        let segment_ids = segment::list_ids(dir, SEGMENT_EXT)?;
        let mut table: HashMap<Vec<u8>, KeyDirEntry> = HashMap::new();
        let mut active = None;

        for (i, &id) in segment_ids.iter().enumerate() {
            let is_last = i + 1 == segment_ids.len();

            if is_last {
                let hints = Self::scan_last(dir, id, &mut table, &mut result)?;
                active = Some((id, hints));
            } else if !Self::load_hint(dir, id, &mut table, &mut result)? {
                Self::scan_sealed(dir, id, &mut table, &mut result)?;
            }

            result.segments_loaded += 1;
        }

        let keydir = KeyDir::from_entries(table);
        result.live_keys = keydir.len() as u64;

        let next_segment_id = segment_ids.last().map(|&id| id + 1).unwrap_or(1);

        Ok(RecoveredState {
            keydir,
            active,
            next_segment_id,
            result,
        })
    }

    /// Remove leftovers of interrupted compactions
    fn clean_up(dir: &Path, result: &mut RecoveryResult) -> Result<()> {
        for id in segment::list_ids(dir, MERGE_EXT)? {
            fs::remove_file(segment::merge_path(dir, id))?;
            result.merge_files_removed += 1;
        }

        if let Some(manifest) = MergeManifest::read(dir)? {
            tracing::info!(
                "Finishing interrupted merge: removing {} superseded segments",
                manifest.segment_ids.len()
            );
            for &id in &manifest.segment_ids {
                remove_if_exists(&segment_path(dir, id))?;
                remove_if_exists(&hint_path(dir, id))?;
            }
            MergeManifest::remove(dir)?;
            result.manifest_replayed = true;
        }

        // A hint without its segment belongs to merge output that never
        // committed, or to a segment the manifest removed
        let segments = segment::list_ids(dir, SEGMENT_EXT)?;
        for id in segment::list_ids(dir, HINT_EXT)? {
            if segments.binary_search(&id).is_err() {
                fs::remove_file(hint_path(dir, id))?;
            }
        }

        segment::sync_dir(dir)
    }

    /// Replay a sealed segment from its hint file; false if no usable hint
    fn load_hint(
        dir: &Path,
        id: u64,
        table: &mut HashMap<Vec<u8>, KeyDirEntry>,
        result: &mut RecoveryResult,
    ) -> Result<bool> {
        let segment_len = fs::metadata(segment_path(dir, id))?.len();
        let entries = match HintFile::read(&hint_path(dir, id), segment_len)? {
            Some(entries) => entries,
            None => return Ok(false),
        };

        for entry in entries {
            let dir_entry = KeyDirEntry {
                segment_id: id,
                offset: entry.offset,
                length: entry.length,
                timestamp: entry.timestamp,
                tombstone: entry.tombstone,
            };
            apply(table, entry.key, dir_entry, result);
        }

        result.hints_used += 1;
        Ok(true)
    }

    /// Full scan of a sealed segment; any decode failure is fatal
    fn scan_sealed(
        dir: &Path,
        id: u64,
        table: &mut HashMap<Vec<u8>, KeyDirEntry>,
        result: &mut RecoveryResult,
    ) -> Result<()> {
        let mut iter = SegmentIterator::open(&segment_path(dir, id))?;

        while let Some(item) = iter.next() {
            match item {
                Ok(scanned) => {
                    let entry = KeyDirEntry {
                        segment_id: id,
                        offset: scanned.offset,
                        length: scanned.length,
                        timestamp: scanned.record.timestamp,
                        tombstone: scanned.record.is_tombstone(),
                    };
                    apply(table, scanned.record.key, entry, result);
                }
                Err(CaskError::Corruption(reason)) => {
                    tracing::error!("Sealed segment {} is corrupt: {}", id, reason);
                    return Err(CaskError::DatabaseCorruption(format!(
                        "sealed segment {}: {}",
                        id, reason
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Full scan of the last segment, truncating a torn tail.
    ///
    /// Returns hint entries for every surviving record so the writer can
    /// produce a hint file when it later seals this segment.
    fn scan_last(
        dir: &Path,
        id: u64,
        table: &mut HashMap<Vec<u8>, KeyDirEntry>,
        result: &mut RecoveryResult,
    ) -> Result<Vec<HintEntry>> {
        let path = segment_path(dir, id);
        let mut iter = SegmentIterator::open(&path)?;
        let mut hints = Vec::new();

        while let Some(item) = iter.next() {
            match item {
                Ok(scanned) => {
                    let entry = KeyDirEntry {
                        segment_id: id,
                        offset: scanned.offset,
                        length: scanned.length,
                        timestamp: scanned.record.timestamp,
                        tombstone: scanned.record.is_tombstone(),
                    };
                    hints.push(HintEntry {
                        key: scanned.record.key.clone(),
                        offset: scanned.offset,
                        length: scanned.length,
                        timestamp: scanned.record.timestamp,
                        tombstone: scanned.record.is_tombstone(),
                    });
                    apply(table, scanned.record.key, entry, result);
                }
                Err(CaskError::Corruption(_)) => break,
                Err(e) => return Err(e),
            }
        }

        if let Some(stop) = iter.stop() {
            let good_len = iter.position();
            let file_len = iter.file_len();

            if !is_torn_tail(&path, stop, file_len)? {
                tracing::error!("Segment {} is corrupt before its tail: {:?}", id, stop);
                return Err(CaskError::DatabaseCorruption(format!(
                    "segment {}: corrupt record at offset {} followed by more data",
                    id,
                    stop.offset()
                )));
            }

            tracing::warn!(
                "Torn write in segment {}: truncating {} bytes at offset {}",
                id,
                file_len - good_len,
                good_len
            );
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(good_len)?;
            file.sync_all()?;

            result.truncated_bytes = file_len - good_len;
            result.was_truncated = true;
        }

        Ok(hints)
    }
}

/// Apply one record to the replay table if it is the newest seen for its key
fn apply(
    table: &mut HashMap<Vec<u8>, KeyDirEntry>,
    key: Vec<u8>,
    entry: KeyDirEntry,
    result: &mut RecoveryResult,
) {
    result.records_replayed += 1;
    result.max_timestamp = result.max_timestamp.max(entry.timestamp);

    match table.get(&key) {
        Some(existing)
            if !existing.superseded_by(entry.timestamp, entry.segment_id, entry.offset) => {}
        _ => {
            table.insert(key, entry);
        }
    }
}

/// Whether a decode failure in the last segment is an interrupted append.
///
/// It is when the record runs past EOF, ends exactly at EOF, or everything
/// from the failure to EOF is zero fill.
fn is_torn_tail(path: &Path, stop: &ScanStop, file_len: u64) -> Result<bool> {
    match stop {
        ScanStop::Incomplete { .. } => Ok(true),
        ScanStop::Invalid {
            record_end: Some(end),
            ..
        } if *end == file_len => Ok(true),
        ScanStop::Invalid { offset, .. } => tail_is_zeroed(path, *offset),
    }
}

fn tail_is_zeroed(path: &Path, from: u64) -> Result<bool> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(from))?;

    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            return Ok(true);
        }
        if buf[..n].iter().any(|&b| b != 0) {
            return Ok(false);
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
