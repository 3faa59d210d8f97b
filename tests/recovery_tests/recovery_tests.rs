//! Tests for Recovery
//!
//! These tests verify:
//! - Rebuilding the index from one or many segments
//! - Torn-write truncation of the last segment (and that it is idempotent)
//! - Corruption before the tail is fatal
//! - Hint files are used when valid and ignored when stale
//! - Tombstones and timestamps decide the winner across segments
//! - Leftovers of interrupted compactions are cleaned up

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use caskkv::compaction::MergeManifest;
use caskkv::error::CaskError;
use caskkv::record::Record;
use caskkv::recovery::Recovery;
use caskkv::segment::{
    hint_path, merge_path, segment_path, HintFile, SegmentFile, MANIFEST_FILENAME,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn put(timestamp: u64, key: &str, value: &str) -> Record {
    Record::put(timestamp, key.as_bytes().to_vec(), value.as_bytes().to_vec())
}

fn tombstone(timestamp: u64, key: &str) -> Record {
    Record::tombstone(timestamp, key.as_bytes().to_vec())
}

/// Write a segment; seal it with a hint file when `hint` is set
fn write_segment(dir: &Path, id: u64, records: &[Record], hint: bool) {
    let mut file = SegmentFile::create(&segment_path(dir, id), id, None).unwrap();
    for record in records {
        file.append(record).unwrap();
    }
    file.seal(hint).unwrap();
}

fn append_bytes(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

// =============================================================================
// Basic Recovery Tests
// =============================================================================

#[test]
fn test_recover_empty_directory() {
    let temp_dir = TempDir::new().unwrap();
    let state = Recovery::run(temp_dir.path()).unwrap();

    assert!(state.keydir.is_empty());
    assert!(state.active.is_none());
    assert_eq!(state.next_segment_id, 1);
    assert_eq!(state.result.segments_loaded, 0);
}

#[test]
fn test_recover_single_segment() {
    let temp_dir = TempDir::new().unwrap();
    write_segment(
        temp_dir.path(),
        1,
        &[put(1, "a", "1"), put(2, "b", "2"), put(3, "a", "3")],
        false,
    );

    let state = Recovery::run(temp_dir.path()).unwrap();

    assert_eq!(state.keydir.len(), 2);
    assert_eq!(state.keydir.lookup(b"a").unwrap().timestamp, 3);
    assert_eq!(state.result.records_replayed, 3);
    assert_eq!(state.result.max_timestamp, 3);
    assert_eq!(state.next_segment_id, 2);

    let (active_id, hints) = state.active.unwrap();
    assert_eq!(active_id, 1);
    assert_eq!(hints.len(), 3);
}

#[test]
fn test_recover_across_segments() {
    let temp_dir = TempDir::new().unwrap();
    write_segment(temp_dir.path(), 1, &[put(1, "a", "old"), put(2, "b", "keep")], true);
    write_segment(temp_dir.path(), 2, &[put(3, "a", "new")], true);
    write_segment(temp_dir.path(), 3, &[put(4, "c", "last")], false);

    let state = Recovery::run(temp_dir.path()).unwrap();

    assert_eq!(state.keydir.len(), 3);
    assert_eq!(state.keydir.lookup(b"a").unwrap().segment_id, 2);
    assert_eq!(state.keydir.lookup(b"b").unwrap().segment_id, 1);
    assert_eq!(state.result.segments_loaded, 3);
    assert_eq!(state.active.unwrap().0, 3);
    assert_eq!(state.next_segment_id, 4);
}

#[test]
fn test_tombstone_hides_older_value() {
    let temp_dir = TempDir::new().unwrap();
    write_segment(temp_dir.path(), 1, &[put(1, "a", "1"), put(2, "b", "2")], true);
    write_segment(temp_dir.path(), 2, &[tombstone(3, "a")], false);

    let state = Recovery::run(temp_dir.path()).unwrap();

    assert!(!state.keydir.contains(b"a"));
    assert!(state.keydir.contains(b"b"));
    assert_eq!(state.result.live_keys, 1);
}

#[test]
fn test_value_after_tombstone_is_live() {
    let temp_dir = TempDir::new().unwrap();
    write_segment(
        temp_dir.path(),
        1,
        &[put(1, "a", "1"), tombstone(2, "a"), put(3, "a", "again")],
        false,
    );

    let state = Recovery::run(temp_dir.path()).unwrap();
    assert_eq!(state.keydir.lookup(b"a").unwrap().timestamp, 3);
}

#[test]
fn test_timestamp_beats_segment_order() {
    // Merge output can carry a higher id than segments holding newer writes
    let temp_dir = TempDir::new().unwrap();
    write_segment(temp_dir.path(), 2, &[put(5, "a", "newer")], true);
    write_segment(temp_dir.path(), 3, &[put(1, "a", "older"), tombstone(2, "b")], true);
    write_segment(temp_dir.path(), 4, &[put(6, "b", "revived")], false);

    let state = Recovery::run(temp_dir.path()).unwrap();

    assert_eq!(state.keydir.lookup(b"a").unwrap().segment_id, 2);
    assert_eq!(state.keydir.lookup(b"b").unwrap().segment_id, 4);
}

// =============================================================================
// Torn Write Tests
// =============================================================================

#[test]
fn test_truncates_partial_record() {
    let temp_dir = TempDir::new().unwrap();
    let path = segment_path(temp_dir.path(), 1);
    write_segment(temp_dir.path(), 1, &[put(1, "a", "1"), put(2, "b", "2")], false);
    let good_len = fs::metadata(&path).unwrap().len();

    let torn = put(3, "c", "three").encode();
    append_bytes(&path, &torn[..torn.len() - 2]);

    let state = Recovery::run(temp_dir.path()).unwrap();

    assert!(state.result.was_truncated);
    assert_eq!(state.result.truncated_bytes, torn.len() as u64 - 2);
    assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
    assert_eq!(state.keydir.len(), 2);
    assert!(!state.keydir.contains(b"c"));
    assert_eq!(state.active.unwrap().1.len(), 2);
}

#[test]
fn test_truncation_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let path = segment_path(temp_dir.path(), 1);
    write_segment(temp_dir.path(), 1, &[put(1, "a", "1")], false);
    append_bytes(&path, &put(2, "b", "2").encode()[..7]);

    let first = Recovery::run(temp_dir.path()).unwrap();
    assert!(first.result.was_truncated);
    let len_after_first = fs::metadata(&path).unwrap().len();

    let second = Recovery::run(temp_dir.path()).unwrap();
    assert!(!second.result.was_truncated);
    assert_eq!(fs::metadata(&path).unwrap().len(), len_after_first);
    assert_eq!(second.keydir.len(), first.keydir.len());
}

#[test]
fn test_truncates_bad_checksum_at_tail() {
    let temp_dir = TempDir::new().unwrap();
    let path = segment_path(temp_dir.path(), 1);
    write_segment(temp_dir.path(), 1, &[put(1, "a", "1")], false);
    let good_len = fs::metadata(&path).unwrap().len();

    // Full-length record whose payload never reached the disk intact
    let mut torn = put(2, "b", "2").encode().to_vec();
    let last = torn.len() - 1;
    torn[last] ^= 0xFF;
    append_bytes(&path, &torn);

    let state = Recovery::run(temp_dir.path()).unwrap();

    assert!(state.result.was_truncated);
    assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
    assert!(state.keydir.contains(b"a"));
    assert!(!state.keydir.contains(b"b"));
}

#[test]
fn test_truncates_zero_filled_tail() {
    let temp_dir = TempDir::new().unwrap();
    let path = segment_path(temp_dir.path(), 1);
    write_segment(temp_dir.path(), 1, &[put(1, "a", "1")], false);
    let good_len = fs::metadata(&path).unwrap().len();

    append_bytes(&path, &[0u8; 4096]);

    let state = Recovery::run(temp_dir.path()).unwrap();

    assert!(state.result.was_truncated);
    assert_eq!(state.result.truncated_bytes, 4096);
    assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
}

#[test]
fn test_corruption_before_tail_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let path = segment_path(temp_dir.path(), 1);
    write_segment(
        temp_dir.path(),
        1,
        &[put(1, "a", "1"), put(2, "b", "2"), put(3, "c", "3")],
        false,
    );

    // Damage the middle record; a valid record still follows it
    let first_len = put(1, "a", "1").encoded_len();
    let mut bytes = fs::read(&path).unwrap();
    bytes[first_len + 21] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();
    let len_before = bytes.len() as u64;

    let result = Recovery::run(temp_dir.path());

    assert!(matches!(result, Err(CaskError::DatabaseCorruption(_))));
    assert_eq!(fs::metadata(&path).unwrap().len(), len_before);
}

#[test]
fn test_sealed_segment_corruption_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let sealed = segment_path(temp_dir.path(), 1);
    write_segment(temp_dir.path(), 1, &[put(1, "a", "1")], false);
    write_segment(temp_dir.path(), 2, &[put(2, "b", "2")], false);

    // Even a torn-looking tail is fatal outside the last segment
    append_bytes(&sealed, &[7, 7, 7]);

    let result = Recovery::run(temp_dir.path());
    assert!(matches!(result, Err(CaskError::DatabaseCorruption(_))));
}

// =============================================================================
// Hint File Tests
// =============================================================================

#[test]
fn test_uses_valid_hint() {
    let temp_dir = TempDir::new().unwrap();
    write_segment(temp_dir.path(), 1, &[put(1, "a", "1"), tombstone(2, "a"), put(3, "b", "2")], true);
    write_segment(temp_dir.path(), 2, &[put(4, "c", "3")], false);

    let state = Recovery::run(temp_dir.path()).unwrap();

    assert_eq!(state.result.hints_used, 1);
    assert!(!state.keydir.contains(b"a"));
    assert!(state.keydir.contains(b"b"));
    assert!(state.keydir.contains(b"c"));
    assert_eq!(state.result.max_timestamp, 4);
}

#[test]
fn test_hint_never_used_for_last_segment() {
    let temp_dir = TempDir::new().unwrap();
    write_segment(temp_dir.path(), 1, &[put(1, "a", "1")], true);

    let state = Recovery::run(temp_dir.path()).unwrap();
    assert_eq!(state.result.hints_used, 0);
    assert!(state.keydir.contains(b"a"));
}

#[test]
fn test_ignores_stale_hint() {
    let temp_dir = TempDir::new().unwrap();
    let path = segment_path(temp_dir.path(), 1);
    write_segment(temp_dir.path(), 1, &[put(1, "a", "1")], true);
    // Grew after its hint was written
    append_bytes(&path, &put(2, "b", "2").encode());
    write_segment(temp_dir.path(), 2, &[put(3, "c", "3")], false);

    let state = Recovery::run(temp_dir.path()).unwrap();

    assert_eq!(state.result.hints_used, 0);
    assert_eq!(state.keydir.len(), 3);
}

#[test]
fn test_ignores_corrupt_hint() {
    let temp_dir = TempDir::new().unwrap();
    write_segment(temp_dir.path(), 1, &[put(1, "a", "1")], true);
    write_segment(temp_dir.path(), 2, &[put(2, "b", "2")], false);

    let hint = hint_path(temp_dir.path(), 1);
    let mut bytes = fs::read(&hint).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&hint, &bytes).unwrap();

    let state = Recovery::run(temp_dir.path()).unwrap();

    assert_eq!(state.result.hints_used, 0);
    assert_eq!(state.keydir.len(), 2);
}

// =============================================================================
// Compaction Leftover Tests
// =============================================================================

#[test]
fn test_removes_uncommitted_merge_files() {
    let temp_dir = TempDir::new().unwrap();
    write_segment(temp_dir.path(), 1, &[put(1, "a", "1")], false);

    let merge = merge_path(temp_dir.path(), 5);
    let mut file = SegmentFile::create(&merge, 5, None).unwrap();
    file.append(&put(1, "a", "1")).unwrap();
    file.seal(true).unwrap();
    assert!(hint_path(temp_dir.path(), 5).exists());

    let state = Recovery::run(temp_dir.path()).unwrap();

    assert_eq!(state.result.merge_files_removed, 1);
    assert!(!merge.exists());
    assert!(!hint_path(temp_dir.path(), 5).exists());
    assert_eq!(state.active.unwrap().0, 1);
}

#[test]
fn test_finishes_interrupted_merge() {
    let temp_dir = TempDir::new().unwrap();
    write_segment(temp_dir.path(), 1, &[put(1, "a", "old"), put(2, "b", "x")], true);
    write_segment(temp_dir.path(), 2, &[tombstone(3, "b")], true);
    // Merge output: only the live record survived
    write_segment(temp_dir.path(), 4, &[put(1, "a", "old")], true);
    write_segment(temp_dir.path(), 5, &[], false);

    MergeManifest { segment_ids: vec![1, 2] }.write(temp_dir.path()).unwrap();

    let state = Recovery::run(temp_dir.path()).unwrap();

    assert!(state.result.manifest_replayed);
    assert!(!segment_path(temp_dir.path(), 1).exists());
    assert!(!segment_path(temp_dir.path(), 2).exists());
    assert!(!hint_path(temp_dir.path(), 1).exists());
    assert!(!temp_dir.path().join(MANIFEST_FILENAME).exists());

    assert_eq!(state.keydir.lookup(b"a").unwrap().segment_id, 4);
    assert!(!state.keydir.contains(b"b"));
}

#[test]
fn test_manifest_with_partly_deleted_segments() {
    let temp_dir = TempDir::new().unwrap();
    write_segment(temp_dir.path(), 2, &[put(1, "a", "1")], true);
    write_segment(temp_dir.path(), 3, &[put(2, "b", "2")], false);

    // Segment 1 was already deleted before the crash
    MergeManifest { segment_ids: vec![1] }.write(temp_dir.path()).unwrap();

    let state = Recovery::run(temp_dir.path()).unwrap();
    assert!(state.result.manifest_replayed);
    assert_eq!(state.keydir.len(), 2);
}

#[test]
fn test_removes_orphan_hint() {
    let temp_dir = TempDir::new().unwrap();
    write_segment(temp_dir.path(), 1, &[put(1, "a", "1")], false);
    HintFile::write(&hint_path(temp_dir.path(), 9), 0, &[]).unwrap();

    Recovery::run(temp_dir.path()).unwrap();
    assert!(!hint_path(temp_dir.path(), 9).exists());
}

#[test]
fn test_malformed_manifest_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    write_segment(temp_dir.path(), 1, &[put(1, "a", "1")], false);
    fs::write(temp_dir.path().join(MANIFEST_FILENAME), b"1\nnot-a-number\n").unwrap();

    let result = Recovery::run(temp_dir.path());
    assert!(matches!(result, Err(CaskError::DatabaseCorruption(_))));
}
