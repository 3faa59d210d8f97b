//! Compaction (Merge)
//!
//! Rewrites the live records of every sealed segment into fresh merge
//! segments and retires the old ones.
//!
//! ## Phases
//! 1. **Freeze** (write lock): sync and close a non-empty active segment,
//!    open the next one, snapshot the key index. Its hint file is written
//!    after the lock is released. Every segment below the new active id is
//!    the batch; a batch whose bytes are all live records is left alone
//! 2. **Copy** (no lock): stream the batch; a record is live iff the snapshot
//!    points at exactly its (segment, offset). Live records go to `.merge`
//!    files, everything else (tombstones included) is dropped
//! 3. **Commit**: under the write lock, rotate the active segment above the
//!    merge ids (an fsync of the old active segment and one file create).
//!    Then, without it, rename `.merge` → `.seg` and swap the copied keys in
//!    one key index update, skipping keys that changed since the snapshot
//! 4. **Retire** (no lock): write the manifest, delete the batch, remove
//!    the manifest
//!
//! A crash before the commit leaves only `.merge` files, which recovery
//! deletes. A crash after it leaves old and new segments side by side; record
//! timestamps resolve them, and the manifest finishes the deletion.
//!
//! Tombstones in the batch are safe to drop: the batch holds every segment
//! written before compaction started, so every older value of a deleted key
//! is dropped in the same pass, and the manifest makes their removal
//! all-or-nothing.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;

use crate::error::{CaskError, Result};
use crate::keydir::{KeyDir, KeyDirEntry, KeyDirSnapshot, Repoint};
use crate::record::Record;
use crate::segment::{
    self, hint_path, merge_path, segment_path, PendingHint, RecordLocation, SegmentFile,
    SegmentIds, SegmentIterator, SegmentReader, SegmentWriter, MANIFEST_FILENAME, SEGMENT_EXT,
};

// =============================================================================
// Compaction Result
// =============================================================================

/// Statistics from one compaction pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Sealed segments merged and deleted
    pub segments_compacted: u64,

    /// Merge segments written
    pub merge_segments: u64,

    /// Live records copied forward
    pub records_copied: u64,

    /// Superseded or deleted values dropped
    pub records_dropped: u64,

    /// Tombstones dropped
    pub tombstones_dropped: u64,

    /// Copied keys that were overwritten or deleted during the copy
    pub stale_copies: u64,

    /// Size of the batch before compaction
    pub bytes_before: u64,

    /// Size of the merge output
    pub bytes_after: u64,
}

impl CompactionResult {
    /// Disk space freed by the pass
    pub fn bytes_reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

// =============================================================================
// Merge Manifest
// =============================================================================

/// Segments superseded by a committed merge, one id per line.
///
/// Written after the commit and removed once the segments are gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeManifest {
    pub segment_ids: Vec<u64>,
}

impl MergeManifest {
    fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILENAME)
    }

    /// Durably write the manifest
    pub fn write(&self, dir: &Path) -> Result<()> {
        let body: String = self
            .segment_ids
            .iter()
            .map(|id| format!("{}\n", id))
            .collect();

        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILENAME));
        let mut file = File::create(&tmp)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, Self::path(dir))?;
        segment::sync_dir(dir)
    }

    /// Read the manifest, if one exists
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        let body = match fs::read_to_string(Self::path(dir)) {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let segment_ids = body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                line.trim().parse::<u64>().map_err(|_| {
                    CaskError::DatabaseCorruption(format!("malformed merge manifest line {:?}", line))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Self { segment_ids }))
    }

    pub fn remove(dir: &Path) -> Result<()> {
        match fs::remove_file(Self::path(dir)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Compactor
// =============================================================================

/// One compaction pass over the engine's sealed segments
pub struct Compactor<'a> {
    pub dir: &'a Path,
    pub keydir: &'a KeyDir,
    pub reader: &'a SegmentReader,
    /// The engine's write lock; `None` once the engine is closed
    pub writer: &'a Mutex<Option<SegmentWriter>>,
    pub ids: &'a SegmentIds,
    pub segment_size_limit: u64,
    pub write_hint_files: bool,
}

impl<'a> Compactor<'a> {
    /// Run a full pass
    pub fn run(&self) -> Result<CompactionResult> {
        let started = Instant::now();
        let mut result = CompactionResult::default();

        // Phase 1: freeze
        let (active_id, sealed, snapshot) = {
            let mut guard = self.writer.lock();
            let writer = guard.as_mut().ok_or(CaskError::EngineClosed)?;

            let sealed = if writer.active_size() > 0 {
                writer.rotate_deferring_hint()?.1
            } else {
                None
            };

            (writer.active_id(), sealed, self.keydir.snapshot())
        };
        write_pending_hint(sealed);

        // Ids below the active one are only created or removed by compaction,
        // which is serialized, so the listing is stable without the lock
        let batch: Vec<u64> = segment::list_ids(self.dir, SEGMENT_EXT)?
            .into_iter()
            .filter(|&id| id < active_id)
            .collect();

        if batch.is_empty() {
            tracing::debug!("Compaction skipped: no sealed segments");
            return Ok(result);
        }

        for &id in &batch {
            result.bytes_before += fs::metadata(segment_path(self.dir, id))?.len();
        }
        let live_bytes: u64 = snapshot
            .iter()
            .filter(|(_, entry)| batch.binary_search(&entry.segment_id).is_ok())
            .map(|(_, entry)| entry.length as u64)
            .sum();
        if live_bytes == result.bytes_before {
            tracing::debug!("Compaction skipped: sealed segments hold no garbage");
            return Ok(CompactionResult::default());
        }

        tracing::info!(
            "Compaction started: {} sealed segments, {} live keys",
            batch.len(),
            snapshot.len()
        );

        // Phase 2: copy
        let mut output = MergeOutput::new(
            self.dir,
            self.ids,
            self.segment_size_limit,
            self.write_hint_files,
        );
        let mut repoints = Vec::new();

        if let Err(e) = self.copy_batch(&batch, &snapshot, &mut output, &mut repoints, &mut result) {
            output.abort();
            return Err(e);
        }

        result.bytes_after = output.bytes_written();
        let merge_ids = output.finish()?;
        result.merge_segments = merge_ids.len() as u64;

        // Phase 3: commit
        if !merge_ids.is_empty() {
            // The active segment must stay the highest id, so it moves above
            // the merge ids before any of them becomes a `.seg` file
            let sealed = {
                let mut guard = self.writer.lock();
                let writer = match guard.as_mut() {
                    Some(writer) => writer,
                    None => {
                        remove_merge_files(self.dir, &merge_ids);
                        return Err(CaskError::EngineClosed);
                    }
                };

                match writer.rotate_deferring_hint() {
                    Ok((_, sealed)) => sealed,
                    Err(e) => {
                        tracing::error!("Failed to rotate above merge segments: {}", e);
                        remove_merge_files(self.dir, &merge_ids);
                        return Err(e);
                    }
                }
            };
            write_pending_hint(sealed);

            publish(self.dir, &merge_ids)?;
        }

        let attempted = repoints.len() as u64;
        result.stale_copies = attempted - self.keydir.repoint_all(repoints) as u64;

        // Phase 4: retire
        MergeManifest {
            segment_ids: batch.clone(),
        }
        .write(self.dir)?;

        self.reader.evict(&batch);
        for &id in &batch {
            fs::remove_file(segment_path(self.dir, id))?;
            match fs::remove_file(hint_path(self.dir, id)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        segment::sync_dir(self.dir)?;
        MergeManifest::remove(self.dir)?;

        result.segments_compacted = batch.len() as u64;

        tracing::info!(
            "Compaction finished in {:?}: {} segments → {}, {} copied, {} dropped, {} tombstones dropped, {} bytes reclaimed",
            started.elapsed(),
            result.segments_compacted,
            result.merge_segments,
            result.records_copied,
            result.records_dropped,
            result.tombstones_dropped,
            result.bytes_reclaimed()
        );

        Ok(result)
    }

    /// Copy the live records of every batch segment into the merge output
    fn copy_batch(
        &self,
        batch: &[u64],
        snapshot: &KeyDirSnapshot,
        output: &mut MergeOutput<'_>,
        repoints: &mut Vec<Repoint>,
        result: &mut CompactionResult,
    ) -> Result<()> {
        for &id in batch {
            self.copy_segment(id, &segment_path(self.dir, id), snapshot, output, repoints, result)?;
        }
        Ok(())
    }

    /// Copy the live records of one sealed segment into the merge output
    fn copy_segment(
        &self,
        id: u64,
        path: &Path,
        snapshot: &KeyDirSnapshot,
        output: &mut MergeOutput<'_>,
        repoints: &mut Vec<Repoint>,
        result: &mut CompactionResult,
    ) -> Result<()> {
        for item in SegmentIterator::open(path)? {
            let scanned = match item {
                Ok(scanned) => scanned,
                Err(CaskError::Corruption(reason)) => {
                    tracing::error!("Compaction aborted, segment {} is corrupt: {}", id, reason);
                    return Err(CaskError::DatabaseCorruption(format!(
                        "sealed segment {}: {}",
                        id, reason
                    )));
                }
                Err(e) => return Err(e),
            };

            if scanned.record.is_tombstone() {
                result.tombstones_dropped += 1;
                continue;
            }

            let old = match snapshot.get(&scanned.record.key) {
                Some(entry) if entry.points_at(id, scanned.offset) => *entry,
                _ => {
                    result.records_dropped += 1;
                    continue;
                }
            };

            let location = output.append(&scanned.record)?;
            repoints.push(Repoint {
                key: scanned.record.key,
                expected: old,
                new: KeyDirEntry::live(
                    location.segment_id,
                    location.offset,
                    location.length,
                    old.timestamp,
                ),
            });
            result.records_copied += 1;
        }

        Ok(())
    }
}

/// Rename committed merge output into place
fn publish(dir: &Path, merge_ids: &[u64]) -> Result<()> {
    for &id in merge_ids {
        fs::rename(merge_path(dir, id), segment_path(dir, id))?;
    }
    segment::sync_dir(dir)
}

/// Write a sealed segment's hint file once the write lock is released
fn write_pending_hint(pending: Option<PendingHint>) {
    if let Some(pending) = pending {
        let id = pending.segment_id();
        if let Err(e) = pending.write() {
            // Recovery falls back to scanning the segment
            tracing::warn!("Failed to write hint file for segment {}: {}", id, e);
        }
    }
}

/// Best-effort removal of uncommitted merge output
fn remove_merge_files(dir: &Path, merge_ids: &[u64]) {
    for &id in merge_ids {
        let _ = fs::remove_file(merge_path(dir, id));
        let _ = fs::remove_file(hint_path(dir, id));
    }
}

/// Merge segments being written by a compaction pass
struct MergeOutput<'a> {
    dir: &'a Path,
    ids: &'a SegmentIds,
    size_limit: u64,
    write_hints: bool,
    current: Option<SegmentFile>,
    sealed: Vec<u64>,
    bytes_written: u64,
}

impl<'a> MergeOutput<'a> {
    fn new(dir: &'a Path, ids: &'a SegmentIds, size_limit: u64, write_hints: bool) -> Self {
        Self {
            dir,
            ids,
            size_limit,
            write_hints,
            current: None,
            sealed: Vec::new(),
            bytes_written: 0,
        }
    }

    fn append(&mut self, record: &Record) -> Result<RecordLocation> {
        if let Some(file) = self.current.as_mut() {
            if file.size() < self.size_limit {
                let location = file.append(record)?;
                self.bytes_written += location.length as u64;
                return Ok(location);
            }
        }

        let location = self.roll()?.append(record)?;
        self.bytes_written += location.length as u64;
        Ok(location)
    }

    /// Seal the current merge file and start the next one
    fn roll(&mut self) -> Result<&mut SegmentFile> {
        self.seal_current()?;

        let id = self.ids.allocate();
        let file = SegmentFile::create(&merge_path(self.dir, id), id, None)?;
        Ok(self.current.insert(file))
    }

    fn seal_current(&mut self) -> Result<()> {
        if let Some(file) = self.current.take() {
            self.sealed.push(file.id());
            file.seal(self.write_hints)?;
        }
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Seal everything; returns the merge segment ids
    fn finish(mut self) -> Result<Vec<u64>> {
        if let Err(e) = self.seal_current() {
            self.abort();
            return Err(e);
        }
        Ok(self.sealed)
    }

    /// Discard everything written so far
    fn abort(&mut self) {
        if let Some(file) = self.current.take() {
            self.sealed.push(file.id());
        }
        remove_merge_files(self.dir, &self.sealed);
        self.sealed.clear();
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Background thread that runs a compaction job at a fixed interval
///
/// Driven by a crossbeam ticker; stopping sends on (or drops) the shutdown
/// channel and joins the thread.
pub struct CompactionScheduler {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CompactionScheduler {
    /// Spawn the scheduler thread
    pub fn spawn<F>(interval: Duration, job: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        let ticker = channel::tick(interval);

        let handle = thread::Builder::new()
            .name("caskkv-compaction".to_string())
            .spawn(move || loop {
                channel::select! {
                    recv(shutdown_rx) -> _ => break,
                    recv(ticker) -> _ => job(),
                }
            })?;

        tracing::debug!("Compaction scheduler started (interval {:?})", interval);

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for a running job to finish
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Compaction scheduler thread panicked");
            }
        }
    }
}

impl Drop for CompactionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
