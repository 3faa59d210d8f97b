//! Segment Writer
//!
//! Appends records to the active segment and rotates it at the size limit.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Config, SyncStrategy};
use crate::error::{CaskError, Result};
use crate::record::Record;

use super::{hint_path, segment_path, HintEntry, HintFile, RecordLocation, SegmentIds};

/// One append-only segment file
///
/// Bytes already written are never modified. A failed append truncates the
/// file back to where it started, so no partial record survives a reported
/// failure. If that truncation itself fails the file is poisoned and every
/// later append is refused; recovery cuts the torn tail on the next open.
pub struct SegmentFile {
    id: u64,
    path: PathBuf,
    file: File,
    /// Current length of the file
    offset: u64,
    /// None = only sync on `sync()`/`seal()`
    sync_strategy: Option<SyncStrategy>,
    writes_since_sync: usize,
    /// One entry per appended record, in append order
    hints: Vec<HintEntry>,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
}

impl SegmentFile {
    /// Create a new, empty segment file at `path`
    pub fn create(path: &Path, id: u64, sync_strategy: Option<SyncStrategy>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            id,
            path: path.to_path_buf(),
            file,
            offset: 0,
            sync_strategy,
            writes_since_sync: 0,
            hints: Vec::new(),
            poisoned: false,
        })
    }

    /// Reopen an existing segment for appends.
    ///
    /// `hints` must describe the records already in the file.
    pub fn open_append(
        path: &Path,
        id: u64,
        sync_strategy: Option<SyncStrategy>,
        hints: Vec<HintEntry>,
    ) -> Result<Self> {
        let file = OpenOptions::new().append(true).open(path)?;
        let offset = file.metadata()?.len();

        Ok(Self {
            id,
            path: path.to_path_buf(),
            file,
            offset,
            sync_strategy,
            writes_since_sync: 0,
            hints,
            poisoned: false,
        })
    }

    /// Append a record and report where it was written
    pub fn append(&mut self, record: &Record) -> Result<RecordLocation> {
        if self.poisoned {
            return Err(CaskError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("segment {} is unusable after a failed rollback", self.id),
            )));
        }

        let bytes = record.encode();
        let offset = self.offset;

        if let Err(e) = self.write_durably(&bytes) {
            self.rollback(offset);
            return Err(e);
        }

        self.offset += bytes.len() as u64;
        let location = RecordLocation {
            segment_id: self.id,
            offset,
            length: bytes.len() as u32,
        };
        self.hints.push(HintEntry::for_record(record, &location));

        Ok(location)
    }

    fn write_durably(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes)?;
        self.file.flush()?;
        self.writes_since_sync += 1;

        match self.sync_strategy {
            Some(SyncStrategy::EveryWrite) => {
                self.file.sync_data()?;
                self.writes_since_sync = 0;
            }
            Some(SyncStrategy::EveryNEntries { count }) => {
                if self.writes_since_sync >= count {
                    self.file.sync_data()?;
                    self.writes_since_sync = 0;
                }
            }
            None => {}
        }

        Ok(())
    }

    /// Drop whatever part of a failed append reached the file.
    ///
    /// The cursor is moved back too: the file is not opened in append mode,
    /// so a cursor left past the new end would leave a hole on the next write.
    fn rollback(&mut self, len: u64) {
        let restored = self
            .file
            .set_len(len)
            .and_then(|()| self.file.seek(SeekFrom::Start(len)).map(|_| ()));

        if let Err(e) = restored {
            // Recovery treats the leftover tail as a torn write
            tracing::error!(
                "Failed to roll back segment {} to {} bytes, refusing further appends: {}",
                self.id, len, e
            );
            self.poisoned = true;
        }
    }

    /// Force everything written so far to stable storage
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        self.writes_since_sync = 0;
        Ok(())
    }

    /// Sync and close the segment; optionally write its hint file
    pub fn seal(self, write_hint: bool) -> Result<()> {
        let pending = self.close()?;
        if write_hint {
            pending.write()?;
        }
        Ok(())
    }

    /// Sync and close the segment, handing back its hint entries so the
    /// hint file can be written later
    pub fn close(mut self) -> Result<PendingHint> {
        self.sync()?;

        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(PendingHint {
            dir,
            id: self.id,
            covered_len: self.offset,
            hints: self.hints,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size in bytes
    pub fn size(&self) -> u64 {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }

    pub fn record_count(&self) -> usize {
        self.hints.len()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

/// Hint entries of a sealed segment whose hint file is not written yet
pub struct PendingHint {
    dir: PathBuf,
    id: u64,
    covered_len: u64,
    hints: Vec<HintEntry>,
}

impl PendingHint {
    pub fn segment_id(&self) -> u64 {
        self.id
    }

    /// Write the hint file next to its segment
    pub fn write(self) -> Result<()> {
        HintFile::write(&hint_path(&self.dir, self.id), self.covered_len, &self.hints)?;
        tracing::debug!(
            "Wrote hint file for segment {} ({} entries)",
            self.id,
            self.hints.len()
        );
        Ok(())
    }
}

/// Owner of the active segment
///
/// Rotation happens inside `append`, after the record is durable, so no
/// record is ever split across segments.
pub struct SegmentWriter {
    dir: PathBuf,
    active: SegmentFile,
    ids: Arc<SegmentIds>,
    size_limit: u64,
    sync_strategy: SyncStrategy,
    write_hints: bool,
}

impl SegmentWriter {
    /// Start a fresh active segment with the next allocated id
    pub fn create(dir: &Path, ids: Arc<SegmentIds>, config: &Config) -> Result<Self> {
        let id = ids.allocate();
        let active = SegmentFile::create(
            &segment_path(dir, id),
            id,
            Some(config.sync_strategy),
        )?;

        Ok(Self {
            dir: dir.to_path_buf(),
            active,
            ids,
            size_limit: config.segment_size_limit,
            sync_strategy: config.sync_strategy,
            write_hints: config.write_hint_files,
        })
    }

    /// Continue appending to an existing segment found by recovery
    pub fn resume(
        dir: &Path,
        id: u64,
        ids: Arc<SegmentIds>,
        config: &Config,
        hints: Vec<HintEntry>,
    ) -> Result<Self> {
        let active = SegmentFile::open_append(
            &segment_path(dir, id),
            id,
            Some(config.sync_strategy),
            hints,
        )?;

        Ok(Self {
            dir: dir.to_path_buf(),
            active,
            ids,
            size_limit: config.segment_size_limit,
            sync_strategy: config.sync_strategy,
            write_hints: config.write_hint_files,
        })
    }

    /// Append a record to the active segment, rotating if it is now full
    pub fn append(&mut self, record: &Record) -> Result<RecordLocation> {
        let location = self.active.append(record)?;

        if self.active.size() >= self.size_limit {
            // The record is already durable; a failed rotation is retried
            // on the next append.
            if let Err(e) = self.rotate() {
                tracing::warn!("Segment rotation failed: {}", e);
            }
        }

        Ok(location)
    }

    /// Seal the active segment and open a new one with a fresh id.
    ///
    /// An empty active segment is discarded instead of sealed.
    /// Returns the id of the new active segment.
    pub fn rotate(&mut self) -> Result<u64> {
        let (next_id, pending) = self.rotate_deferring_hint()?;
        if let Some(pending) = pending {
            pending.write()?;
        }
        Ok(next_id)
    }

    /// Like `rotate`, but the sealed segment's hint file is left for the
    /// caller to write, typically after releasing the write lock.
    ///
    /// The old segment is still synced here: nothing may land in the new
    /// active segment before the old one is durable.
    pub fn rotate_deferring_hint(&mut self) -> Result<(u64, Option<PendingHint>)> {
        let next_id = self.ids.allocate();
        let next = SegmentFile::create(
            &segment_path(&self.dir, next_id),
            next_id,
            Some(self.sync_strategy),
        )?;

        let old = std::mem::replace(&mut self.active, next);
        let old_id = old.id();

        if old.is_empty() {
            let path = old.path().to_path_buf();
            drop(old);
            fs::remove_file(&path)?;
            tracing::debug!("Discarded empty segment {}", old_id);
            return Ok((next_id, None));
        }

        let pending = old.close()?;
        tracing::debug!("Sealed segment {}, active segment is now {}", old_id, next_id);

        Ok((next_id, self.write_hints.then_some(pending)))
    }

    /// Force the active segment to stable storage
    pub fn sync(&mut self) -> Result<()> {
        self.active.sync()
    }

    pub fn active_id(&self) -> u64 {
        self.active.id()
    }

    pub fn active_size(&self) -> u64 {
        self.active.size()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
