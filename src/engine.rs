//! Engine Module
//!
//! The storage engine facade that coordinates all components.
//!
//! ## Responsibilities
//! - Recover the key index on startup
//! - Route writes through the segment writer and key index
//! - Route reads through the key index and segment reader
//! - Run compaction on demand or on a schedule

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::compaction::{CompactionResult, CompactionScheduler, Compactor};
use crate::config::Config;
use crate::error::{CaskError, Result};
use crate::keydir::{KeyDir, KeyDirEntry};
use crate::protocol::Command;
use crate::record::{self, Record};
use crate::recovery::{Recovery, RecoveryResult};
use crate::segment::{self, SegmentIds, SegmentReader, SegmentWriter, SEGMENT_EXT};

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/rotation): Serialized by the `writer` mutex
///   - The critical section covers "append + index update", so the index
///     never refers to a record that is not durable
///
/// - **Reads** (get): No writer lock
///   - KeyDir lookup under its shared read lock
///   - SegmentReader locks only the handle of the segment being read
///
/// - **Compaction**: Holds the writer mutex only to freeze the batch and to
///   commit; all record copying happens without locks
pub struct Engine {
    inner: Arc<EngineInner>,

    /// Background compaction, when configured
    scheduler: Mutex<Option<CompactionScheduler>>,
}

struct EngineInner {
    /// Engine configuration
    config: Config,

    /// Directory holding all segment files
    dir: PathBuf,

    /// Key → location of newest record
    keydir: KeyDir,

    /// Cached read handles
    reader: SegmentReader,

    /// Active segment; also the write lock. `None` once closed.
    writer: Mutex<Option<SegmentWriter>>,

    /// Segment id allocator shared by rotation and compaction
    ids: Arc<SegmentIds>,

    /// Next record timestamp
    clock: AtomicU64,

    closed: AtomicBool,

    /// Serializes compaction passes
    compaction_lock: Mutex<()>,

    /// Statistics from startup recovery
    recovery: RecoveryResult,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate config and create the data directory
    /// 2. Recover the key index from the segments
    /// 3. Resume the last segment as active (or create the first one)
    /// 4. Start the compaction scheduler if an interval is configured
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        let dir = config.data_dir.clone();

        let state = Recovery::run(&dir)?;
        let result = state.result;

        tracing::info!(
            "Recovered {} live keys from {} segments ({} via hint files, {} records replayed)",
            result.live_keys,
            result.segments_loaded,
            result.hints_used,
            result.records_replayed
        );
        if result.was_truncated {
            tracing::warn!(
                "Recovery removed a torn write of {} bytes",
                result.truncated_bytes
            );
        }

        let ids = Arc::new(SegmentIds::new(state.next_segment_id));
        let writer = match state.active {
            Some((id, hints)) => SegmentWriter::resume(&dir, id, Arc::clone(&ids), &config, hints)?,
            None => SegmentWriter::create(&dir, Arc::clone(&ids), &config)?,
        };
        tracing::debug!("Active segment is {}", writer.active_id());

        let inner = Arc::new(EngineInner {
            reader: SegmentReader::new(&dir),
            keydir: state.keydir,
            writer: Mutex::new(Some(writer)),
            ids,
            clock: AtomicU64::new(result.max_timestamp + 1),
            closed: AtomicBool::new(false),
            compaction_lock: Mutex::new(()),
            recovery: result,
            dir,
            config,
        });

        let scheduler = match inner.config.compaction_interval {
            Some(interval) => {
                let weak = Arc::downgrade(&inner);
                Some(CompactionScheduler::spawn(interval, move || {
                    scheduled_compaction(&weak)
                })?)
            }
            None => None,
        };

        Ok(Self {
            inner,
            scheduler: Mutex::new(scheduler),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Execute a command
    ///
    /// Routes commands to appropriate handlers
    pub fn execute(&self, command: Command) -> Result<Option<Vec<u8>>> {
        match command {
            Command::Get { key } => self.get(&key).map(Some),
            Command::Set { key, value } => {
                self.put(&key, &value)?;
                Ok(None)
            }
            Command::Delete { key } => {
                self.delete(&key)?;
                Ok(None)
            }
        }
    }

    /// Get the value of a key
    ///
    /// Returns `KeyNotFound` if the key is absent.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.inner.get(key)
    }

    /// Put a key-value pair
    ///
    /// Steps:
    /// 1. Acquire write lock
    /// 2. Append the record (durable before returning)
    /// 3. Point the key index at it
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.put(key, value)
    }

    /// Delete a key
    ///
    /// Deleting an absent key is a successful no-op.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(key)
    }

    /// Run a compaction pass now
    pub fn compact(&self) -> Result<CompactionResult> {
        self.inner.compact()
    }

    /// Close the engine
    ///
    /// Stops background compaction, syncs the active segment, and drops all
    /// file handles. Later operations fail with `EngineClosed`. Closing twice
    /// is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Stop the scheduler before taking the writer lock it may be waiting on
        if let Some(mut scheduler) = self.scheduler.lock().take() {
            scheduler.stop();
        }

        let writer = self.inner.writer.lock().take();
        let synced = match writer {
            Some(mut writer) => writer.sync(),
            None => Ok(()),
        };
        self.inner.reader.clear();

        tracing::info!("Engine closed");
        synced
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        self.inner.keydir.len()
    }

    /// Id of the active segment
    pub fn active_segment_id(&self) -> Result<u64> {
        self.inner
            .writer
            .lock()
            .as_ref()
            .map(|writer| writer.active_id())
            .ok_or(CaskError::EngineClosed)
    }

    /// Number of segment files on disk, active one included
    pub fn segment_count(&self) -> Result<usize> {
        Ok(segment::list_ids(&self.inner.dir, SEGMENT_EXT)?.len())
    }

    /// Statistics from startup recovery
    pub fn recovery_result(&self) -> &RecoveryResult {
        &self.inner.recovery
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("Error closing engine: {}", e);
        }
    }
}

impl EngineInner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CaskError::EngineClosed);
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.ensure_open()?;

        loop {
            let entry = self.keydir.lookup(key).ok_or(CaskError::KeyNotFound)?;

            match self.reader.read(entry.segment_id, entry.offset, entry.length) {
                Ok(record) => {
                    if record.key != key {
                        return Err(CaskError::Corruption(format!(
                            "segment {} offset {} holds a different key",
                            entry.segment_id, entry.offset
                        )));
                    }
                    return record.value.ok_or_else(|| {
                        CaskError::Corruption(format!(
                            "segment {} offset {} holds a tombstone for a live key",
                            entry.segment_id, entry.offset
                        ))
                    });
                }
                // Compaction may have moved the record and deleted the
                // segment between lookup and read
                Err(CaskError::SegmentMissing(id)) => {
                    if self.keydir.lookup(key) == Some(entry) {
                        tracing::error!("Segment {} referenced by the index is missing", id);
                        return Err(CaskError::SegmentMissing(id));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        record::validate_key(key)?;
        record::validate_value(value)?;

        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(CaskError::EngineClosed)?;

        let timestamp = self.clock.fetch_add(1, Ordering::SeqCst);
        let record = Record::put(timestamp, key.to_vec(), value.to_vec());
        let location = writer.append(&record)?;

        self.keydir.upsert(
            record.key,
            KeyDirEntry::live(location.segment_id, location.offset, location.length, timestamp),
        );

        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        record::validate_key(key)?;

        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(CaskError::EngineClosed)?;

        if !self.keydir.contains(key) {
            return Ok(());
        }

        let timestamp = self.clock.fetch_add(1, Ordering::SeqCst);
        writer.append(&Record::tombstone(timestamp, key.to_vec()))?;
        self.keydir.remove(key);

        Ok(())
    }

    fn compact(&self) -> Result<CompactionResult> {
        self.ensure_open()?;
        let _compaction_guard = self.compaction_lock.lock();

        Compactor {
            dir: &self.dir,
            keydir: &self.keydir,
            reader: &self.reader,
            writer: &self.writer,
            ids: &self.ids,
            segment_size_limit: self.config.segment_size_limit,
            write_hint_files: self.config.write_hint_files,
        }
        .run()
    }
}

/// Job run by the compaction scheduler
fn scheduled_compaction(engine: &Weak<EngineInner>) {
    let Some(engine) = engine.upgrade() else {
        return;
    };

    match engine.compact() {
        Ok(result) if result.segments_compacted > 0 => {
            tracing::debug!("Scheduled compaction reclaimed {} bytes", result.bytes_reclaimed());
        }
        Ok(_) | Err(CaskError::EngineClosed) => {}
        Err(e) => tracing::error!("Scheduled compaction failed: {}", e),
    }
}
