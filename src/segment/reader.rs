//! Segment Reader
//!
//! Resolves (segment, offset, length) to a decoded, checksum-verified record.

use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{CaskError, Result};
use crate::record::Record;

use super::segment_path;

/// Random-access reader over all segments of a data directory
///
/// ## Concurrency:
/// - `handles`: RwLock around the handle cache; lookups share the lock
/// - each handle has its own Mutex because reading moves the file cursor,
///   so reads against different segments proceed in parallel
///
/// Reads only target offsets the index already confirmed as written, so
/// reading the active segment while the writer appends to it is safe.
pub struct SegmentReader {
    dir: PathBuf,
    handles: RwLock<HashMap<u64, Arc<Mutex<File>>>>,
}

impl SegmentReader {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Read and verify the record at `offset` in segment `segment_id`
    pub fn read(&self, segment_id: u64, offset: u64, length: u32) -> Result<Record> {
        let handle = self.handle(segment_id)?;

        let mut bytes = vec![0u8; length as usize];
        {
            let mut file = handle.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut bytes).map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => CaskError::Corruption(format!(
                    "record at segment {} offset {} runs past end of file",
                    segment_id, offset
                )),
                _ => CaskError::Io(e),
            })?;
        }

        Record::decode(&bytes)
    }

    /// Get (or open and cache) the handle for a segment
    fn handle(&self, segment_id: u64) -> Result<Arc<Mutex<File>>> {
        if let Some(handle) = self.handles.read().get(&segment_id) {
            return Ok(Arc::clone(handle));
        }

        let file = match File::open(segment_path(&self.dir, segment_id)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CaskError::SegmentMissing(segment_id))
            }
            Err(e) => return Err(e.into()),
        };

        let mut handles = self.handles.write();
        let handle = handles
            .entry(segment_id)
            .or_insert_with(|| Arc::new(Mutex::new(file)));
        Ok(Arc::clone(handle))
    }

    /// Drop cached handles for segments that are about to be deleted.
    ///
    /// Reads already holding a handle finish against the old file.
    pub fn evict(&self, segment_ids: &[u64]) {
        let mut handles = self.handles.write();
        for id in segment_ids {
            handles.remove(id);
        }
    }

    /// Close every cached handle
    pub fn clear(&self) {
        self.handles.write().clear();
    }

    /// Number of cached handles
    pub fn cached_handles(&self) -> usize {
        self.handles.read().len()
    }
}
