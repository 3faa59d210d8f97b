//! Hint Files
//!
//! Index-only companion of a sealed segment: every record's key and location,
//! no values. Recovery loads a hint instead of decoding the whole segment.
//!
//! ## File Format
//! ```text
//! ┌───────────┬─────────────┬──────────────────┬────────────┬───────────┐
//! │ Magic (4) │ Version (2) │ Segment Len (8)  │ Count (8)  │  CRC (4)  │
//! ├───────────┴─────────────┴──────────────────┴────────────┴───────────┤
//! │ bincode Vec<HintEntry>                                              │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A hint is trusted only when the segment is still exactly `Segment Len`
//! bytes long and the payload CRC matches.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::record::Record;

use super::RecordLocation;

/// Magic bytes identifying a CaskKV hint file
const MAGIC: &[u8; 4] = b"CKHT";

/// Current hint format version
const VERSION: u16 = 1;

/// Magic (4) + Version (2) + SegmentLen (8) + Count (8) + CRC (4) = 26 bytes
const HEADER_SIZE: usize = 26;

/// Location of one record, as stored in a hint file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintEntry {
    pub key: Vec<u8>,
    pub offset: u64,
    pub length: u32,
    pub timestamp: u64,
    pub tombstone: bool,
}

impl HintEntry {
    pub fn for_record(record: &Record, location: &RecordLocation) -> Self {
        Self {
            key: record.key.clone(),
            offset: location.offset,
            length: location.length,
            timestamp: record.timestamp,
            tombstone: record.is_tombstone(),
        }
    }
}

/// Reading and writing of hint files
pub struct HintFile;

impl HintFile {
    /// Write a hint file covering the first `segment_len` bytes of a segment
    pub fn write(path: &Path, segment_len: u64, entries: &[HintEntry]) -> Result<()> {
        let payload = bincode::serialize(entries)?;
        let crc = crc32fast::hash(&payload);

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&segment_len.to_le_bytes());
        bytes.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes.extend_from_slice(&payload);

        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    }

    /// Load a hint file if it is intact and still matches the segment.
    ///
    /// Returns `Ok(None)` when there is no usable hint; the caller then
    /// scans the segment itself.
    pub fn read(path: &Path, segment_len: u64) -> Result<Option<Vec<HintEntry>>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.len() < HEADER_SIZE || &bytes[0..4] != MAGIC {
            tracing::debug!("Ignoring hint {}: bad header", path.display());
            return Ok(None);
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        let covered_len = u64::from_le_bytes(bytes[6..14].try_into().unwrap_or_default());
        let count = u64::from_le_bytes(bytes[14..22].try_into().unwrap_or_default());
        let crc = u32::from_le_bytes(bytes[22..26].try_into().unwrap_or_default());

        if version != VERSION {
            tracing::debug!("Ignoring hint {}: version {}", path.display(), version);
            return Ok(None);
        }
        if covered_len != segment_len {
            tracing::debug!(
                "Ignoring stale hint {}: covers {} bytes, segment has {}",
                path.display(),
                covered_len,
                segment_len
            );
            return Ok(None);
        }

        let payload = &bytes[HEADER_SIZE..];
        if crc32fast::hash(payload) != crc {
            tracing::debug!("Ignoring hint {}: checksum mismatch", path.display());
            return Ok(None);
        }

        let entries: Vec<HintEntry> = match bincode::deserialize(payload) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!("Ignoring hint {}: {}", path.display(), e);
                return Ok(None);
            }
        };

        if entries.len() as u64 != count {
            return Ok(None);
        }
        if entries
            .iter()
            .any(|e| e.key.is_empty() || e.offset + e.length as u64 > segment_len)
        {
            tracing::debug!("Ignoring hint {}: entry outside segment", path.display());
            return Ok(None);
        }

        Ok(Some(entries))
    }
}
