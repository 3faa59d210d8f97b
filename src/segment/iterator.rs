//! Segment Iterator
//!
//! Sequential decoding of every record in a segment, from offset 0.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{CaskError, Result};
use crate::record::{Record, RecordHeader, HEADER_SIZE};

/// A decoded record and where it sits in the segment
#[derive(Debug, Clone)]
pub struct ScannedRecord {
    pub offset: u64,
    pub length: u32,
    pub record: Record,
}

/// Why a scan stopped before the end of the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStop {
    /// The record at `offset` runs past the end of the file
    Incomplete { offset: u64 },

    /// The record at `offset` is malformed or fails its checksum.
    /// `record_end` is where it claims to end, when its header was readable.
    Invalid {
        offset: u64,
        record_end: Option<u64>,
        reason: String,
    },
}

impl ScanStop {
    /// Offset of the first byte that could not be decoded
    pub fn offset(&self) -> u64 {
        match self {
            ScanStop::Incomplete { offset } => *offset,
            ScanStop::Invalid { offset, .. } => *offset,
        }
    }
}

/// Iterator over the records of one segment
///
/// Yields records in file order. On the first undecodable record it yields a
/// single `Err(Corruption)`, records the reason in `stop()`, and ends.
pub struct SegmentIterator {
    reader: BufReader<File>,
    file_len: u64,
    /// Offset just past the last good record
    position: u64,
    stop: Option<ScanStop>,
    done: bool,
}

impl SegmentIterator {
    /// Open a segment for scanning
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();

        Ok(Self {
            reader: BufReader::new(file),
            file_len,
            position: 0,
            stop: None,
            done: false,
        })
    }

    /// Offset just past the last record decoded successfully
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Length of the file when the scan started
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Why the scan ended early, if it did
    pub fn stop(&self) -> Option<&ScanStop> {
        self.stop.as_ref()
    }

    fn halt(&mut self, stop: ScanStop) -> Option<Result<ScannedRecord>> {
        let err = CaskError::Corruption(match &stop {
            ScanStop::Incomplete { offset } => {
                format!("incomplete record at offset {}", offset)
            }
            ScanStop::Invalid { offset, reason, .. } => {
                format!("invalid record at offset {}: {}", offset, reason)
            }
        });
        self.stop = Some(stop);
        self.done = true;
        Some(Err(err))
    }

    fn read_next(&mut self) -> Option<Result<ScannedRecord>> {
        let offset = self.position;
        let remaining = self.file_len - offset;

        if remaining == 0 {
            self.done = true;
            return None;
        }
        if remaining < HEADER_SIZE as u64 {
            return self.halt(ScanStop::Incomplete { offset });
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        if let Err(e) = self.reader.read_exact(&mut header_bytes) {
            self.done = true;
            return Some(Err(e.into()));
        }

        let header = match RecordHeader::parse(&header_bytes).and_then(|h| {
            h.validate()?;
            Ok(h)
        }) {
            Ok(h) => h,
            Err(e) => {
                return self.halt(ScanStop::Invalid {
                    offset,
                    record_end: None,
                    reason: e.to_string(),
                })
            }
        };

        let record_len = header.record_len();
        if record_len > remaining {
            return self.halt(ScanStop::Incomplete { offset });
        }

        let mut bytes = vec![0u8; record_len as usize];
        bytes[..HEADER_SIZE].copy_from_slice(&header_bytes);
        if let Err(e) = self.reader.read_exact(&mut bytes[HEADER_SIZE..]) {
            self.done = true;
            return Some(Err(e.into()));
        }

        match Record::decode(&bytes) {
            Ok(record) => {
                self.position += record_len;
                Some(Ok(ScannedRecord {
                    offset,
                    length: record_len as u32,
                    record,
                }))
            }
            Err(e) => self.halt(ScanStop::Invalid {
                offset,
                record_end: Some(offset + record_len),
                reason: e.to_string(),
            }),
        }
    }
}

impl Iterator for SegmentIterator {
    type Item = Result<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.read_next()
    }
}
