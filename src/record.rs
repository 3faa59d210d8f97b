//! Record encoding
//!
//! A record is the unit appended to a segment. Records are immutable once
//! written; a key is updated by appending a newer record for it.
//!
//! ## Format (little-endian)
//! ```text
//! ┌──────────┬───────────────┬─────────────┬─────────────┬───────┬─────────┐
//! │ CRC (4)  │ Timestamp (8) │ KeyLen (4)  │ ValLen (4)  │  Key  │  Value  │
//! └──────────┴───────────────┴─────────────┴─────────────┴───────┴─────────┘
//! ```
//!
//! The CRC covers every byte after the CRC field. `ValLen == u32::MAX` marks a
//! tombstone and no value bytes follow.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CaskError, Result};

/// Header size: CRC (4) + Timestamp (8) + KeyLen (4) + ValLen (4) = 20 bytes
pub const HEADER_SIZE: usize = 20;

/// Sentinel value length marking a tombstone
pub const TOMBSTONE_MARKER: u32 = u32::MAX;

/// Largest accepted key (64 KB)
pub const MAX_KEY_SIZE: usize = 64 * 1024;

/// Largest accepted value (256 MB)
pub const MAX_VALUE_SIZE: usize = 256 * 1024 * 1024;

/// A single record stored in a segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Logical write sequence; larger is newer
    pub timestamp: u64,

    /// The key (never empty)
    pub key: Vec<u8>,

    /// The value, or `None` for a tombstone
    pub value: Option<Vec<u8>>,
}

impl Record {
    /// Create a live record
    pub fn put(timestamp: u64, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            timestamp,
            key,
            value: Some(value),
        }
    }

    /// Create a tombstone record
    pub fn tombstone(timestamp: u64, key: Vec<u8>) -> Self {
        Self {
            timestamp,
            key,
            value: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Size of this record when encoded
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.key.len() + self.value.as_ref().map_or(0, |v| v.len())
    }

    /// Encode to bytes, checksum included
    pub fn encode(&self) -> Bytes {
        let value_len = match &self.value {
            Some(v) => v.len() as u32,
            None => TOMBSTONE_MARKER,
        };

        let mut buf = BytesMut::with_capacity(self.encoded_len());

        // CRC placeholder, filled once the rest is written
        buf.put_u32_le(0);
        buf.put_u64_le(self.timestamp);
        buf.put_u32_le(self.key.len() as u32);
        buf.put_u32_le(value_len);
        buf.put_slice(&self.key);
        if let Some(v) = &self.value {
            buf.put_slice(v);
        }

        let crc = crc32fast::hash(&buf[4..]);
        buf[0..4].copy_from_slice(&crc.to_le_bytes());

        buf.freeze()
    }

    /// Decode a record from exactly `bytes.len()` bytes, verifying the checksum
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = RecordHeader::parse(bytes)?;
        header.validate()?;

        let total = header.record_len() as usize;
        if bytes.len() != total {
            return Err(CaskError::Corruption(format!(
                "record length mismatch: header says {} bytes, got {}",
                total,
                bytes.len()
            )));
        }

        let computed = crc32fast::hash(&bytes[4..]);
        if computed != header.checksum {
            return Err(CaskError::Corruption(format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                header.checksum, computed
            )));
        }

        let key_end = HEADER_SIZE + header.key_len as usize;
        let key = bytes[HEADER_SIZE..key_end].to_vec();
        let value = if header.is_tombstone() {
            None
        } else {
            Some(bytes[key_end..].to_vec())
        };

        Ok(Self {
            timestamp: header.timestamp,
            key,
            value,
        })
    }
}

/// Check that a key can be stored
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(CaskError::InvalidKey("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(CaskError::InvalidKey(format!(
            "key of {} bytes exceeds the {} byte limit",
            key.len(),
            MAX_KEY_SIZE
        )));
    }
    Ok(())
}

/// Check that a value can be stored
pub fn validate_value(value: &[u8]) -> Result<()> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(CaskError::ValueTooLarge(value.len()));
    }
    Ok(())
}

/// Fixed-size prefix of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub checksum: u32,
    pub timestamp: u64,
    pub key_len: u32,
    pub value_len: u32,
}

impl RecordHeader {
    /// Parse the header from the first `HEADER_SIZE` bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(CaskError::Corruption(format!(
                "incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut cur = &bytes[..HEADER_SIZE];
        Ok(Self {
            checksum: cur.get_u32_le(),
            timestamp: cur.get_u64_le(),
            key_len: cur.get_u32_le(),
            value_len: cur.get_u32_le(),
        })
    }

    pub fn is_tombstone(&self) -> bool {
        self.value_len == TOMBSTONE_MARKER
    }

    /// Reject lengths no writer could have produced
    pub fn validate(&self) -> Result<()> {
        if self.key_len == 0 || self.key_len as usize > MAX_KEY_SIZE {
            return Err(CaskError::Corruption(format!(
                "implausible key length {}",
                self.key_len
            )));
        }
        if !self.is_tombstone() && self.value_len as usize > MAX_VALUE_SIZE {
            return Err(CaskError::Corruption(format!(
                "implausible value length {}",
                self.value_len
            )));
        }
        Ok(())
    }

    /// Total encoded size of the record this header starts
    pub fn record_len(&self) -> u64 {
        let value_len = if self.is_tombstone() {
            0
        } else {
            self.value_len as u64
        };
        HEADER_SIZE as u64 + self.key_len as u64 + value_len
    }
}
