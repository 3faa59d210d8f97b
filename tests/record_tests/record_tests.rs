//! Tests for Record encoding
//!
//! These tests verify:
//! - Byte layout of live records and tombstones
//! - Checksum verification on decode
//! - Header parsing and plausibility checks
//! - Key and value validation

use caskkv::error::CaskError;
use caskkv::record::{
    self, Record, RecordHeader, HEADER_SIZE, MAX_KEY_SIZE, TOMBSTONE_MARKER,
};

// =============================================================================
// Encoding Tests
// =============================================================================

#[test]
fn test_encode_layout() {
    let record = Record::put(7, b"key".to_vec(), b"value".to_vec());
    let bytes = record.encode();

    assert_eq!(bytes.len(), HEADER_SIZE + 3 + 5);
    assert_eq!(bytes.len(), record.encoded_len());

    // Timestamp, key length, value length (little-endian)
    assert_eq!(&bytes[4..12], &7u64.to_le_bytes());
    assert_eq!(&bytes[12..16], &3u32.to_le_bytes());
    assert_eq!(&bytes[16..20], &5u32.to_le_bytes());
    assert_eq!(&bytes[20..23], b"key");
    assert_eq!(&bytes[23..], b"value");

    // CRC covers everything after itself
    let crc = crc32fast::hash(&bytes[4..]);
    assert_eq!(&bytes[0..4], &crc.to_le_bytes());
}

#[test]
fn test_encode_tombstone() {
    let record = Record::tombstone(9, b"gone".to_vec());
    let bytes = record.encode();

    assert!(record.is_tombstone());
    assert_eq!(bytes.len(), HEADER_SIZE + 4);
    assert_eq!(&bytes[16..20], &TOMBSTONE_MARKER.to_le_bytes());
}

#[test]
fn test_decode_live_and_tombstone() {
    let live = Record::put(1, b"k".to_vec(), b"v".to_vec());
    assert_eq!(Record::decode(&live.encode()).unwrap(), live);

    let tomb = Record::tombstone(2, b"k".to_vec());
    let decoded = Record::decode(&tomb.encode()).unwrap();
    assert_eq!(decoded, tomb);
    assert!(decoded.value.is_none());
}

#[test]
fn test_empty_value_is_not_a_tombstone() {
    let record = Record::put(1, b"k".to_vec(), Vec::new());
    let decoded = Record::decode(&record.encode()).unwrap();

    assert!(!decoded.is_tombstone());
    assert_eq!(decoded.value, Some(Vec::new()));
}

#[test]
fn test_binary_key_and_value() {
    let key: Vec<u8> = (0..=255u8).collect();
    let value = vec![0u8, b'\n', 0xFF, b' '];
    let record = Record::put(3, key, value);

    assert_eq!(Record::decode(&record.encode()).unwrap(), record);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_decode_detects_flipped_bit() {
    let mut bytes = Record::put(1, b"key".to_vec(), b"value".to_vec())
        .encode()
        .to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;

    assert!(matches!(Record::decode(&bytes), Err(CaskError::Corruption(_))));
}

#[test]
fn test_decode_detects_bad_timestamp() {
    let mut bytes = Record::put(1, b"key".to_vec(), b"value".to_vec())
        .encode()
        .to_vec();
    bytes[4] = 0xAA;

    assert!(matches!(Record::decode(&bytes), Err(CaskError::Corruption(_))));
}

#[test]
fn test_decode_rejects_short_input() {
    let bytes = Record::put(1, b"key".to_vec(), b"value".to_vec()).encode();

    assert!(Record::decode(&bytes[..10]).is_err());
    assert!(Record::decode(&bytes[..bytes.len() - 1]).is_err());
}

#[test]
fn test_decode_rejects_trailing_bytes() {
    let mut bytes = Record::put(1, b"key".to_vec(), b"value".to_vec())
        .encode()
        .to_vec();
    bytes.push(0);

    assert!(matches!(Record::decode(&bytes), Err(CaskError::Corruption(_))));
}

// =============================================================================
// Header Tests
// =============================================================================

#[test]
fn test_header_parse() {
    let bytes = Record::put(42, b"abc".to_vec(), b"defg".to_vec()).encode();
    let header = RecordHeader::parse(&bytes).unwrap();

    assert_eq!(header.timestamp, 42);
    assert_eq!(header.key_len, 3);
    assert_eq!(header.value_len, 4);
    assert_eq!(header.record_len(), bytes.len() as u64);
    assert!(!header.is_tombstone());
    assert!(header.validate().is_ok());
}

#[test]
fn test_header_tombstone_length() {
    let bytes = Record::tombstone(1, b"abc".to_vec()).encode();
    let header = RecordHeader::parse(&bytes).unwrap();

    assert!(header.is_tombstone());
    assert_eq!(header.record_len(), (HEADER_SIZE + 3) as u64);
}

#[test]
fn test_header_rejects_zero_key_len() {
    let header = RecordHeader::parse(&[0u8; HEADER_SIZE]).unwrap();
    assert!(header.validate().is_err());
}

#[test]
fn test_header_rejects_oversized_key_len() {
    let header = RecordHeader {
        checksum: 0,
        timestamp: 0,
        key_len: (MAX_KEY_SIZE + 1) as u32,
        value_len: 0,
    };
    assert!(header.validate().is_err());
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_validate_key() {
    assert!(record::validate_key(b"k").is_ok());
    assert!(record::validate_key(&vec![b'k'; MAX_KEY_SIZE]).is_ok());

    assert!(matches!(record::validate_key(b""), Err(CaskError::InvalidKey(_))));
    assert!(matches!(
        record::validate_key(&vec![b'k'; MAX_KEY_SIZE + 1]),
        Err(CaskError::InvalidKey(_))
    ));
}

#[test]
fn test_validate_value() {
    assert!(record::validate_value(b"").is_ok());
    assert!(record::validate_value(&vec![0u8; 1024]).is_ok());
}
