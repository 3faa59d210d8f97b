//! Error types for CaskKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using CaskError
pub type Result<T> = std::result::Result<T, CaskError>;

/// Unified error type for CaskKV operations
#[derive(Debug, Error)]
pub enum CaskError {
    // -------------------------------------------------------------------------
    // Request Errors
    // -------------------------------------------------------------------------
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Value too large: {0} bytes")]
    ValueTooLarge(usize),

    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    #[error("Record corruption detected: {0}")]
    Corruption(String),

    #[error("Segment {0} is missing")]
    SegmentMissing(u64),

    #[error("Database corruption: {0}")]
    DatabaseCorruption(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Engine is closed")]
    EngineClosed,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CaskError {
    /// Short client-facing reason, free of file paths and offsets.
    pub fn reason(&self) -> String {
        match self {
            CaskError::InvalidKey(_) => "invalid key".to_string(),
            CaskError::ValueTooLarge(_) => "value too large".to_string(),
            CaskError::KeyNotFound => "not found".to_string(),
            CaskError::Io(_) => "io failure".to_string(),
            CaskError::Corruption(_) | CaskError::SegmentMissing(_) => "data corruption".to_string(),
            CaskError::DatabaseCorruption(_) => "database corruption".to_string(),
            CaskError::EngineClosed => "engine closed".to_string(),
            CaskError::Serialization(_) => "serialization failure".to_string(),
            // Protocol messages are built by the parser and never carry paths
            CaskError::Protocol(msg) => msg.clone(),
            CaskError::Config(_) => "configuration error".to_string(),
        }
    }
}

impl From<bincode::Error> for CaskError {
    fn from(e: bincode::Error) -> Self {
        CaskError::Serialization(e.to_string())
    }
}
