//! Configuration for CaskKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CaskError, Result};

/// Main configuration for a CaskKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── 000001.seg       (sealed segment)
    ///     ├── 000001.hint      (hint file for the sealed segment)
    ///     └── 000002.seg       (active segment)
    pub data_dir: PathBuf,

    /// Sync strategy: how often to fsync the active segment
    pub sync_strategy: SyncStrategy,

    /// Active segment size (in bytes) that triggers rotation
    pub segment_size_limit: u64,

    /// Write a hint file whenever a segment is sealed or merged
    pub write_hint_files: bool,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Run compaction in the background at this interval (None = manual only)
    pub compaction_interval: Option<Duration>,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds, 0 = none)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 = none)
    pub write_timeout_ms: u64,

    /// Longest accepted command line, newline included
    pub max_line_size: usize,
}

/// Segment sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every append (safest, slowest)
    EveryWrite,

    /// fsync after N appends (trades the crash guarantee for throughput)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./caskkv_data"),
            sync_strategy: SyncStrategy::EveryWrite,
            segment_size_limit: 64 * 1024 * 1024, // 64 MB
            write_hint_files: true,
            compaction_interval: None,
            listen_addr: "127.0.0.1:9090".to_string(),
            max_connections: 1024,
            read_timeout_ms: 0,
            write_timeout_ms: 5000,
            max_line_size: 1024 * 1024, // 1 MB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.segment_size_limit == 0 {
            return Err(CaskError::Config(
                "segment_size_limit must be greater than zero".to_string(),
            ));
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(CaskError::Config(
                "EveryNEntries sync count must be greater than zero".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(CaskError::Config(
                "max_connections must be greater than zero".to_string(),
            ));
        }
        if self.max_line_size == 0 {
            return Err(CaskError::Config(
                "max_line_size must be greater than zero".to_string(),
            ));
        }
        if let Some(interval) = self.compaction_interval {
            if interval.is_zero() {
                return Err(CaskError::Config(
                    "compaction_interval must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the segment rotation threshold (in bytes)
    pub fn segment_size_limit(mut self, size: u64) -> Self {
        self.config.segment_size_limit = size;
        self
    }

    /// Enable or disable hint files
    pub fn write_hint_files(mut self, enabled: bool) -> Self {
        self.config.write_hint_files = enabled;
        self
    }

    /// Enable background compaction at the given interval
    pub fn compaction_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.compaction_interval = interval;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the maximum command line length (in bytes)
    pub fn max_line_size(mut self, size: usize) -> Self {
        self.config.max_line_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
