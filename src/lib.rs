//! # CaskKV
//!
//! A log-structured (Bitcask-style) key-value store with:
//! - Append-only segment files with per-record checksums
//! - An in-memory key index pointing at the newest record of every key
//! - Crash recovery with torn-write truncation
//! - Background compaction of sealed segments
//! - A line-based TCP client protocol
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │             (one thread per connection)                      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  SET / GET / DELETE
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       Engine                                 │
//! │            (Single Writer / Multi Reader)                    │
//! └──────┬──────────────────────┬─────────────────────┬─────────┘
//!        │ append               │ lookup              │ read
//!        ▼                      ▼                     ▼
//! ┌─────────────┐        ┌─────────────┐       ┌─────────────┐
//! │  Segment    │        │   KeyDir    │       │  Segment    │
//! │  Writer     │───────▶│  (RwLock)   │       │  Reader     │
//! └──────┬──────┘ update └─────────────┘       └──────┬──────┘
//!        │                                            │
//!        ▼                                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   000001.seg  000002.seg  ...  00000N.seg (active)           │
//! │        ▲ rewritten by Compaction, indexed by Recovery        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod keydir;
pub mod segment;
pub mod recovery;
pub mod compaction;
pub mod network;
pub mod protocol;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CaskError, Result};
pub use config::Config;
pub use engine::Engine;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of CaskKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
