//! # regionkv
//!
//! An in-memory key-value region for replicated deployments, with:
//! - A tombstone-based destroy protocol that converges across members
//! - Per-key locking; collaborators are never called under a lock
//! - Version markers with deterministic conflict resolution
//! - An append-only persistence log with crash recovery
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Region                              │
//! │     put / destroy / clear / bulk load / tombstone expiry     │
//! └──────────┬───────────────────┬───────────────────┬──────────┘
//!            │                   │                   │
//!            ▼                   ▼                   ▼
//!   ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//!   │   EntryTable    │ │    Destroy      │ │    Version      │
//!   │ (sharded slots) │ │  Coordinator    │ │   Authority     │
//!   └─────────────────┘ └────────┬────────┘ └─────────────────┘
//!                                │ after unlock
//!                                ▼
//!                       ┌─────────────────┐
//!                       │  PostRemoval    │──► eviction, index,
//!                       │   Notifier      │    replication, listeners
//!                       └────────┬────────┘
//!                                ▼
//!                       ┌─────────────────┐
//!                       │  Persistence    │
//!                       │  Log (oplog)    │
//!                       └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod version;
pub mod entry;
pub mod destroy;
pub mod notify;
pub mod tombstone;
pub mod oplog;
pub mod stats;
pub mod region;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{LogSyncStrategy, RegionConfig};
pub use destroy::{DestroyRequest, Outcome, SuppressReason};
pub use error::{DestroyError, RegionError, Result};
pub use notify::Collaborators;
pub use region::{PutOutcome, Region, SweeperHandle};
pub use stats::StatsSnapshot;
pub use version::{MemberId, VersionMarker};

/// Keys are opaque, cheaply cloneable byte strings
pub type Key = bytes::Bytes;

/// Values are opaque, cheaply cloneable byte strings
pub type Value = bytes::Bytes;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of regionkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
