//! Error types for regionkv
//!
//! Two layers of errors:
//! - [`DestroyError`]: the caller-visible rejections of the destroy protocol
//! - [`RegionError`]: everything else (I/O, log corruption, configuration)

use thiserror::Error;

use crate::version::{ConflictReason, VersionMarker};

/// Result type alias using RegionError
pub type Result<T> = std::result::Result<T, RegionError>;

/// Rejections surfaced by a destroy.
///
/// Internal races and region clears never appear here; they are resolved by
/// the coordinator itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DestroyError {
    /// No live value and nothing that requires a tombstone
    #[error("Entry not found")]
    NotFound,

    /// `expected_old_value` did not match the live value
    #[error("Conditional destroy failed: expected value did not match")]
    ConditionalMismatch,

    /// The request carried a marker older than the entry's
    #[error("Version conflict ({reason}): incoming {incoming} is not newer than {current}")]
    VersionConflict {
        incoming: VersionMarker,
        current: VersionMarker,
        reason: ConflictReason,
    },
}

/// Unified error type for region operations
#[derive(Debug, Error)]
pub enum RegionError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Persistence Log Errors
    // -------------------------------------------------------------------------
    #[error("Log corruption detected: {0}")]
    LogCorruption(String),

    #[error("Log write failed: {0}")]
    LogWrite(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Destroy Errors
    // -------------------------------------------------------------------------
    #[error(transparent)]
    Destroy(#[from] DestroyError),
}
