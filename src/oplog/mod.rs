//! Persistence Log Module
//!
//! Append-only record of committed mutations, replayed on open.
//!
//! ## Responsibilities
//! - Append a record for every committed put and destroy (after the slot
//!   lock is released; the in-memory state is authoritative)
//! - CRC32 checksums for corruption detection
//! - Log Sequence Numbers (LSN) for ordering
//! - Crash recovery: skip corrupt frames, truncate a partial tail
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Record 1                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Record 2                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//! Integers are little-endian; `Data` is the bincode-encoded record and the
//! CRC covers `Data` only.

mod reader;
mod record;
mod recovery;
mod writer;

pub use reader::{Frame, LogIterator, LogReader};
pub use record::{LogOp, LogRecord, HEADER_SIZE, MAX_RECORD_SIZE};
pub use recovery::{LogRecovery, RecoveryResult};
pub use writer::LogWriter;
