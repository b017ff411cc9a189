//! Log Recovery
//!
//! Handles crash recovery by scanning the log.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::Result;

use super::reader::{Frame, LogReader};
use super::record::LogRecord;

/// Handles log recovery after a crash
pub struct LogRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of records successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted records skipped
    pub entries_corrupted: u64,

    /// Last valid LSN (0 if none)
    pub last_lsn: u64,

    /// Whether a partial write at the end was found (and, for `recover`, removed)
    pub was_truncated: bool,
}

impl LogRecovery {
    /// Recover records from a log file
    ///
    /// This will:
    /// 1. Read all valid records
    /// 2. Skip records whose CRC or payload does not validate
    /// 3. Truncate a partial write at the end
    /// 4. Return all valid records in order
    pub fn recover(path: &Path) -> Result<(Vec<LogRecord>, RecoveryResult)> {
        let (records, result, valid_len) = Self::scan(path)?;

        if result.was_truncated {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
            tracing::warn!(
                path = %path.display(),
                valid_len,
                "truncated partial write at end of log"
            );
        }

        Ok((records, result))
    }

    /// Verify integrity of a log file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let (_, result, _) = Self::scan(path)?;
        Ok(result)
    }

    fn scan(path: &Path) -> Result<(Vec<LogRecord>, RecoveryResult, u64)> {
        let mut reader = LogReader::open(path)?;
        let mut records = Vec::new();
        let mut result = RecoveryResult::default();

        loop {
            let before = reader.position();
            match reader.next_frame()? {
                None => return Ok((records, result, reader.position())),
                Some(Frame::Record(record)) => {
                    result.entries_recovered += 1;
                    result.last_lsn = result.last_lsn.max(record.lsn);
                    records.push(record);
                }
                Some(Frame::Corrupt { lsn, reason }) => {
                    tracing::warn!(lsn, %reason, "skipping corrupt log record");
                    result.entries_corrupted += 1;
                }
                Some(Frame::Truncated) => {
                    result.was_truncated = true;
                    return Ok((records, result, before));
                }
            }
        }
    }
}
