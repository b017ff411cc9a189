//! Log Writer
//!
//! Handles appending records to the log file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::LogSyncStrategy;
use crate::error::{RegionError, Result};

use super::record::{LogOp, LogRecord};
use super::recovery::LogRecovery;

/// Writes records to the log file
pub struct LogWriter {
    path: PathBuf,
    writer: BufWriter<File>,

    /// LSN the next appended record receives
    next_lsn: u64,

    sync_strategy: LogSyncStrategy,

    /// Records appended since the last fsync
    unsynced: usize,
}

impl LogWriter {
    /// Open or create a log file, continuing after its last valid record.
    ///
    /// A partial write at the end of an existing file is truncated first.
    pub fn open(path: &Path, sync_strategy: LogSyncStrategy) -> Result<Self> {
        let next_lsn = if path.exists() {
            let (_, result) = LogRecovery::recover(path)?;
            result.last_lsn + 1
        } else {
            1
        };
        Self::open_at(path, sync_strategy, next_lsn)
    }

    /// Open or create a log file whose next record gets `next_lsn`.
    ///
    /// The caller is responsible for having recovered the file already.
    pub fn open_at(path: &Path, sync_strategy: LogSyncStrategy, next_lsn: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            next_lsn: next_lsn.max(1),
            sync_strategy,
            unsynced: 0,
        })
    }

    /// Append a record for `op`. Returns the LSN assigned to it.
    pub fn append(&mut self, op: LogOp) -> Result<u64> {
        let lsn = self.next_lsn;
        self.append_at(lsn, op)?;
        Ok(lsn)
    }

    /// Append a record under an LSN the caller reserved earlier.
    ///
    /// Reserved LSNs may arrive out of order; the file then holds them out
    /// of order and readers sort by LSN. `current_lsn` never moves backwards.
    pub fn append_at(&mut self, lsn: u64, op: LogOp) -> Result<()> {
        let frame = LogRecord::new(lsn, op).serialize()?;

        self.writer
            .write_all(&frame)
            .map_err(|e| RegionError::LogWrite(format!("append lsn {}: {}", lsn, e)))?;
        self.next_lsn = self.next_lsn.max(lsn + 1);
        self.unsynced += 1;

        let due = match self.sync_strategy {
            LogSyncStrategy::EveryWrite => true,
            LogSyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if due {
            self.sync()?;
        }

        Ok(())
    }

    /// Force buffered records to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// LSN the next appended record will receive
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
