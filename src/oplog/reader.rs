//! Log Reader
//!
//! Handles reading frames from the log file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{RegionError, Result};

use super::record::{LogRecord, HEADER_SIZE};

/// One frame as found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A valid record
    Record(LogRecord),

    /// A complete frame whose payload failed validation; reading can
    /// continue after it
    Corrupt { lsn: u64, reason: String },

    /// The file ends inside a frame (or the header is unusable); nothing
    /// after this point can be framed
    Truncated,
}

/// Reads frames from the log file
pub struct LogReader {
    reader: BufReader<File>,

    /// Byte offset just past the last complete frame
    position: u64,
}

impl LogReader {
    /// Open a log file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Byte offset just past the last complete frame read so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next frame. `Ok(None)` at a clean end of file.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut header = [0u8; HEADER_SIZE];
        let read = read_full(&mut self.reader, &mut header)?;
        if read == 0 {
            return Ok(None);
        }
        if read < HEADER_SIZE {
            return Ok(Some(Frame::Truncated));
        }

        let (lsn, crc, len) = match LogRecord::parse_header(&header) {
            Ok(fields) => fields,
            Err(_) => return Ok(Some(Frame::Truncated)),
        };

        let mut payload = vec![0u8; len as usize];
        if read_full(&mut self.reader, &mut payload)? < payload.len() {
            return Ok(Some(Frame::Truncated));
        }
        self.position += (HEADER_SIZE + payload.len()) as u64;

        match LogRecord::decode_payload(lsn, crc, &payload) {
            Ok(record) => Ok(Some(Frame::Record(record))),
            Err(e) => Ok(Some(Frame::Corrupt {
                lsn,
                reason: e.to_string(),
            })),
        }
    }

    /// Read the next valid record, failing on any damaged frame
    pub fn next_record(&mut self) -> Result<Option<LogRecord>> {
        match self.next_frame()? {
            None => Ok(None),
            Some(Frame::Record(record)) => Ok(Some(record)),
            Some(Frame::Corrupt { reason, .. }) => Err(RegionError::LogCorruption(reason)),
            Some(Frame::Truncated) => Err(RegionError::LogCorruption(
                "partial frame at end of log".to_string(),
            )),
        }
    }

    /// Iterate over records until the end of the log or the first damaged frame
    pub fn records(self) -> LogIterator {
        LogIterator {
            reader: self,
            done: false,
        }
    }
}

/// Iterator over log records
pub struct LogIterator {
    reader: LogReader,
    done: bool,
}

impl Iterator for LogIterator {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.reader.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Fill `buf` as far as the reader allows; returns the bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
