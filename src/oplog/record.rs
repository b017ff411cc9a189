//! Log record definitions
//!
//! Defines the structure of individual log records and their framing.

use serde::{Deserialize, Serialize};

use crate::error::{RegionError, Result};
use crate::version::{now_millis, VersionMarker};
use crate::{Key, Value};

/// Frame header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Largest payload a frame may declare; anything bigger is treated as a
/// damaged header
pub const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

/// A single record in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The committed mutation
    pub op: LogOp,

    /// Timestamp (unix millis) when the record was created
    pub timestamp: u64,
}

/// Mutations that are logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOp {
    /// A key was created or updated
    Put {
        key: Key,
        value: Value,
        marker: Option<VersionMarker>,
    },

    /// A key was destroyed, leaving a tombstone if `tombstone` is set
    Destroy {
        key: Key,
        marker: Option<VersionMarker>,
        tombstone: bool,
    },

    /// Every entry of the region was dropped
    Clear,
}

impl LogOp {
    /// Key the op applies to; `None` for region-wide ops
    pub fn key(&self) -> Option<&Key> {
        match self {
            LogOp::Put { key, .. } | LogOp::Destroy { key, .. } => Some(key),
            LogOp::Clear => None,
        }
    }

    pub fn marker(&self) -> Option<VersionMarker> {
        match self {
            LogOp::Put { marker, .. } | LogOp::Destroy { marker, .. } => *marker,
            LogOp::Clear => None,
        }
    }
}

impl LogRecord {
    /// Create a record stamped with the current time
    pub fn new(lsn: u64, op: LogOp) -> Self {
        Self {
            lsn,
            op,
            timestamp: now_millis(),
        }
    }

    /// Encode as a complete frame (header + payload)
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload =
            bincode::serialize(self).map_err(|e| RegionError::Serialization(e.to_string()))?;

        if payload.len() > MAX_RECORD_SIZE as usize {
            return Err(RegionError::LogWrite(format!(
                "record of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_RECORD_SIZE
            )));
        }

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&self.lsn.to_le_bytes());
        frame.extend_from_slice(&Self::compute_crc(&payload).to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decode a complete frame, validating length, CRC and LSN
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (lsn, crc, len) = Self::parse_header(bytes)?;

        let payload = bytes
            .get(HEADER_SIZE..HEADER_SIZE + len as usize)
            .ok_or_else(|| RegionError::LogCorruption("truncated payload".to_string()))?;

        Self::decode_payload(lsn, crc, payload)
    }

    /// CRC32 of a payload
    pub fn compute_crc(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }

    /// Split a header into (lsn, crc, payload length)
    pub(crate) fn parse_header(bytes: &[u8]) -> Result<(u64, u32, u32)> {
        if bytes.len() < HEADER_SIZE {
            return Err(RegionError::LogCorruption("truncated header".to_string()));
        }

        let mut lsn = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        lsn.copy_from_slice(&bytes[0..8]);
        crc.copy_from_slice(&bytes[8..12]);
        len.copy_from_slice(&bytes[12..16]);

        let len = u32::from_le_bytes(len);
        if len > MAX_RECORD_SIZE {
            return Err(RegionError::LogCorruption(format!(
                "declared payload length {} exceeds limit",
                len
            )));
        }

        Ok((u64::from_le_bytes(lsn), u32::from_le_bytes(crc), len))
    }

    /// Check a payload against its header fields and decode it
    pub(crate) fn decode_payload(lsn: u64, crc: u32, payload: &[u8]) -> Result<Self> {
        let actual = Self::compute_crc(payload);
        if actual != crc {
            return Err(RegionError::LogCorruption(format!(
                "CRC mismatch at lsn {}: expected {:#010x}, found {:#010x}",
                lsn, crc, actual
            )));
        }

        let record: LogRecord =
            bincode::deserialize(payload).map_err(|e| RegionError::Serialization(e.to_string()))?;

        if record.lsn != lsn {
            return Err(RegionError::LogCorruption(format!(
                "header lsn {} does not match record lsn {}",
                lsn, record.lsn
            )));
        }

        Ok(record)
    }
}
