//! Version marker definitions

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies the member (replica) that originated an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(pub u32);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member-{}", self.0)
    }
}

/// Causal-ordering token attached to operations and stored on entries.
///
/// Two equal markers denote the same operation, so applying it again is a
/// replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionMarker {
    /// Member that issued the marker
    pub member: MemberId,

    /// Per-member region version counter (strictly increasing)
    pub region_version: u64,

    /// Issue time in unix millis
    pub timestamp: u64,
}

impl VersionMarker {
    pub fn new(member: MemberId, region_version: u64, timestamp: u64) -> Self {
        Self {
            member,
            region_version,
            timestamp,
        }
    }

    /// True if both markers were issued by the same member
    pub fn same_origin(&self, other: &VersionMarker) -> bool {
        self.member == other.member
    }
}

impl Ord for VersionMarker {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then(self.member.cmp(&other.member))
            .then(self.region_version.cmp(&other.region_version))
    }
}

impl PartialOrd for VersionMarker {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:v{}@{}",
            self.member, self.region_version, self.timestamp
        )
    }
}
