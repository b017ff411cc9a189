//! Version Module
//!
//! Causal ordering of operations on the same key.
//!
//! ## Responsibilities
//! - Define the version marker carried by entries, tombstones and requests
//! - Decide whether an incoming marker is newer than, equal to, or older
//!   than the marker already stored on a slot
//! - Issue fresh markers for locally originated operations
//!
//! ## Ordering
//! Markers are totally ordered by `(timestamp, member, region_version)`.
//! The authority keeps the timestamps it issues monotonic, so for a single
//! member this order agrees with the region version counter.

mod authority;
mod marker;

pub use authority::{ConflictReason, Decision, VersionAuthority};
pub(crate) use authority::now_millis;
pub use marker::{MemberId, VersionMarker};
