//! Configuration for a region
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RegionError, Result};
use crate::version::MemberId;

/// Main configuration for a region instance
#[derive(Debug, Clone)]
pub struct RegionConfig {
    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------
    /// Region name, used in log output only
    pub name: String,

    /// Member that owns this copy of the region; stamped on generated markers
    pub member_id: MemberId,

    // -------------------------------------------------------------------------
    // Versioning Configuration
    // -------------------------------------------------------------------------
    /// When enabled every versioned destroy leaves a tombstone and local
    /// destroys of live keys are stamped with a fresh marker
    pub concurrency_checks_enabled: bool,

    /// How long a tombstone is retained before the sweep may purge it
    pub tombstone_timeout: Duration,

    /// Retention for tombstones created while replaying the persistence log
    pub recovered_tombstone_timeout: Duration,

    // -------------------------------------------------------------------------
    // Entry Table Configuration
    // -------------------------------------------------------------------------
    /// Number of independently locked shards in the entry table
    pub shard_count: usize,

    // -------------------------------------------------------------------------
    // Persistence Log Configuration
    // -------------------------------------------------------------------------
    /// Path of the persistence log. `None` keeps the region purely in memory
    pub log_path: Option<PathBuf>,

    /// Sync strategy: how often to fsync the log
    pub log_sync_strategy: LogSyncStrategy,
}

/// Log sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: "region".to_string(),
            member_id: MemberId(1),
            concurrency_checks_enabled: false,
            tombstone_timeout: Duration::from_secs(600), // 10 minutes
            recovered_tombstone_timeout: Duration::ZERO,
            shard_count: 16,
            log_path: None,
            log_sync_strategy: LogSyncStrategy::EveryNEntries { count: 100 },
        }
    }
}

impl RegionConfig {
    /// Create a new config builder
    pub fn builder() -> RegionConfigBuilder {
        RegionConfigBuilder::default()
    }

    /// Check the values that would otherwise fail at runtime
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(RegionError::Config(
                "shard_count must be at least 1".to_string(),
            ));
        }
        if let LogSyncStrategy::EveryNEntries { count: 0 } = self.log_sync_strategy {
            return Err(RegionError::Config(
                "log sync count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for RegionConfig
#[derive(Default)]
pub struct RegionConfigBuilder {
    config: RegionConfig,
}

impl RegionConfigBuilder {
    /// Set the region name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the owning member id
    pub fn member_id(mut self, member: MemberId) -> Self {
        self.config.member_id = member;
        self
    }

    /// Enable or disable concurrency checks (tombstones for every versioned destroy)
    pub fn concurrency_checks(mut self, enabled: bool) -> Self {
        self.config.concurrency_checks_enabled = enabled;
        self
    }

    /// Set the tombstone retention window
    pub fn tombstone_timeout(mut self, timeout: Duration) -> Self {
        self.config.tombstone_timeout = timeout;
        self
    }

    /// Set the retention window for tombstones created during log recovery
    pub fn recovered_tombstone_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovered_tombstone_timeout = timeout;
        self
    }

    /// Set the number of entry table shards
    pub fn shard_count(mut self, count: usize) -> Self {
        self.config.shard_count = count;
        self
    }

    /// Persist mutations to a log at the given path
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_path = Some(path.into());
        self
    }

    /// Set the log sync strategy
    pub fn log_sync_strategy(mut self, strategy: LogSyncStrategy) -> Self {
        self.config.log_sync_strategy = strategy;
        self
    }

    pub fn build(self) -> RegionConfig {
        self.config
    }
}
