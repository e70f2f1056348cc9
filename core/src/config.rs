// Engine configuration
//
// Every tunable of the sync engine lives here with the production defaults.
// Sections deserialize independently, so a config file only needs to name
// the values it overrides.

use crate::error::{Result, SyncError};
use crate::protocol::MAX_MESSAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub base_delay_ms: u64,
    /// Upper bound on the un-jittered delay
    pub max_delay_ms: u64,
    /// Relative jitter applied to each delay (0.25 = ±25%)
    pub jitter: f64,
    /// Failed attempts before falling back to single-user mode
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: 0.25,
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSyncConfig {
    pub interval_ms: u64,
    /// Number of samples kept for the median/mean estimate
    pub sample_window: usize,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            sample_window: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub capacity: usize,
    /// Queued messages older than this are dropped instead of replayed
    pub max_age_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_age_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// Pending mutations older than this are declared lost
    pub timeout_ms: u64,
    pub prune_interval_ms: u64,
    /// A pending mutation is only judged against snapshots generated at
    /// least this long after it was sent
    pub snapshot_grace_ms: u64,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            prune_interval_ms: 5_000,
            snapshot_grace_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive out-of-order messages before reconnecting
    pub out_of_order_threshold: u32,
    /// Consecutive hash mismatches before requesting a snapshot
    pub hash_mismatch_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            out_of_order_threshold: 3,
            hash_mismatch_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub debounce_ms: u64,
    pub timeout_ms: u64,
    /// Timeouts in a row before the failure is surfaced to the user
    pub max_consecutive_timeouts: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2_000,
            timeout_ms: 30_000,
            max_consecutive_timeouts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashCheckConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for HashCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub reconnect: ReconnectConfig,
    pub clock_sync: ClockSyncConfig,
    pub outbox: OutboxConfig,
    pub mutations: MutationConfig,
    pub health: HealthConfig,
    pub recovery: RecoveryConfig,
    pub hash_check: HashCheckConfig,
    /// Outgoing messages above this size are rejected locally
    pub max_message_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            clock_sync: ClockSyncConfig::default(),
            outbox: OutboxConfig::default(),
            mutations: MutationConfig::default(),
            health: HealthConfig::default(),
            recovery: RecoveryConfig::default(),
            hash_check: HashCheckConfig::default(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl SyncConfig {
    /// Parse a (possibly partial) JSON config and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SyncConfig =
            serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        let r = &self.reconnect;
        if r.base_delay_ms == 0 {
            return Err(SyncError::Config("reconnect.base_delay_ms must be > 0".into()));
        }
        if r.max_delay_ms < r.base_delay_ms {
            return Err(SyncError::Config(
                "reconnect.max_delay_ms must not be below base_delay_ms".into(),
            ));
        }
        if !(0.0..1.0).contains(&r.jitter) {
            return Err(SyncError::Config("reconnect.jitter must be in [0, 1)".into()));
        }
        if r.max_attempts == 0 {
            return Err(SyncError::Config("reconnect.max_attempts must be > 0".into()));
        }
        if self.clock_sync.sample_window == 0 || self.clock_sync.interval_ms == 0 {
            return Err(SyncError::Config(
                "clock_sync.sample_window and interval_ms must be > 0".into(),
            ));
        }
        if self.outbox.capacity == 0 {
            return Err(SyncError::Config("outbox.capacity must be > 0".into()));
        }
        if self.mutations.prune_interval_ms == 0 {
            return Err(SyncError::Config("mutations.prune_interval_ms must be > 0".into()));
        }
        if self.hash_check.enabled && self.hash_check.interval_ms == 0 {
            return Err(SyncError::Config("hash_check.interval_ms must be > 0".into()));
        }
        if self.health.out_of_order_threshold == 0 || self.health.hash_mismatch_threshold == 0 {
            return Err(SyncError::Config("health thresholds must be > 0".into()));
        }
        if self.max_message_size == 0 {
            return Err(SyncError::Config("max_message_size must be > 0".into()));
        }
        Ok(())
    }

    pub fn clock_sync_interval(&self) -> Duration {
        Duration::from_millis(self.clock_sync.interval_ms)
    }

    pub fn hash_check_interval(&self) -> Duration {
        Duration::from_millis(self.hash_check.interval_ms)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.mutations.prune_interval_ms)
    }
}
