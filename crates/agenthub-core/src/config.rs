//! Hub configuration (`agenthub.toml`).
//!
//! Every field has a default, so an empty file (or no file) is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Longest lease a worker may be configured to take (30 days).
pub const MAX_LEASE_MS: u64 = 30 * 24 * 60 * 60 * 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HubConfig {
    #[serde(default)]
    pub lease: LeaseConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Lease granted by workers on claim.
    pub default_lease_ms: u64,
    /// How often a busy worker renews its lease. Must be shorter than the lease.
    pub renew_interval_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            default_lease_ms: 600_000,
            renew_interval_ms: 60_000,
        }
    }
}

impl LeaseConfig {
    /// Clamped to `MAX_LEASE_MS`; `validate()` rejects larger values.
    pub fn default_lease(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.default_lease_ms.min(MAX_LEASE_MS) as i64)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    /// How long an idle worker waits on the delivery queue per poll.
    pub poll_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 2,
            poll_timeout_ms: 3_000,
        }
    }
}

impl WorkerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5_000,
        }
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

impl HubConfig {
    /// Load from a specific path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: HubConfig = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease.default_lease_ms == 0 || self.lease.default_lease_ms > MAX_LEASE_MS {
            return Err(ConfigError::Validation(format!(
                "lease.default_lease_ms must be in 1..={MAX_LEASE_MS} (got {})",
                self.lease.default_lease_ms
            )));
        }
        if self.lease.renew_interval_ms == 0
            || self.lease.renew_interval_ms >= self.lease.default_lease_ms
        {
            return Err(ConfigError::Validation(format!(
                "lease.renew_interval_ms must be in 1..{} (got {})",
                self.lease.default_lease_ms, self.lease.renew_interval_ms
            )));
        }
        if self.worker.count == 0 {
            return Err(ConfigError::Validation(
                "worker.count must be > 0".to_string(),
            ));
        }
        if self.worker.poll_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "worker.poll_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.reaper.enabled && self.reaper.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "reaper.interval_ms must be > 0 when the reaper is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
