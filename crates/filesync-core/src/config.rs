//! Sync configuration.
//!
//! Field names follow the camelCase option names used by the host settings
//! (`autoSyncIntervalSeconds`, `holdTimeoutSeconds`, ...). Every field has a
//! default so a partial settings object deserializes cleanly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("Unknown conflict resolution strategy: {0}")]
    UnknownStrategy(String),
}

/// How to resolve a file whose content differs between two peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Pull the remote copy when it was modified more recently.
    #[default]
    PreferLatest,
    /// Never pull; the other side will eventually pull from us.
    PreferLocal,
    /// Never pull; surface the conflict to the user.
    Notify,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictStrategy::PreferLatest => "prefer-latest",
            ConflictStrategy::PreferLocal => "prefer-local",
            ConflictStrategy::Notify => "notify",
        };
        f.write_str(name)
    }
}

impl FromStr for ConflictStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prefer-latest" => Ok(ConflictStrategy::PreferLatest),
            "prefer-local" => Ok(ConflictStrategy::PreferLocal),
            "notify" => Ok(ConflictStrategy::Notify),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Configuration for a `SyncCoordinator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Seconds between reconciliation cycles (default: 10)
    pub auto_sync_interval_seconds: u64,
    /// Lifetime of a hold signal (default: 30)
    pub hold_timeout_seconds: u64,
    /// Age after which an unfinished request is abandoned (default: 60)
    pub request_timeout_seconds: u64,
    pub conflict_resolution_strategy: ConflictStrategy,
    /// How long terminal records stay in the shared logs (default: 300)
    pub retention_window_seconds: u64,
    /// Consecutive failures before a peer is disabled (default: 3)
    pub max_consecutive_failures: u32,
    /// Delay between acquiring a hold and posting the request (default: 500)
    pub request_delay_millis: u64,
    /// Debounce applied to local-store change notifications (default: 1000)
    pub publish_debounce_millis: u64,
    /// Path prefixes that are never published or pulled
    pub ignored_path_prefixes: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync_interval_seconds: 10,
            hold_timeout_seconds: 30,
            request_timeout_seconds: 60,
            conflict_resolution_strategy: ConflictStrategy::default(),
            retention_window_seconds: 300,
            max_consecutive_failures: 3,
            request_delay_millis: 500,
            publish_debounce_millis: 1000,
            ignored_path_prefixes: Vec::new(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auto_sync_interval_seconds == 0 {
            return Err(ConfigError::Zero("autoSyncIntervalSeconds"));
        }
        if self.hold_timeout_seconds == 0 {
            return Err(ConfigError::Zero("holdTimeoutSeconds"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::Zero("requestTimeoutSeconds"));
        }
        if self.retention_window_seconds == 0 {
            return Err(ConfigError::Zero("retentionWindowSeconds"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::Zero("maxConsecutiveFailures"));
        }
        Ok(())
    }

    pub fn auto_sync_interval(&self) -> Duration {
        Duration::from_secs(self.auto_sync_interval_seconds)
    }

    pub fn auto_sync_interval_ms(&self) -> u64 {
        self.auto_sync_interval_seconds * 1000
    }

    pub fn hold_timeout_ms(&self) -> u64 {
        self.hold_timeout_seconds * 1000
    }

    pub fn request_timeout_ms(&self) -> u64 {
        self.request_timeout_seconds * 1000
    }

    pub fn retention_ms(&self) -> u64 {
        self.retention_window_seconds * 1000
    }
}
