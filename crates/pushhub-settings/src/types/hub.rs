//! Registry, channel and reconnect settings.

use std::time::Duration;

use pushhub_core::BackoffConfig;
use serde::{Deserialize, Serialize};

/// Largest accepted per-connection mailbox.
pub const MAX_MAILBOX_CAPACITY: usize = 1024;

/// Registry and backplane channel settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Backplane channel shared by every cooperating process.
    pub channel: String,
    /// Per-connection mailbox capacity.
    pub mailbox_capacity: usize,
}

impl HubSettings {
    /// Mailbox capacity clamped to `1..=MAX_MAILBOX_CAPACITY`.
    #[must_use]
    pub fn effective_mailbox_capacity(&self) -> usize {
        self.mailbox_capacity.clamp(1, MAX_MAILBOX_CAPACITY)
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            channel: "pushhub:events".to_string(),
            mailbox_capacity: 16,
        }
    }
}

/// Reconnect policy of the backplane subscription loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Delay before the first reconnect attempt in milliseconds.
    pub initial_backoff_ms: u64,
    /// Ceiling on any reconnect delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Jitter range as a fraction of the delay.
    pub jitter_factor: f64,
}

impl BridgeSettings {
    /// Convert into the backoff parameters used by the reconnect loop.
    #[must_use]
    pub fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            jitter_factor: self.jitter_factor,
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            jitter_factor: 0.2,
        }
    }
}
