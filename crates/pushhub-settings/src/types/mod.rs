//! Settings types.
//!
//! All structs use `#[serde(rename_all = "camelCase", default)]` so a
//! settings file may specify any subset of fields.

mod hub;
mod server;

pub use hub::{BridgeSettings, HubSettings, MAX_MAILBOX_CAPACITY};
pub use server::{LoggingSettings, ServerSettings};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PushHubSettings {
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// Registry and backplane channel settings.
    pub hub: HubSettings,
    /// Backplane subscription reconnect settings.
    pub bridge: BridgeSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl PushHubSettings {
    /// Reject combinations the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.hub.channel.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "hub.channel must not be empty".into(),
            ));
        }
        if self.hub.mailbox_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.mailboxCapacity must be at least 1".into(),
            ));
        }
        if self.bridge.max_backoff_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "bridge.maxBackoffMs must be positive".into(),
            ));
        }
        if self.bridge.initial_backoff_ms > self.bridge.max_backoff_ms {
            return Err(SettingsError::InvalidValue(format!(
                "bridge.initialBackoffMs ({}) exceeds bridge.maxBackoffMs ({})",
                self.bridge.initial_backoff_ms, self.bridge.max_backoff_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.bridge.jitter_factor) {
            return Err(SettingsError::InvalidValue(
                "bridge.jitterFactor must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }
}
