//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PushHubSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::PushHubSettings;

/// Resolve the path to the settings file (`~/.pushhub/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pushhub").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PushHubSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults (plus env overrides). If the
/// file contains invalid JSON or the merged result fails validation, returns
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<PushHubSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Merge a settings file over compiled defaults without consulting the
/// environment.
pub fn read_settings_file(path: &Path) -> Result<PushHubSettings> {
    let defaults = serde_json::to_value(PushHubSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `PUSHHUB_*` environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (falling back to file/default).
pub fn apply_env_overrides(settings: &mut PushHubSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Split out from [`apply_env_overrides`] so the parsing rules can be tested
/// without touching the process environment.
pub fn apply_overrides(settings: &mut PushHubSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("PUSHHUB_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = checked(
        "PUSHHUB_PORT",
        read("PUSHHUB_PORT"),
        |v| parse_u64_range(v, 0, u64::from(u16::MAX)),
    ) {
        settings.server.port = v as u16;
    }
    if let Some(v) = checked(
        "PUSHHUB_MAX_CONNECTIONS",
        read("PUSHHUB_MAX_CONNECTIONS"),
        |v| parse_u64_range(v, 1, 1_000_000),
    ) {
        settings.server.max_connections = v as usize;
    }

    // ── Hub ─────────────────────────────────────────────────────────
    if let Some(v) = read("PUSHHUB_CHANNEL") {
        settings.hub.channel = v;
    }
    if let Some(v) = checked(
        "PUSHHUB_MAILBOX_CAPACITY",
        read("PUSHHUB_MAILBOX_CAPACITY"),
        |v| parse_u64_range(v, 1, crate::types::MAX_MAILBOX_CAPACITY as u64),
    ) {
        settings.hub.mailbox_capacity = v as usize;
    }

    // ── Bridge ──────────────────────────────────────────────────────
    if let Some(v) = checked(
        "PUSHHUB_BACKOFF_MAX_MS",
        read("PUSHHUB_BACKOFF_MAX_MS"),
        |v| parse_u64_range(v, 1, 600_000),
    ) {
        settings.bridge.max_backoff_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("PUSHHUB_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = checked("PUSHHUB_LOG_JSON", read("PUSHHUB_LOG_JSON"), parse_bool) {
        settings.logging.json = v;
    }
}

fn checked<T>(name: &str, raw: Option<String>, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let raw = raw?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        tracing::warn!(key = name, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
