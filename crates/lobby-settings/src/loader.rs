//! Layered settings loading.
//!
//! Compiled defaults are serialized to JSON, the user file (if any) is
//! deep-merged over them, the result is deserialized, `LOBBY_*` environment
//! variables are applied and finally [`LobbySettings::validate`] runs.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{LobbySettings, LogFormat};

/// Default settings file location: `$HOME/.lobby/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(std::env::temp_dir, PathBuf::from);
    home.join(".lobby").join("settings.json")
}

/// Load settings from [`settings_path`].
pub fn load_settings() -> Result<LobbySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path`, falling back to defaults when it is absent.
///
/// A file that exists but cannot be read or parsed is an error; the caller
/// decides whether to fall back.
pub fn load_settings_from_path(path: &Path) -> Result<LobbySettings> {
    let mut value = serde_json::to_value(LobbySettings::default())?;
    if path.is_file() {
        debug!(path = %path.display(), "merging settings file");
        let raw = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&raw)?;
        value = deep_merge(value, user);
    } else {
        debug!(path = %path.display(), "no settings file, using defaults");
    }

    let mut settings: LobbySettings = serde_json::from_value(value)?;
    apply_env_overrides(&mut settings);
    settings.validate();
    Ok(settings)
}

/// Merge `overlay` into `base`.
///
/// Objects merge key by key; anything else in `overlay` replaces `base`
/// wholesale. `null` in `overlay` leaves the base value alone.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => Value::Object(merge_maps(base, overlay)),
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

fn merge_maps(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        if value.is_null() {
            continue;
        }
        let merged = match base.remove(&key) {
            Some(existing) => deep_merge(existing, value),
            None => value,
        };
        let _ = base.insert(key, merged);
    }
    base
}

/// Apply `LOBBY_*` environment variables on top of `settings`.
///
/// Values that fail to parse or fall outside their range are logged and
/// ignored.
pub fn apply_env_overrides(settings: &mut LobbySettings) {
    if let Some(v) = env_string("LOBBY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env_parsed("LOBBY_PORT", |s| parse_u16_range(s, 0, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = env_parsed("LOBBY_MAX_LOBBIES", |s| parse_usize_range(s, 1, 100_000)) {
        settings.server.max_lobbies = v;
    }

    let conn = &mut settings.connection;
    if let Some(v) = env_parsed("LOBBY_QUEUE_CAPACITY", |s| parse_usize_range(s, 1, 65_536)) {
        conn.queue_capacity = v;
    }
    if let Some(v) = env_parsed("LOBBY_MAX_MESSAGE_SIZE", |s| {
        parse_usize_range(s, 64, 16 * 1024 * 1024)
    }) {
        conn.max_message_size = v;
    }
    if let Some(v) = env_parsed("LOBBY_WRITE_TIMEOUT_MS", |s| parse_u64_range(s, 100, 600_000)) {
        conn.write_timeout_ms = v;
    }
    if let Some(v) = env_parsed("LOBBY_PONG_TIMEOUT_MS", |s| parse_u64_range(s, 1_000, 3_600_000)) {
        conn.pong_timeout_ms = v;
    }
    if let Some(v) = env_parsed("LOBBY_PING_PERIOD_MS", |s| parse_u64_range(s, 500, 3_600_000)) {
        conn.ping_period_ms = v;
    }

    if let Some(v) = env_parsed("LOBBY_STATS_ENABLED", parse_bool) {
        settings.stats.enabled = v;
    }
    if let Some(v) = env_parsed("LOBBY_STATS_INTERVAL_MS", |s| parse_u64_range(s, 1, 86_400_000)) {
        settings.stats.interval_ms = v;
    }

    if let Some(v) = env_string("LOBBY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env_parsed("LOBBY_LOG_FORMAT", parse_log_format) {
        settings.logging.format = v;
    }
}

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u16` in `min..=max`.
pub fn parse_u16_range(raw: &str, min: u16, max: u16) -> Option<u16> {
    raw.trim().parse().ok().filter(|n| (min..=max).contains(n))
}

/// Parse a `u64` in `min..=max`.
pub fn parse_u64_range(raw: &str, min: u64, max: u64) -> Option<u64> {
    raw.trim().parse().ok().filter(|n| (min..=max).contains(n))
}

/// Parse a `usize` in `min..=max`.
pub fn parse_usize_range(raw: &str, min: usize, max: usize) -> Option<usize> {
    raw.trim().parse().ok().filter(|n| (min..=max).contains(n))
}

/// Parse a log format name (`compact` or `json`).
pub fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "compact" | "text" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T>(name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        warn!(key = name, value = %raw, "ignoring invalid env override");
    }
    parsed
}
