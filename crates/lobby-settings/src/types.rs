//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file and
//! `#[serde(default)]` so partial files only override what they mention.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings type for the lobby server.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LobbySettings {
    /// Listener and lobby registry settings.
    pub server: ServerSettings,
    /// Per-connection queue, size and liveness settings.
    pub connection: ConnectionSettings,
    /// Periodic statistics feed settings.
    pub stats: StatsSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl LobbySettings {
    /// Correct values that would break connection liveness.
    ///
    /// The ping period must be strictly shorter than the pong timeout, or a
    /// healthy peer would be dropped before it is ever pinged. An offending
    /// ping period is reset to nine tenths of the timeout with a warning.
    pub fn validate(&mut self) {
        let conn = &mut self.connection;
        if conn.pong_timeout_ms == 0 {
            tracing::warn!("pongTimeoutMs is zero, restoring default");
            conn.pong_timeout_ms = ConnectionSettings::default().pong_timeout_ms;
        }
        if conn.ping_period_ms == 0 || conn.ping_period_ms >= conn.pong_timeout_ms {
            let pong = conn.pong_timeout_ms;
            let corrected = (pong / 10 * 9 + pong % 10 * 9 / 10).max(1);
            tracing::warn!(
                ping_period_ms = conn.ping_period_ms,
                pong_timeout_ms = conn.pong_timeout_ms,
                corrected,
                "ping period must be shorter than pong timeout"
            );
            conn.ping_period_ms = corrected;
        }
        if conn.queue_capacity == 0 {
            tracing::warn!("queueCapacity is zero, restoring default");
            conn.queue_capacity = ConnectionSettings::default().queue_capacity;
        }
        if self.stats.interval_ms == 0 {
            tracing::warn!("stats intervalMs is zero, restoring default");
            self.stats.interval_ms = StatsSettings::default().interval_ms;
        }
    }
}

/// Listener and lobby registry settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP/WebSocket port (0 picks a free port).
    pub port: u16,
    /// Maximum number of lobbies open at once.
    pub max_lobbies: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_lobbies: 64,
        }
    }
}

/// Per-connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Capacity of each connection's outbound queue.
    pub queue_capacity: usize,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
    /// Deadline for writing one frame, in milliseconds.
    pub write_timeout_ms: u64,
    /// Read-liveness window renewed by every pong, in milliseconds.
    pub pong_timeout_ms: u64,
    /// Keepalive ping period, in milliseconds.
    pub ping_period_ms: u64,
}

impl ConnectionSettings {
    /// Write deadline as a `Duration`.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Pong timeout as a `Duration`.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    /// Ping period as a `Duration`.
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_message_size: 512,
            write_timeout_ms: 10_000,
            pong_timeout_ms: 120_000,
            ping_period_ms: 108_000,
        }
    }
}

/// Periodic statistics feed settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsSettings {
    /// Whether `/ws/stats` is served.
    pub enabled: bool,
    /// Initial broadcast interval, in milliseconds.
    pub interval_ms: u64,
}

impl StatsSettings {
    /// Interval as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 10_000,
        }
    }
}

/// Output format of the log subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = LobbySettings::default();
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.server.max_lobbies, 64);
        assert_eq!(s.connection.queue_capacity, 256);
        assert_eq!(s.connection.max_message_size, 512);
        assert_eq!(s.connection.write_timeout(), Duration::from_secs(10));
        assert_eq!(s.connection.pong_timeout(), Duration::from_secs(120));
        assert_eq!(s.connection.ping_period(), Duration::from_secs(108));
        assert!(s.stats.enabled);
        assert_eq!(s.stats.interval(), Duration::from_secs(10));
        assert_eq!(s.logging.level, "info");
        assert_eq!(s.logging.format, LogFormat::Compact);
    }

    #[test]
    fn default_ping_is_shorter_than_pong() {
        let c = ConnectionSettings::default();
        assert!(c.ping_period() < c.pong_timeout());
    }

    #[test]
    fn validate_corrects_ping_period() {
        let mut s = LobbySettings::default();
        s.connection.pong_timeout_ms = 10_000;
        s.connection.ping_period_ms = 20_000;
        s.validate();
        assert_eq!(s.connection.ping_period_ms, 9_000);
    }

    #[test]
    fn validate_restores_zero_values() {
        let mut s = LobbySettings::default();
        s.connection.queue_capacity = 0;
        s.connection.pong_timeout_ms = 0;
        s.stats.interval_ms = 0;
        s.validate();
        assert_eq!(s.connection.queue_capacity, 256);
        assert_eq!(s.connection.pong_timeout_ms, 120_000);
        assert_eq!(s.connection.ping_period_ms, 108_000);
        assert_eq!(s.stats.interval_ms, 10_000);
    }

    #[test]
    fn validate_handles_huge_pong_timeout() {
        let mut s: LobbySettings =
            serde_json::from_str(r#"{"connection": {"pongTimeoutMs": 18446744073709551615, "pingPeriodMs": 18446744073709551615}}"#)
                .unwrap();
        s.validate();
        assert_eq!(s.connection.ping_period_ms, u64::MAX / 10 * 9 + 4);
        assert!(s.connection.ping_period_ms < s.connection.pong_timeout_ms);
    }

    #[test]
    fn validate_never_yields_zero_ping_period() {
        let mut s = LobbySettings::default();
        s.connection.pong_timeout_ms = 1;
        s.connection.ping_period_ms = 0;
        s.validate();
        assert_eq!(s.connection.ping_period_ms, 1);
    }

    #[test]
    fn validate_keeps_sane_values() {
        let mut s = LobbySettings::default();
        s.connection.ping_period_ms = 1_000;
        s.validate();
        assert_eq!(s.connection.ping_period_ms, 1_000);
    }

    #[test]
    fn camel_case_json() {
        let json = serde_json::to_value(LobbySettings::default()).unwrap();
        assert_eq!(json["connection"]["queueCapacity"], 256);
        assert_eq!(json["server"]["maxLobbies"], 64);
        assert_eq!(json["logging"]["format"], "compact");
    }
}
