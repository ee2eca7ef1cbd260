//! Server configuration.

use std::time::Duration;

use lobby_hub::ConnectionOptions;
use lobby_settings::LobbySettings;

/// Configuration for the lobby server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum number of lobbies open at once.
    pub max_lobbies: usize,
    /// Queue, size and liveness limits applied to every connection.
    pub connection: ConnectionOptions,
    /// Whether `/ws/stats/{user_id}` is served.
    pub stats_enabled: bool,
    /// Initial statistics broadcast interval.
    pub stats_interval: Duration,
    /// Requests kept in memory for the statistics feed.
    pub request_log_capacity: usize,
}

impl ServerConfig {
    /// Derive the server configuration from loaded settings.
    pub fn from_settings(settings: &LobbySettings) -> Self {
        let conn = &settings.connection;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_lobbies: settings.server.max_lobbies,
            connection: ConnectionOptions {
                queue_capacity: conn.queue_capacity,
                max_message_size: conn.max_message_size,
                write_timeout: conn.write_timeout(),
                pong_timeout: conn.pong_timeout(),
                ping_period: conn.ping_period(),
            },
            stats_enabled: settings.stats.enabled,
            stats_interval: settings.stats.interval(),
            ..Self::default()
        }
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_lobbies: 64,
            connection: ConnectionOptions::default(),
            stats_enabled: true,
            stats_interval: Duration::from_secs(10),
            request_log_capacity: 10_000,
        }
    }
}
