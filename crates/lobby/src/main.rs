//! # lobby
//!
//! Lobby server binary: loads settings, initializes logging and metrics,
//! and serves until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lobby_server::{LobbyServer, ServerConfig};
use lobby_settings::LobbySettings;

/// How long shutdown waits for hubs to drain.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Lobby server.
#[derive(Parser, Debug)]
#[command(name = "lobby", about = "WebSocket lobby server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.lobby/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Maximum number of lobbies (overrides settings).
    #[arg(long)]
    max_lobbies: Option<usize>,
}

impl Cli {
    /// Apply command-line overrides on top of loaded settings.
    fn apply(&self, settings: &mut LobbySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(max) = self.max_lobbies {
            settings.server.max_lobbies = max;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn load(cli: &Cli) -> Result<LobbySettings> {
    let path = cli.settings.clone().unwrap_or_else(lobby_settings::settings_path);
    let mut settings = lobby_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    lobby_logging::init_from_settings(&settings.logging);

    let metrics = lobby_server::metrics::install_recorder().context("Failed to install metrics recorder")?;
    let server = LobbyServer::new(ServerConfig::from_settings(&settings), metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        max_lobbies = settings.server.max_lobbies,
        stats = settings.stats.enabled,
        "Lobby server listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server.shutdown_gracefully(Some(SHUTDOWN_TIMEOUT)).await {
        tracing::warn!("some hubs did not stop in time");
    }
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["lobby"]);
        let mut settings = LobbySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "lobby",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--log-level",
            "debug",
            "--max-lobbies",
            "2",
        ]);
        let mut settings = LobbySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.server.max_lobbies, 2);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_port_is_rejected() {
        assert!(Cli::try_parse_from(["lobby", "--port", "70000"]).is_err());
    }

    #[test]
    fn load_reads_settings_file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9100, "maxLobbies": 5}}"#).unwrap();

        let cli = Cli::parse_from(["lobby", "--settings", path.to_str().unwrap(), "--max-lobbies", "7"]);
        let settings = load(&cli).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.max_lobbies, 7);
    }

    #[test]
    fn missing_settings_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let cli = Cli::parse_from(["lobby", "--settings", path.to_str().unwrap()]);
        let settings = load(&cli).unwrap();
        assert_eq!(settings.server.max_lobbies, 64);
    }
}
