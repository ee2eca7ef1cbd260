//! # lobby-server
//!
//! Axum HTTP + `WebSocket` front end for the lobby hubs.
//!
//! - `GET /ws/lobby/{user_id}/{lobby_id}`: join (or open) a lobby
//! - `GET /ws/stats/{user_id}`: live request statistics
//! - `GET /health`, `GET /metrics`: liveness and Prometheus text
//! - [`registry::LobbyRegistry`] opens a hub per lobby and closes it once
//!   the last connection leaves
//! - [`request_log::RequestLog`] records every HTTP request for the
//!   statistics feed
//! - Graceful shutdown via [`shutdown::ShutdownCoordinator`]
//!
//! ## Crate Position
//!
//! Depends on: lobby-core, lobby-settings, lobby-hub, lobby-session.
//! Depended on by: lobby (binary).

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod request_log;
pub mod server;
pub mod shutdown;
pub mod socket;

pub use config::ServerConfig;
pub use server::LobbyServer;
