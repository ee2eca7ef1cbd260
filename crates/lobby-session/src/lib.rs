//! # lobby-session
//!
//! Message processors plugged into a [`lobby_hub::ConnectionHub`]:
//!
//! - [`lobby::LobbySession`]: four ordered player slots plus spectators,
//!   driven by `join_slot` / `join_spectator` / `leave` messages
//! - [`stats::StatsFeed`]: request statistics broadcast on an adjustable
//!   interval, read from a pluggable [`stats::StatsSource`]
//!
//! ## Crate Position
//!
//! Depends on: lobby-core, lobby-hub.
//! Depended on by: lobby-server.

#![deny(unsafe_code)]

pub mod lobby;
pub mod metrics;
pub mod state;
pub mod stats;

pub use lobby::{LobbyMessage, LobbySession};
pub use state::{Outcome, SLOT_COUNT, SessionState};
pub use stats::{PathStatistics, RequestStatistics, StatsError, StatsFeed, StatsSource};
