//! # lobby-core
//!
//! Shared vocabulary for the lobby crates:
//!
//! - **IDs**: [`ids::ConnectionId`] and [`ids::LobbyId`] wrap externally supplied
//!   strings, [`ids::HubId`] is generated per hub for log correlation
//! - **Identity**: [`identity::Identity`], the already-resolved user a message
//!   claims to act for
//! - **Errors**: [`errors::LobbyError`] via `thiserror`
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other lobby crates.

#![deny(unsafe_code)]

pub mod errors;
pub mod identity;
pub mod ids;

pub use errors::{LobbyError, Result};
pub use identity::Identity;
pub use ids::{ConnectionId, HubId, LobbyId};
