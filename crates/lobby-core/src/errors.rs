//! Error types shared across the lobby crates.

use thiserror::Error;

/// Errors surfaced by hub and lobby operations.
#[derive(Debug, Error)]
pub enum LobbyError {
    /// The hub's event loop has exited; no further commands are accepted.
    #[error("hub {0} is closed")]
    HubClosed(String),
    /// The server refuses to open another lobby.
    #[error("lobby limit reached ({max})")]
    LobbyLimit {
        /// Configured maximum number of lobbies.
        max: usize,
    },
    /// A payload could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Result type for lobby operations.
pub type Result<T> = std::result::Result<T, LobbyError>;
