//! Metric names recorded by the lobby processor.

/// Lobby messages handled (counter, labels: action).
pub const MESSAGES_TOTAL: &str = "lobby_messages_total";
/// Lobby messages dropped as undecodable (counter).
pub const MESSAGES_MALFORMED_TOTAL: &str = "lobby_messages_malformed_total";
/// Lobby messages acting for another user (counter).
pub const IDENTITY_MISMATCH_TOTAL: &str = "lobby_identity_mismatch_total";
