//! Metric names recorded by hubs and connections.

/// Running hub event loops (gauge).
pub const HUBS_ACTIVE: &str = "lobby_hubs_active";
/// Peers registered across all hubs (gauge).
pub const HUB_PEERS: &str = "lobby_hub_peers";
/// Peers replaced by a newer registration under the same id (counter).
pub const HUB_REPLACEMENTS_TOTAL: &str = "lobby_hub_replacements_total";
/// Peers evicted for a full or closed queue (counter).
pub const HUB_EVICTIONS_TOTAL: &str = "lobby_hub_evictions_total";
/// Connections opened (counter).
pub const CONNECTIONS_TOTAL: &str = "lobby_connections_total";
/// Open connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "lobby_connections_active";
/// Connections closed (counter, labels: reason).
pub const DISCONNECTIONS_TOTAL: &str = "lobby_disconnections_total";
/// Connection lifetime in seconds (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "lobby_connection_duration_seconds";
