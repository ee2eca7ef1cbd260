//! Open lobbies, keyed by lobby id.
//!
//! Joining looks up (or opens) the lobby's hub and registers the caller's
//! peer under the same lock. A lobby is dropped from the map only by the
//! on-empty callback of its own hub, and only if nobody joined in between.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use lobby_core::{ConnectionId, HubId, LobbyError, LobbyId, Result};
use lobby_hub::connection::OnEmpty;
use lobby_hub::{ConnectionHub, HubHandle, Peer};
use lobby_session::LobbySession;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::metrics::{LOBBIES_OPEN, LOBBY_LIMIT_REJECTIONS_TOTAL};
use crate::shutdown::ShutdownCoordinator;

/// A peer registered with a lobby hub, ready to be bound to a transport.
pub struct Membership {
    /// Hub the peer joined.
    pub hub: HubHandle,
    /// Registration key of the peer.
    pub key: u64,
    /// The peer's outbound queue.
    pub queue: mpsc::Receiver<Bytes>,
    /// Releases the lobby once its hub reports empty.
    pub on_empty: OnEmpty,
}

impl std::fmt::Debug for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Membership")
            .field("hub", &self.hub.id())
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Lobbies {
    open: HashMap<LobbyId, HubHandle>,
    closed: bool,
}

/// Lobby id to hub map with an upper bound on open lobbies.
pub struct LobbyRegistry {
    lobbies: Mutex<Lobbies>,
    max_lobbies: usize,
    shutdown: Arc<ShutdownCoordinator>,
}

impl LobbyRegistry {
    /// Empty registry. Hub tasks are tracked by `shutdown`.
    pub fn new(max_lobbies: usize, shutdown: Arc<ShutdownCoordinator>) -> Arc<Self> {
        Arc::new(Self {
            lobbies: Mutex::new(Lobbies::default()),
            max_lobbies,
            shutdown,
        })
    }

    /// Check whether `lobby_id` could be joined right now.
    ///
    /// Used to refuse an upgrade early; [`join`](Self::join) checks again.
    pub fn admits(&self, lobby_id: &LobbyId) -> Result<()> {
        let lobbies = self.lobbies.lock();
        if lobbies.closed {
            return Err(LobbyError::HubClosed("registry".into()));
        }
        if !lobbies.open.contains_key(lobby_id) && lobbies.open.len() >= self.max_lobbies {
            return Err(LobbyError::LobbyLimit { max: self.max_lobbies });
        }
        Ok(())
    }

    /// Register `conn_id` with the hub for `lobby_id`, opening the lobby if
    /// it does not exist.
    pub fn join(
        self: &Arc<Self>,
        lobby_id: &LobbyId,
        conn_id: &ConnectionId,
        queue_capacity: usize,
    ) -> Result<Membership> {
        let mut lobbies = self.lobbies.lock();
        if lobbies.closed {
            return Err(LobbyError::HubClosed("registry".into()));
        }

        let current = lobbies.open.get(lobby_id).filter(|hub| !hub.is_closed()).cloned();
        let hub = match current {
            Some(hub) => hub,
            None => {
                if !lobbies.open.contains_key(lobby_id) && lobbies.open.len() >= self.max_lobbies {
                    counter!(LOBBY_LIMIT_REJECTIONS_TOTAL).increment(1);
                    warn!(%lobby_id, max = self.max_lobbies, "lobby limit reached");
                    return Err(LobbyError::LobbyLimit { max: self.max_lobbies });
                }
                let (hub, task) = ConnectionHub::spawn(LobbySession::new(lobby_id.clone()));
                self.shutdown.track(task);
                let _ = lobbies.open.insert(lobby_id.clone(), hub.clone());
                record_open(lobbies.open.len());
                info!(%lobby_id, hub_id = %hub.id(), "lobby opened");
                hub
            }
        };

        let (peer, queue) = Peer::channel(conn_id.clone(), queue_capacity);
        let key = peer.key();
        hub.register(peer)?;
        drop(lobbies);

        let registry = Arc::downgrade(self);
        let hub_id = hub.id();
        let lobby = lobby_id.clone();
        let on_empty: OnEmpty = Arc::new(move || release_weak(&registry, &lobby, hub_id));
        Ok(Membership {
            hub,
            key,
            queue,
            on_empty,
        })
    }

    /// Hub currently serving `lobby_id`.
    pub fn get(&self, lobby_id: &LobbyId) -> Option<HubHandle> {
        self.lobbies.lock().open.get(lobby_id).cloned()
    }

    /// Number of open lobbies.
    pub fn len(&self) -> usize {
        self.lobbies.lock().open.len()
    }

    /// Whether no lobby is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connections registered across all open lobbies.
    pub fn connections(&self) -> usize {
        self.lobbies.lock().open.values().map(HubHandle::member_count).sum()
    }

    /// Shut down every lobby and refuse further joins.
    pub fn close_all(&self) {
        let mut lobbies = self.lobbies.lock();
        lobbies.closed = true;
        let count = lobbies.open.len();
        for (_, hub) in lobbies.open.drain() {
            hub.shutdown();
        }
        record_open(0);
        info!(count, "all lobbies closed");
    }

    fn release(&self, lobby_id: &LobbyId, hub_id: HubId) {
        let mut lobbies = self.lobbies.lock();
        let idle = lobbies
            .open
            .get(lobby_id)
            .is_some_and(|hub| hub.id() == hub_id && hub.member_count() == 0);
        if !idle {
            debug!(%lobby_id, %hub_id, "lobby repopulated or replaced, keeping it");
            return;
        }
        if let Some(hub) = lobbies.open.remove(lobby_id) {
            hub.shutdown();
        }
        record_open(lobbies.open.len());
        info!(%lobby_id, %hub_id, "lobby closed after last connection left");
    }
}

fn release_weak(registry: &Weak<LobbyRegistry>, lobby_id: &LobbyId, hub_id: HubId) {
    if let Some(registry) = registry.upgrade() {
        registry.release(lobby_id, hub_id);
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_open(count: usize) {
    gauge!(LOBBIES_OPEN).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn registry(max: usize) -> Arc<LobbyRegistry> {
        LobbyRegistry::new(max, Arc::new(ShutdownCoordinator::new()))
    }

    fn lobby(id: &str) -> LobbyId {
        LobbyId::from(id)
    }

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::from(id)
    }

    async fn wait_closed(hub: &HubHandle) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !hub.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn joins_share_one_hub_per_lobby() {
        let reg = registry(4);
        let a = reg.join(&lobby("l1"), &conn("a"), 8).unwrap();
        let b = reg.join(&lobby("l1"), &conn("b"), 8).unwrap();
        let c = reg.join(&lobby("l2"), &conn("c"), 8).unwrap();

        assert_eq!(a.hub.id(), b.hub.id());
        assert_ne!(a.hub.id(), c.hub.id());
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.connections(), 3);
    }

    #[tokio::test]
    async fn member_receives_lobby_snapshot() {
        let reg = registry(4);
        let mut m = reg.join(&lobby("l1"), &conn("a"), 8).unwrap();
        let state: serde_json::Value = serde_json::from_slice(&m.queue.recv().await.unwrap()).unwrap();
        assert_eq!(state["revision"], 0);
    }

    #[tokio::test]
    async fn limit_refuses_new_lobbies_only() {
        let reg = registry(1);
        let _a = reg.join(&lobby("l1"), &conn("a"), 8).unwrap();

        assert!(reg.admits(&lobby("l1")).is_ok());
        assert_matches!(reg.admits(&lobby("l2")), Err(LobbyError::LobbyLimit { max: 1 }));
        assert_matches!(
            reg.join(&lobby("l2"), &conn("b"), 8),
            Err(LobbyError::LobbyLimit { max: 1 })
        );
        assert!(reg.join(&lobby("l1"), &conn("b"), 8).is_ok());
    }

    #[tokio::test]
    async fn release_only_when_idle() {
        let reg = registry(4);
        let a = reg.join(&lobby("l1"), &conn("a"), 8).unwrap();

        (a.on_empty)();
        assert_eq!(reg.len(), 1, "still has a member");

        assert!(a.hub.unregister(&conn("a"), a.key).await);
        (a.on_empty)();
        assert!(reg.is_empty());
        wait_closed(&a.hub).await;
    }

    #[tokio::test]
    async fn stale_release_keeps_replacement_lobby() {
        let reg = registry(4);
        let a = reg.join(&lobby("l1"), &conn("a"), 8).unwrap();
        assert!(a.hub.unregister(&conn("a"), a.key).await);
        (a.on_empty)();
        assert!(reg.is_empty());

        let b = reg.join(&lobby("l1"), &conn("b"), 8).unwrap();
        assert_ne!(a.hub.id(), b.hub.id());
        assert!(b.hub.unregister(&conn("b"), b.key).await);

        // the first hub's callback must not touch the second hub
        (a.on_empty)();
        assert_eq!(reg.get(&lobby("l1")).map(|h| h.id()), Some(b.hub.id()));
    }

    #[tokio::test]
    async fn close_all_shuts_hubs_and_refuses_joins() {
        let reg = registry(4);
        let mut a = reg.join(&lobby("l1"), &conn("a"), 8).unwrap();
        let _ = a.queue.recv().await;

        reg.close_all();
        assert!(reg.is_empty());
        assert!(a.queue.recv().await.is_none(), "queue closed by shutdown");
        assert_matches!(reg.join(&lobby("l1"), &conn("b"), 8), Err(LobbyError::HubClosed(_)));
        assert_matches!(reg.admits(&lobby("l1")), Err(LobbyError::HubClosed(_)));
    }

    #[tokio::test]
    async fn hub_tasks_are_tracked_for_shutdown() {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let reg = LobbyRegistry::new(4, Arc::clone(&shutdown));
        let _a = reg.join(&lobby("l1"), &conn("a"), 8).unwrap();
        assert_eq!(shutdown.pending(), 1);

        reg.close_all();
        assert!(shutdown.graceful_shutdown(Some(Duration::from_secs(1))).await);
    }
}
