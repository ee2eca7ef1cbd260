//! Connection registry and broadcast fan-out.
//!
//! A [`ConnectionHub`] is a single tokio task that owns the registry of
//! connected [`Peer`]s. Every mutation and every delivery goes through its
//! command channel, so the registry needs no lock and a stalled peer can
//! never block the loop: delivery is `try_send` into a bounded queue, and a
//! peer whose queue is full is evicted.
//!
//! The loop runs until every [`HubHandle`] is dropped or
//! [`HubHandle::shutdown`] is called. [`WeakHubHandle`]s do not keep it alive.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use lobby_core::{ConnectionId, HubId, LobbyError, Result};
use metrics::{counter, gauge};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::{HUB_EVICTIONS_TOTAL, HUB_PEERS, HUB_REPLACEMENTS_TOTAL, HUBS_ACTIVE};
use crate::processor::MessageProcessor;

static NEXT_PEER_KEY: AtomicU64 = AtomicU64::new(1);

/// The hub-side half of a connection: its id and the sending end of its
/// bounded outbound queue.
///
/// Dropping the `Peer` closes the queue, which tells the connection's
/// outbound loop to send a close frame and exit.
#[derive(Debug)]
pub struct Peer {
    id: ConnectionId,
    key: u64,
    tx: mpsc::Sender<Bytes>,
}

impl Peer {
    /// Create a peer and the receiving end of its outbound queue.
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let key = NEXT_PEER_KEY.fetch_add(1, Ordering::Relaxed);
        (Self { id, key, tx }, rx)
    }

    /// Registry key.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Unique per-connection key, distinguishing two connections that share
    /// an id.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Enqueue a payload without waiting.
    ///
    /// Returns `false` if the queue is full or closed.
    pub fn send(&self, payload: Bytes) -> bool {
        self.tx.try_send(payload).is_ok()
    }
}

enum Command {
    Register(Peer),
    Unregister {
        id: ConnectionId,
        key: u64,
        reply: oneshot::Sender<bool>,
    },
    Broadcast(Bytes),
    Shutdown,
}

struct Shared {
    id: HubId,
    processor: Box<dyn MessageProcessor>,
    members: AtomicUsize,
}

/// Owning handle to a running hub.
///
/// Cloning is cheap. The hub's loop exits once the last clone is dropped.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for HubHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubHandle")
            .field("id", &self.shared.id)
            .field("members", &self.member_count())
            .finish_non_exhaustive()
    }
}

impl HubHandle {
    /// Hub id, for logs.
    pub fn id(&self) -> HubId {
        self.shared.id
    }

    /// The processor this hub was built with.
    pub fn processor(&self) -> &dyn MessageProcessor {
        self.shared.processor.as_ref()
    }

    /// Hand a peer to the hub.
    ///
    /// The member count is bumped before the hand-off, so an owner that
    /// checks [`member_count`](Self::member_count) under its own lock never
    /// mistakes a hub with a pending registration for an idle one.
    pub fn register(&self, peer: Peer) -> Result<()> {
        let _ = self.shared.members.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Command::Register(peer)).is_err() {
            let _ = self.shared.members.fetch_sub(1, Ordering::SeqCst);
            return Err(LobbyError::HubClosed(self.shared.id.to_string()));
        }
        Ok(())
    }

    /// Remove the peer registered under `id` with `key`, if it is still
    /// there, and close its queue.
    ///
    /// Resolves to `true` when this call observed the hub becoming empty.
    /// That happens at most once per transition to empty, and never once the
    /// hub has stopped.
    pub async fn unregister(&self, id: &ConnectionId, key: u64) -> bool {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Unregister {
            id: id.clone(),
            key,
            reply,
        };
        if self.tx.send(cmd).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Queue a payload for every registered peer.
    pub fn broadcast(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.tx
            .send(Command::Broadcast(payload.into()))
            .map_err(|_| LobbyError::HubClosed(self.shared.id.to_string()))
    }

    /// Stop the hub: every queue is closed and the loop exits.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    /// Registered peers plus registrations still in flight.
    pub fn member_count(&self) -> usize {
        self.shared.members.load(Ordering::SeqCst)
    }

    /// Whether the hub's loop has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Non-owning handle for broadcasting.
    pub fn downgrade(&self) -> WeakHubHandle {
        WeakHubHandle {
            tx: self.tx.downgrade(),
            id: self.shared.id,
        }
    }
}

/// Broadcast-only handle that does not keep the hub alive.
#[derive(Clone, Debug)]
pub struct WeakHubHandle {
    tx: mpsc::WeakUnboundedSender<Command>,
    id: HubId,
}

impl WeakHubHandle {
    /// Id of the hub this handle points at.
    pub fn id(&self) -> HubId {
        self.id
    }

    /// Queue a payload for every registered peer.
    ///
    /// Returns `false` if the hub is gone.
    pub fn broadcast(&self, payload: impl Into<Bytes>) -> bool {
        self.tx
            .upgrade()
            .is_some_and(|tx| tx.send(Command::Broadcast(payload.into())).is_ok())
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register(peer) => write!(f, "Register({})", peer.id),
            Self::Unregister { id, key, .. } => write!(f, "Unregister({id}, {key})"),
            Self::Broadcast(payload) => write!(f, "Broadcast({} bytes)", payload.len()),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// The hub's event loop state.
pub struct ConnectionHub {
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<Command>,
    peers: HashMap<ConnectionId, Peer>,
    empty_announced: bool,
}

impl ConnectionHub {
    /// Spawn a hub around `processor`.
    pub fn spawn<P: MessageProcessor>(processor: P) -> (HubHandle, JoinHandle<()>) {
        Self::spawn_with(|_| processor)
    }

    /// Spawn a hub whose processor needs a handle back to it.
    ///
    /// `build` receives a [`WeakHubHandle`], so the processor can broadcast
    /// on its own schedule without keeping the hub alive.
    pub fn spawn_with<P, F>(build: F) -> (HubHandle, JoinHandle<()>)
    where
        P: MessageProcessor,
        F: FnOnce(WeakHubHandle) -> P,
    {
        let id = HubId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let processor = build(WeakHubHandle {
            tx: tx.downgrade(),
            id,
        });
        let shared = Arc::new(Shared {
            id,
            processor: Box::new(processor),
            members: AtomicUsize::new(0),
        });
        let hub = Self {
            shared: Arc::clone(&shared),
            rx,
            peers: HashMap::new(),
            empty_announced: false,
        };
        info!(hub_id = %id, "hub created");
        let task = tokio::spawn(hub.run());
        (HubHandle { tx, shared }, task)
    }

    async fn run(mut self) {
        let hub_id = self.shared.id;
        gauge!(HUBS_ACTIVE).increment(1.0);

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Register(peer) => self.register(peer),
                Command::Unregister { id, key, reply } => {
                    let emptied = self.unregister(&id, key);
                    let _ = reply.send(emptied);
                }
                Command::Broadcast(payload) => self.broadcast(&payload),
                Command::Shutdown => {
                    debug!(%hub_id, "shutdown requested");
                    break;
                }
            }
        }

        let ids: Vec<ConnectionId> = self.peers.keys().cloned().collect();
        for id in ids {
            let _ = self.remove(&id);
        }
        self.shared.members.store(0, Ordering::SeqCst);
        self.rx.close();
        gauge!(HUBS_ACTIVE).decrement(1.0);
        self.shared.processor.closed();
        info!(%hub_id, "hub stopped");
    }

    fn register(&mut self, peer: Peer) {
        let hub_id = self.shared.id;
        let id = peer.id.clone();
        self.empty_announced = false;

        match self.peers.insert(id.clone(), peer) {
            Some(replaced) => {
                // `replaced` drops here, closing its queue
                let _ = self.shared.members.fetch_sub(1, Ordering::SeqCst);
                counter!(HUB_REPLACEMENTS_TOTAL).increment(1);
                warn!(%hub_id, conn_id = %id, replaced_key = replaced.key, "connection id re-registered, replacing");
            }
            None => {
                gauge!(HUB_PEERS).increment(1.0);
                debug!(%hub_id, conn_id = %id, "peer registered");
            }
        }

        if let Some(peer) = self.peers.get(&id) {
            self.shared.processor.update(peer);
        }
    }

    fn unregister(&mut self, id: &ConnectionId, key: u64) -> bool {
        if self.peers.get(id).is_some_and(|p| p.key == key) {
            let _ = self.remove(id);
            debug!(hub_id = %self.shared.id, conn_id = %id, "peer unregistered");
        }
        if self.shared.members.load(Ordering::SeqCst) == 0 && !self.empty_announced {
            self.empty_announced = true;
            return true;
        }
        false
    }

    fn broadcast(&mut self, payload: &Bytes) {
        let hub_id = self.shared.id;
        let mut evicted = Vec::new();
        for (id, peer) in &self.peers {
            match peer.tx.try_send(payload.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(%hub_id, conn_id = %id, "outbound queue full, evicting slow peer");
                    evicted.push(id.clone());
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%hub_id, conn_id = %id, "outbound queue closed, evicting");
                    evicted.push(id.clone());
                }
            }
        }
        debug!(%hub_id, delivered = self.peers.len() - evicted.len(), bytes = payload.len(), "broadcast");
        for id in evicted {
            let _ = self.remove(&id);
            counter!(HUB_EVICTIONS_TOTAL).increment(1);
        }
    }

    fn remove(&mut self, id: &ConnectionId) -> Option<Peer> {
        let peer = self.peers.remove(id)?;
        let _ = self.shared.members.fetch_sub(1, Ordering::SeqCst);
        gauge!(HUB_PEERS).decrement(1.0);
        Some(peer)
    }
}
