//! The domain plug-in contract a hub calls into.

use std::sync::Arc;

use lobby_core::ConnectionId;

use crate::hub::{HubHandle, Peer};

/// Domain behaviour plugged into a [`ConnectionHub`](crate::hub::ConnectionHub).
///
/// Implementations guard their own state; the hub provides no locking.
/// None of these methods may block: `update` and `closed` run on the hub's
/// event loop, `handle_message` on the sending connection's inbound loop.
pub trait MessageProcessor: Send + Sync + 'static {
    /// Handle one inbound payload from `sender`.
    ///
    /// Typically mutates state and then calls [`HubHandle::broadcast`].
    fn handle_message(&self, sender: &ConnectionId, payload: &[u8], hub: &HubHandle);

    /// Push the current full state to a newly registered peer.
    ///
    /// Runs before the hub processes any later broadcast, so the peer sees
    /// this snapshot first.
    fn update(&self, peer: &Peer);

    /// The hub's event loop has exited.
    fn closed(&self) {}
}

impl<P: MessageProcessor> MessageProcessor for Arc<P> {
    fn handle_message(&self, sender: &ConnectionId, payload: &[u8], hub: &HubHandle) {
        (**self).handle_message(sender, payload, hub);
    }

    fn update(&self, peer: &Peer) {
        (**self).update(peer);
    }

    fn closed(&self) {
        (**self).closed();
    }
}
