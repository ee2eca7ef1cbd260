//! The lobby processor: decodes client messages, applies them to a
//! [`SessionState`] and rebroadcasts the full state.

use bytes::Bytes;
use lobby_core::{ConnectionId, Identity, LobbyId, Result};
use lobby_hub::{HubHandle, MessageProcessor, Peer};
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::metrics::{IDENTITY_MISMATCH_TOTAL, MESSAGES_MALFORMED_TOTAL, MESSAGES_TOTAL};
use crate::state::{Outcome, SessionState};

/// Inbound lobby message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LobbyMessage {
    /// `join_slot` (or `join_player`), `join_spectator` or `leave`.
    pub action: String,
    /// Target slot for `join_slot`; absent means slot 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<i64>,
    /// Identity the message acts for.
    pub user: Identity,
}

impl LobbyMessage {
    /// Decode a client payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Lobby state guarded by a mutex, exposed to a hub as a processor.
///
/// Every well-formed message, including no-ops and unknown actions, ends in
/// a broadcast of the full state. Mutation, encoding and the hand-off to the
/// hub all happen under the lock, so peers see states in revision order.
pub struct LobbySession {
    lobby_id: LobbyId,
    state: Mutex<SessionState>,
}

impl LobbySession {
    /// Empty lobby.
    pub fn new(lobby_id: LobbyId) -> Self {
        Self {
            lobby_id,
            state: Mutex::new(SessionState::new()),
        }
    }

    /// Lobby this session belongs to.
    pub fn lobby_id(&self) -> &LobbyId {
        &self.lobby_id
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.state.lock().clone()
    }

    /// Apply one decoded message and broadcast the resulting state.
    fn apply(&self, msg: LobbyMessage, hub: &HubHandle) {
        let mut state = self.state.lock();
        let outcome = match msg.action.as_str() {
            "join_slot" | "join_player" => Some(state.join_slot(msg.user, msg.slot.unwrap_or(0))),
            "join_spectator" => Some(state.join_spectator(msg.user)),
            "leave" => Some(state.leave(&msg.user)),
            other => {
                warn!(lobby_id = %self.lobby_id, action = other, "unknown lobby action");
                None
            }
        };
        match outcome {
            Some(Outcome::Changed) => {
                debug!(lobby_id = %self.lobby_id, revision = state.revision(), "lobby state changed");
            }
            Some(outcome) => {
                debug!(lobby_id = %self.lobby_id, ?outcome, action = %msg.action, "lobby message was a no-op");
            }
            None => {}
        }
        match serde_json::to_vec(&*state) {
            Ok(encoded) => {
                if let Err(err) = hub.broadcast(encoded) {
                    debug!(lobby_id = %self.lobby_id, error = %err, "state not broadcast");
                }
            }
            Err(err) => error!(lobby_id = %self.lobby_id, error = %err, "failed to encode lobby state"),
        }
    }
}

impl MessageProcessor for LobbySession {
    fn handle_message(&self, sender: &ConnectionId, payload: &[u8], hub: &HubHandle) {
        let msg = match LobbyMessage::decode(payload) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(lobby_id = %self.lobby_id, conn_id = %sender, error = %err, "dropping malformed lobby message");
                counter!(MESSAGES_MALFORMED_TOTAL).increment(1);
                return;
            }
        };
        counter!(MESSAGES_TOTAL, "action" => action_label(&msg.action)).increment(1);

        if msg.user.id != sender.as_str() {
            // accepted anyway; callers own authorization
            warn!(
                lobby_id = %self.lobby_id,
                conn_id = %sender,
                claimed = %msg.user.id,
                "message acts for a different user"
            );
            counter!(IDENTITY_MISMATCH_TOTAL).increment(1);
        }

        self.apply(msg, hub);
    }

    fn update(&self, peer: &Peer) {
        let encoded = serde_json::to_vec(&*self.state.lock());
        match encoded {
            Ok(encoded) => {
                if !peer.send(Bytes::from(encoded)) {
                    debug!(lobby_id = %self.lobby_id, conn_id = %peer.id(), "snapshot not queued");
                }
            }
            Err(err) => error!(lobby_id = %self.lobby_id, error = %err, "failed to encode lobby state"),
        }
    }

    fn closed(&self) {
        info!(lobby_id = %self.lobby_id, "lobby closed");
    }
}

fn action_label(action: &str) -> &'static str {
    match action {
        "join_slot" | "join_player" => "join_slot",
        "join_spectator" => "join_spectator",
        "leave" => "leave",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use lobby_core::LobbyError;
    use lobby_hub::ConnectionHub;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn msg(action: &str, slot: Option<i64>, user: &str) -> Vec<u8> {
        let mut v = json!({"action": action, "user": {"id": user, "username": user}});
        if let Some(slot) = slot {
            v["slot"] = json!(slot);
        }
        serde_json::to_vec(&v).unwrap()
    }

    async fn recv_json(rx: &mut mpsc::Receiver<Bytes>) -> Value {
        serde_json::from_slice(&rx.recv().await.unwrap()).unwrap()
    }

    fn spawn_lobby() -> (Arc<LobbySession>, HubHandle) {
        let session = Arc::new(LobbySession::new(LobbyId::from("l1")));
        let (hub, _task) = ConnectionHub::spawn(Arc::clone(&session));
        (session, hub)
    }

    fn join(hub: &HubHandle, id: &str) -> mpsc::Receiver<Bytes> {
        let (peer, rx) = Peer::channel(ConnectionId::from(id), 16);
        hub.register(peer).unwrap();
        rx
    }

    #[tokio::test]
    async fn scenario_two_connections() {
        let (session, hub) = spawn_lobby();
        let a = ConnectionId::from("A");
        let b = ConnectionId::from("B");
        let mut rx_a = join(&hub, "A");
        let mut rx_b = join(&hub, "B");
        assert_eq!(recv_json(&mut rx_a).await["revision"], 0);
        assert_eq!(recv_json(&mut rx_b).await["revision"], 0);

        session.handle_message(&a, &msg("join_slot", Some(0), "U1"), &hub);
        for rx in [&mut rx_a, &mut rx_b] {
            let state = recv_json(rx).await;
            assert_eq!(state["players"][0]["id"], "U1");
        }

        session.handle_message(&a, &msg("join_slot", Some(1), "U1"), &hub);
        let state = recv_json(&mut rx_b).await;
        assert_eq!(state["players"][0], Value::Null);
        assert_eq!(state["players"][1]["id"], "U1");
        let _ = recv_json(&mut rx_a).await;

        // B acting for U1 is accepted
        session.handle_message(&b, &msg("leave", None, "U1"), &hub);
        let state = recv_json(&mut rx_a).await;
        assert_eq!(state["players"], json!([null, null, null, null]));
        assert_eq!(state["revision"], 3);
        assert_eq!(session.snapshot().revision(), 3);
    }

    #[tokio::test]
    async fn noop_and_unknown_actions_still_broadcast() {
        let (session, hub) = spawn_lobby();
        let u = ConnectionId::from("U1");
        let mut rx = join(&hub, "U1");
        let initial = rx.recv().await.unwrap();

        session.handle_message(&u, &msg("join_slot", Some(7), "U1"), &hub);
        assert_eq!(rx.recv().await.unwrap(), initial);

        session.handle_message(&u, &msg("dance", None, "U1"), &hub);
        assert_eq!(rx.recv().await.unwrap(), initial);
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let (session, hub) = spawn_lobby();
        let u = ConnectionId::from("U1");
        let mut rx = join(&hub, "U1");
        let _ = rx.recv().await.unwrap();

        session.handle_message(&u, b"{not json", &hub);
        session.handle_message(&u, br#"{"action":"leave"}"#, &hub);
        session.handle_message(&u, &msg("join_spectator", None, "U1"), &hub);

        let state = recv_json(&mut rx).await;
        assert_eq!(state["spectators"][0]["id"], "U1");
        assert_eq!(state["revision"], 1);
    }

    #[tokio::test]
    async fn join_player_alias_and_default_slot() {
        let (session, hub) = spawn_lobby();
        let u = ConnectionId::from("U1");
        let mut rx = join(&hub, "U1");
        let _ = rx.recv().await.unwrap();

        session.handle_message(&u, &msg("join_player", None, "U1"), &hub);
        let state = recv_json(&mut rx).await;
        assert_eq!(state["players"][0]["id"], "U1");
    }

    #[tokio::test]
    async fn late_joiner_gets_current_state() {
        let (session, hub) = spawn_lobby();
        session.handle_message(&ConnectionId::from("U1"), &msg("join_slot", Some(2), "U1"), &hub);
        let mut rx = join(&hub, "U2");
        let state = recv_json(&mut rx).await;
        assert_eq!(state["players"][2]["id"], "U1");
    }

    #[test]
    fn decode_reports_malformed_payloads() {
        assert_matches!(LobbyMessage::decode(b"{not json"), Err(LobbyError::Malformed(_)));
        assert_matches!(LobbyMessage::decode(br#"{"action":"leave"}"#), Err(LobbyError::Malformed(_)));
        let m = LobbyMessage::decode(&msg("leave", None, "U1")).unwrap();
        assert_eq!(m.user.id, "U1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_senders_deliver_revisions_in_order() {
        const SENDERS: usize = 4;
        const ROUNDS: usize = 500;

        let (session, hub) = spawn_lobby();
        let (peer, mut rx) = Peer::channel(ConnectionId::from("observer"), SENDERS * ROUNDS * 2 + 8);
        hub.register(peer).unwrap();
        assert_eq!(recv_json(&mut rx).await["revision"], 0);

        let workers: Vec<_> = (0..SENDERS)
            .map(|n| {
                let session = Arc::clone(&session);
                let hub = hub.clone();
                std::thread::spawn(move || {
                    let user = format!("U{n}");
                    let sender = ConnectionId::from(user.as_str());
                    for _ in 0..ROUNDS {
                        session.handle_message(&sender, &msg("join_spectator", None, &user), &hub);
                        session.handle_message(&sender, &msg("leave", None, &user), &hub);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let expected = (SENDERS * ROUNDS * 2) as u64;
        let mut last = 0;
        for _ in 0..expected {
            let revision = recv_json(&mut rx).await["revision"].as_u64().unwrap();
            assert!(revision > last, "revision {revision} arrived after {last}");
            last = revision;
        }
        assert_eq!(last, expected);
        assert_eq!(session.snapshot().revision(), expected);
    }

    #[test]
    fn message_slot_is_optional() {
        let m: LobbyMessage = serde_json::from_str(r#"{"action":"leave","user":{"id":"x"}}"#).unwrap();
        assert!(m.slot.is_none());
        assert_eq!(m.user.id, "x");
    }

    #[test]
    fn action_labels() {
        assert_eq!(action_label("join_player"), "join_slot");
        assert_eq!(action_label("leave"), "leave");
        assert_eq!(action_label("anything"), "unknown");
    }
}
