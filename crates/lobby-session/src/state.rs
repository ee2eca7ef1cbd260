//! Slot/spectator state machine.
//!
//! An identity is in at most one place at a time: one slot, or the
//! spectator list, or nowhere.

use lobby_core::Identity;
use serde::{Deserialize, Serialize};

/// Number of player slots.
pub const SLOT_COUNT: usize = 4;

/// What an operation did to the state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The state was mutated.
    Changed,
    /// Requested slot is outside `0..SLOT_COUNT`.
    SlotOutOfRange,
    /// Requested slot is held by someone else.
    SlotTaken,
    /// The identity is already where it asked to be.
    AlreadyThere,
    /// The identity was in no slot and not spectating.
    NotPresent,
}

impl Outcome {
    /// Whether the state was mutated.
    pub fn changed(self) -> bool {
        self == Self::Changed
    }
}

/// Four ordered player slots, a spectator list, and a revision that bumps
/// on every mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    players: [Option<Identity>; SLOT_COUNT],
    spectators: Vec<Identity>,
    revision: u64,
}

impl SessionState {
    /// Empty lobby.
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot occupants, in order.
    pub fn players(&self) -> &[Option<Identity>; SLOT_COUNT] {
        &self.players
    }

    /// Spectators, in join order.
    pub fn spectators(&self) -> &[Identity] {
        &self.spectators
    }

    /// Number of mutations applied so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Slot held by `user`, if any.
    pub fn slot_of(&self, user: &Identity) -> Option<usize> {
        self.players
            .iter()
            .position(|p| p.as_ref().is_some_and(|p| p.is(user)))
    }

    /// Whether `user` is spectating.
    pub fn is_spectator(&self, user: &Identity) -> bool {
        self.spectators.iter().any(|s| s.is(user))
    }

    /// Seat `user` in `slot`, moving them out of any other slot or the
    /// spectator list.
    ///
    /// No-op if `slot` is out of range or held by a different identity.
    /// Re-joining one's own slot only refreshes the stored display name.
    pub fn join_slot(&mut self, user: Identity, slot: i64) -> Outcome {
        let Some(slot) = usize::try_from(slot).ok().filter(|s| *s < SLOT_COUNT) else {
            return Outcome::SlotOutOfRange;
        };

        if let Some(holder) = &self.players[slot] {
            if !holder.is(&user) {
                return Outcome::SlotTaken;
            }
            if holder.username == user.username {
                return Outcome::AlreadyThere;
            }
            self.players[slot] = Some(user);
            return self.bump();
        }

        if let Some(previous) = self.slot_of(&user) {
            self.players[previous] = None;
        } else {
            self.spectators.retain(|s| !s.is(&user));
        }
        self.players[slot] = Some(user);
        self.bump()
    }

    /// Move `user` to the spectator list, vacating their slot if they hold
    /// one.
    pub fn join_spectator(&mut self, user: Identity) -> Outcome {
        let vacated = match self.slot_of(&user) {
            Some(slot) => {
                self.players[slot] = None;
                true
            }
            None => false,
        };
        if self.is_spectator(&user) {
            return if vacated { self.bump() } else { Outcome::AlreadyThere };
        }
        self.spectators.push(user);
        self.bump()
    }

    /// Remove `user` from their slot, or failing that from the spectator
    /// list.
    pub fn leave(&mut self, user: &Identity) -> Outcome {
        if let Some(slot) = self.slot_of(user) {
            self.players[slot] = None;
            return self.bump();
        }
        let before = self.spectators.len();
        self.spectators.retain(|s| !s.is(user));
        if self.spectators.len() == before {
            return Outcome::NotPresent;
        }
        self.bump()
    }

    fn bump(&mut self) -> Outcome {
        self.revision += 1;
        Outcome::Changed
    }
}
