//! The identity a message claims to act on behalf of.

use serde::{Deserialize, Serialize};

/// A user as resolved by the outer layer.
///
/// Equality is by `id` only: the same user with a stale display name is
/// still the same occupant.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user id.
    pub id: String,
    /// Display name, carried through to clients untouched.
    #[serde(default)]
    pub username: String,
}

impl Identity {
    /// Build an identity from id and display name.
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }

    /// Whether `other` refers to the same user.
    pub fn is(&self, other: &Identity) -> bool {
        self.id == other.id
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.is(other)
    }
}

impl Eq for Identity {}
