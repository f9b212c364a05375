use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Opaque identifier of the party submitting a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor(String);

impl Actor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Actor {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for Actor {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Blacklist and one-time admission records.
#[derive(Clone, Debug, Default)]
pub struct FraudState {
    blacklist: HashSet<Actor>,
    rate_limited: HashSet<Actor>,
}

/// Screens actors before any cryptographic work is done.
///
/// Admission is strictly one-shot: the first `admit` for an actor succeeds
/// and every later call for the same actor is refused. There is no way to
/// reset an actor.
#[derive(Debug, Default)]
pub struct FraudGuard {
    state: Mutex<FraudState>,
}

impl FraudGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_blacklist(&self, actor: &Actor) -> bool {
        self.state.lock().blacklist.contains(actor)
    }

    pub fn add_to_blacklist(&self, actor: Actor) {
        self.state.lock().blacklist.insert(actor);
    }

    /// Check-and-mark under a single lock so two concurrent requests for
    /// the same actor cannot both be admitted.
    pub fn admit(&self, actor: &Actor) -> bool {
        let mut state = self.state.lock();
        if state.rate_limited.contains(actor) {
            return false;
        }
        state.rate_limited.insert(actor.clone());
        true
    }
}

impl From<FraudState> for FraudGuard {
    fn from(state: FraudState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl FraudState {
    /// Seed a state with a known blacklist.
    pub fn with_blacklist<I>(actors: I) -> Self
    where
        I: IntoIterator<Item = Actor>,
    {
        Self {
            blacklist: actors.into_iter().collect(),
            rate_limited: HashSet::new(),
        }
    }
}
