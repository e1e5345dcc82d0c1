//! Auth-session state and its event transition.
//!
//! SYSTEM CONTEXT
//! ==============
//! `AuthState` is the value the session store publishes to every reader
//! (route guard, UI). It is only written by the store.
//!
//! INVARIANTS
//! ==========
//! A cached profile always belongs to the cached identity: switching or
//! clearing the identity drops the profile in the same write, and a profile
//! whose id does not match the current identity is never stored.

use serde::Serialize;
use uuid::Uuid;

use crate::types::{AuthEvent, Identity, Profile};

/// Current identity, its cached profile, and whether initialization is running.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuthState {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    /// True from construction until the first session restore completes.
    pub loading: bool,
}

impl AuthState {
    #[must_use]
    pub fn new() -> Self {
        Self { identity: None, profile: None, loading: true }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        self.identity.as_ref().map(|identity| identity.id)
    }

    /// Replace the identity. The profile survives only if the id is unchanged.
    pub fn set_identity(&mut self, identity: Option<Identity>) {
        let same_user = match (&self.identity, &identity) {
            (Some(current), Some(next)) => current.id == next.id,
            _ => false,
        };
        if !same_user {
            self.profile = None;
        }
        self.identity = identity;
    }

    /// Store `profile` if it belongs to the current identity. Returns whether it was stored.
    pub fn set_profile(&mut self, profile: Profile) -> bool {
        if self.user_id() != Some(profile.id) {
            return false;
        }
        self.profile = Some(profile);
        true
    }

    /// Drop identity and profile.
    pub fn clear(&mut self) {
        self.identity = None;
        self.profile = None;
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// EVENT TRANSITION
// =============================================================================

/// Follow-up the store must perform after applying an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileAction {
    /// Fetch and cache the profile for this identity id.
    Fetch(Uuid),
    /// Profile was cleared with the identity; nothing to fetch.
    Clear,
}

/// Outcome of applying an [`AuthEvent`] to an [`AuthState`].
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub state: AuthState,
    pub profile: ProfileAction,
}

/// Pure state transition for a backend identity-change event.
///
/// The identity becomes the event session's principal (or none). A signed-in
/// result asks for a profile fetch; a signed-out result has its profile cleared.
/// The loading flag is left as-is.
#[must_use]
pub fn apply_event(state: &AuthState, event: &AuthEvent) -> Transition {
    let mut next = state.clone();
    next.set_identity(event.session.as_ref().map(|session| session.user.clone()));

    let profile = match next.user_id() {
        Some(id) => ProfileAction::Fetch(id),
        None => {
            next.profile = None;
            ProfileAction::Clear
        }
    };

    Transition { state: next, profile }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
