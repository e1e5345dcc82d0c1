//! In-process backend for tests and offline runs.
//!
//! DESIGN
//! ======
//! Accounts, profile rows, and the current session live behind a mutex.
//! Every trait call is counted per [`Operation`] so callers can assert that
//! an operation did or did not reach the backend, and any operation can be
//! made to fail until recovered. [`MemoryBackend::push`] delivers an
//! identity-change event as if the backend had initiated it (token refresh,
//! sign-out in another tab).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use super::{AuthApi, EVENT_CHANNEL_CAPACITY, ProfileStore};
use crate::error::AuthError;
use crate::types::{
    AuthEvent, FULL_NAME_KEY, Identity, Profile, ProfileUpdate, Session, SignUpData, now_rfc3339, now_unix,
};

const SESSION_TTL_SECS: i64 = 3600;
const INJECTED_FAILURE_STATUS: u16 = 503;

/// Backend operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SignIn,
    SignUp,
    SignOut,
    GetSession,
    FetchProfile,
    UpdateProfile,
}

const OPERATION_COUNT: usize = 6;

impl Operation {
    fn index(self) -> usize {
        self as usize
    }
}

struct Account {
    password: String,
    identity: Identity,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    profiles: HashMap<Uuid, Profile>,
    session: Option<Session>,
    failing: HashSet<Operation>,
    auto_confirm: bool,
    get_session_delay: Option<Duration>,
}

/// In-memory implementation of [`AuthApi`] and [`ProfileStore`].
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    calls: [AtomicUsize; OPERATION_COUNT],
    events: broadcast::Sender<AuthEvent>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { state: Mutex::new(MemoryState::default()), calls: Default::default(), events }
    }

    // -------------------------------------------------------------------------
    // Seeding
    // -------------------------------------------------------------------------

    /// Register an account without a profile row.
    pub fn add_account(&self, email: &str, password: &str) -> Identity {
        let identity = Identity {
            id: Uuid::new_v4(),
            email: Some(email.to_owned()),
            user_metadata: Map::new(),
            created_at: Some(now_rfc3339()),
        };
        self.lock().accounts.insert(
            email.to_owned(),
            Account { password: password.to_owned(), identity: identity.clone() },
        );
        identity
    }

    /// Register an account and its profile row.
    pub fn add_user(&self, email: &str, password: &str, full_name: &str) -> Identity {
        let mut identity = self.add_account(email, password);
        identity.user_metadata.insert(FULL_NAME_KEY.into(), Value::String(full_name.to_owned()));
        let mut state = self.lock();
        if let Some(account) = state.accounts.get_mut(email) {
            account.identity = identity.clone();
        }
        state.profiles.insert(identity.id, profile_row(&identity));
        identity
    }

    /// Make `identity` the persisted session, as if restored from storage.
    pub fn restore_session(&self, identity: &Identity) -> Session {
        let session = new_session(identity);
        self.lock().session = Some(session.clone());
        session
    }

    /// Seed or replace a profile row directly.
    pub fn put_profile(&self, profile: Profile) {
        self.lock().profiles.insert(profile.id, profile);
    }

    // -------------------------------------------------------------------------
    // Behavior knobs
    // -------------------------------------------------------------------------

    /// Make `op` fail with a 503 until [`MemoryBackend::recover`] is called.
    pub fn fail(&self, op: Operation) {
        self.lock().failing.insert(op);
    }

    pub fn recover(&self, op: Operation) {
        self.lock().failing.remove(&op);
    }

    /// Whether sign-up immediately yields a session (no email confirmation).
    pub fn set_auto_confirm(&self, enabled: bool) {
        self.lock().auto_confirm = enabled;
    }

    /// Delay every `get_session` call, to hold initialization open.
    pub fn set_get_session_delay(&self, delay: Duration) {
        self.lock().get_session_delay = Some(delay);
    }

    /// Deliver an identity-change event to subscribers, as the backend would.
    /// The stored session follows the event.
    pub fn push(&self, event: AuthEvent) {
        self.lock().session.clone_from(&event.session);
        self.emit(event);
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Number of times `op` reached the backend.
    #[must_use]
    pub fn calls(&self, op: Operation) -> usize {
        self.calls[op.index()].load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    #[must_use]
    pub fn profile(&self, id: Uuid) -> Option<Profile> {
        self.lock().profiles.get(&id).cloned()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Count the call and return the injected failure, if any.
    fn enter(&self, op: Operation) -> Result<(), AuthError> {
        self.calls[op.index()].fetch_add(1, Ordering::SeqCst);
        if self.lock().failing.contains(&op) {
            return Err(AuthError::Api { status: INJECTED_FAILURE_STATUS, message: format!("{op:?} unavailable") });
        }
        Ok(())
    }

    fn emit(&self, event: AuthEvent) {
        debug!(kind = ?event.kind, subscribers = self.events.receiver_count(), "memory backend event");
        // No subscribers is fine: nobody is listening yet.
        let _ = self.events.send(event);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn new_session(identity: &Identity) -> Session {
    Session {
        access_token: Uuid::new_v4().to_string(),
        refresh_token: Uuid::new_v4().to_string(),
        token_type: "bearer".to_owned(),
        expires_in: Some(SESSION_TTL_SECS),
        expires_at: Some(now_unix() + SESSION_TTL_SECS),
        user: identity.clone(),
    }
}

fn profile_row(identity: &Identity) -> Profile {
    let now = now_rfc3339();
    Profile {
        id: identity.id,
        email: identity.email.clone().unwrap_or_default(),
        full_name: identity.full_name().map(str::to_owned),
        avatar_url: None,
        created_at: now.clone(),
        updated_at: now,
    }
}

#[async_trait::async_trait]
impl AuthApi for MemoryBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.enter(Operation::SignIn)?;
        let session = {
            let mut state = self.lock();
            let identity = match state.accounts.get(email) {
                Some(account) if account.password == password => account.identity.clone(),
                _ => return Err(AuthError::Api { status: 400, message: "Invalid login credentials".into() }),
            };
            let session = new_session(&identity);
            state.session = Some(session.clone());
            session
        };
        self.emit(AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
    ) -> Result<SignUpData, AuthError> {
        self.enter(Operation::SignUp)?;
        let data = {
            let mut state = self.lock();
            if state.accounts.contains_key(email) {
                return Err(AuthError::Api { status: 422, message: "User already registered".into() });
            }
            let identity = Identity {
                id: Uuid::new_v4(),
                email: Some(email.to_owned()),
                user_metadata: metadata,
                created_at: Some(now_rfc3339()),
            };
            state.accounts.insert(
                email.to_owned(),
                Account { password: password.to_owned(), identity: identity.clone() },
            );
            state.profiles.insert(identity.id, profile_row(&identity));

            let session = state.auto_confirm.then(|| new_session(&identity));
            if session.is_some() {
                state.session.clone_from(&session);
            }
            SignUpData { user: Some(identity), session }
        };
        if let Some(session) = &data.session {
            self.emit(AuthEvent::signed_in(session.clone()));
        }
        Ok(data)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.enter(Operation::SignOut)?;
        self.lock().session = None;
        self.emit(AuthEvent::signed_out());
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let delay = self.lock().get_session_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.enter(Operation::GetSession)?;
        Ok(self.lock().session.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait::async_trait]
impl ProfileStore for MemoryBackend {
    async fn fetch_profile(&self, id: Uuid) -> Result<Profile, AuthError> {
        self.enter(Operation::FetchProfile)?;
        self.lock().profiles.get(&id).cloned().ok_or(AuthError::ProfileNotFound)
    }

    async fn update_profile(&self, id: Uuid, fields: &ProfileUpdate) -> Result<Profile, AuthError> {
        self.enter(Operation::UpdateProfile)?;
        let mut state = self.lock();
        let profile = state.profiles.get_mut(&id).ok_or(AuthError::ProfileNotFound)?;
        fields.apply_to(profile);
        profile.updated_at = now_rfc3339();
        Ok(profile.clone())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
