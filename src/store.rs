//! Session store: the single writer of auth-session state.
//!
//! DESIGN
//! ======
//! `SessionStore` is a cheap-to-clone handle injected into whatever owns
//! navigation and the UI tree. State lives in a `watch` channel so any number
//! of readers see the latest write, and every write replaces the whole
//! [`AuthState`] atomically. Identity and profile writes from explicit calls
//! and from the backend's event channel are not serialized against each other;
//! last write wins, and [`AuthState`] keeps the profile consistent with the
//! identity on every write.
//!
//! LIFECYCLE
//! =========
//! `init` runs once per store: restore session, sync profile, start listening
//! for identity-change events, then clear the loading flag. Clearing the flag
//! is the one-shot completion signal route guards wait on. The listener task
//! lives until the backend closes its event channel.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{OnceCell, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{AuthApi, ProfileStore};
use crate::error::AuthError;
use crate::state::{AuthState, ProfileAction, apply_event};
use crate::types::{AuthEvent, AuthEventKind, FULL_NAME_KEY, Identity, Profile, ProfileUpdate, Session, SignUpData};

struct Inner {
    auth: Arc<dyn AuthApi>,
    profiles: Arc<dyn ProfileStore>,
    state: watch::Sender<AuthState>,
    init: OnceCell<JoinHandle<()>>,
    init_timeout: Duration,
}

/// Shared handle to the current identity, its profile, and the operations that change them.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    /// `init_timeout` bounds session restoration during [`SessionStore::init`].
    #[must_use]
    pub fn new(auth: Arc<dyn AuthApi>, profiles: Arc<dyn ProfileStore>, init_timeout: Duration) -> Self {
        let (state, _) = watch::channel(AuthState::new());
        Self { inner: Arc::new(Inner { auth, profiles, state, init: OnceCell::new(), init_timeout }) }
    }

    /// Store backed by one object implementing both backend traits.
    #[must_use]
    pub fn with_backend<B>(backend: Arc<B>, init_timeout: Duration) -> Self
    where
        B: AuthApi + ProfileStore + 'static,
    {
        Self::new(backend.clone(), backend, init_timeout)
    }

    // =========================================================================
    // PROJECTIONS
    // =========================================================================

    /// Copy of the whole state at this instant.
    #[must_use]
    pub fn snapshot(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.inner.state.borrow().identity.clone()
    }

    #[must_use]
    pub fn profile(&self) -> Option<Profile> {
        self.inner.state.borrow().profile.clone()
    }

    /// True until the first `init` run has completed.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    /// Receiver that observes every subsequent state write.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    /// Resolve once initialization has completed. Returns immediately afterwards.
    pub async fn wait_initialized(&self) {
        let mut rx = self.inner.state.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|state| !state.loading).await;
    }

    fn user_id(&self) -> Option<Uuid> {
        self.inner.state.borrow().user_id()
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// Request account creation with `display_name` as profile metadata.
    /// Local state is not touched: the backend may require confirmation first.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`AuthError`] verbatim.
    pub async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<SignUpData, AuthError> {
        let mut metadata = Map::new();
        metadata.insert(FULL_NAME_KEY.to_owned(), Value::String(display_name.to_owned()));
        self.inner.auth.sign_up(email, password, metadata).await
    }

    /// Request a credential-based session. Local state follows via the event channel.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`AuthError`] verbatim.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.inner.auth.sign_in_with_password(email, password).await
    }

    /// End the session. Identity and profile are cleared only if the backend agrees.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`AuthError`]; local state is then unchanged.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner.auth.sign_out().await?;
        self.inner.state.send_modify(AuthState::clear);
        info!("signed out");
        Ok(())
    }

    /// Fetch and cache the current identity's profile. `Ok(None)` without a
    /// backend call when nobody is signed in.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`AuthError`]; the cached profile is then unchanged.
    pub async fn fetch_profile(&self) -> Result<Option<Profile>, AuthError> {
        let Some(user_id) = self.user_id() else {
            return Ok(None);
        };
        self.sync_profile(user_id).await.map(Some)
    }

    /// Apply a partial update to the current identity's profile and cache the result.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoUser`] without a backend call when nobody is
    /// signed in, otherwise the backend's [`AuthError`].
    pub async fn update_profile(&self, fields: ProfileUpdate) -> Result<Profile, AuthError> {
        let Some(user_id) = self.user_id() else {
            return Err(AuthError::NoUser);
        };
        let profile = self.inner.profiles.update_profile(user_id, &fields).await?;
        self.cache_profile(&profile);
        Ok(profile)
    }

    /// Run the startup sequence once. Later and concurrent callers wait for
    /// that single run.
    pub async fn init(&self) {
        self.inner.init.get_or_init(|| self.run_init()).await;
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    async fn run_init(&self) -> JoinHandle<()> {
        self.inner.state.send_modify(|state| state.loading = true);
        // Subscribe before restoring so an event fired during restoration is
        // still delivered once the listener starts.
        let events = self.inner.auth.subscribe();

        let identity = self.restore_identity().await;
        self.inner.state.send_modify(|state| state.set_identity(identity));

        if self.is_authenticated() {
            if let Err(e) = self.fetch_profile().await {
                warn!(error = %e, "profile sync during init failed");
            }
        }

        let listener = spawn_listener(Arc::downgrade(&self.inner), events);

        self.inner.state.send_modify(|state| state.loading = false);
        info!(authenticated = self.is_authenticated(), "session initialized");
        listener
    }

    /// Restore the backend's current session. Failures and timeouts count as "no session".
    async fn restore_identity(&self) -> Option<Identity> {
        match tokio::time::timeout(self.inner.init_timeout, self.inner.auth.get_session()).await {
            Ok(Ok(session)) => session.map(|session| session.user),
            Ok(Err(e)) => {
                warn!(error = %e, "session restore failed");
                None
            }
            Err(_) => {
                warn!(timeout_secs = self.inner.init_timeout.as_secs(), "session restore timed out");
                None
            }
        }
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// Apply a backend identity-change event, then sync the profile.
    pub(crate) async fn handle_event(&self, event: AuthEvent) {
        let mut action = ProfileAction::Clear;
        self.inner.state.send_modify(|state| {
            let transition = apply_event(state, &event);
            *state = transition.state;
            action = transition.profile;
        });
        info!(kind = ?event.kind, user_id = ?self.user_id(), "auth state changed");

        if let ProfileAction::Fetch(user_id) = action {
            if let Err(e) = self.sync_profile(user_id).await {
                warn!(error = %e, "profile sync after auth event failed");
            }
        }
    }

    /// Re-read the backend session after missing events.
    async fn resync(&self) {
        match self.inner.auth.get_session().await {
            Ok(session) => self.handle_event(AuthEvent::new(AuthEventKind::InitialSession, session)).await,
            Err(e) => warn!(error = %e, "session resync failed"),
        }
    }

    /// Fetch the profile of `user_id` and cache it if that identity is still current.
    async fn sync_profile(&self, user_id: Uuid) -> Result<Profile, AuthError> {
        let profile = self.inner.profiles.fetch_profile(user_id).await?;
        self.cache_profile(&profile);
        Ok(profile)
    }

    /// Cache `profile` unless the identity changed while it was in flight.
    fn cache_profile(&self, profile: &Profile) {
        let stored = self.inner.state.send_if_modified(|state| state.set_profile(profile.clone()));
        if !stored {
            debug!(profile_id = %profile.id, "dropped profile for a stale identity");
        }
    }
}

fn spawn_listener(store: Weak<Inner>, mut events: broadcast::Receiver<AuthEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let received = events.recv().await;
            let Some(inner) = store.upgrade() else {
                break;
            };
            let store = SessionStore { inner };
            match received {
                Ok(event) => store.handle_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "auth event listener lagged; resyncing");
                    store.resync().await;
                }
                Err(RecvError::Closed) => {
                    info!("auth event channel closed");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
