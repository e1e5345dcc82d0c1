//! Backend collaborator contract.
//!
//! ARCHITECTURE
//! ============
//! The session store talks to the identity/data service only through these
//! two traits: `AuthApi` for credential and session operations plus the
//! identity-change event channel, and `ProfileStore` for the `profiles`
//! record table. `HttpBackend` implements both against a hosted service;
//! `MemoryBackend` implements both in-process for tests and local runs.

pub mod http;
pub mod memory;

pub use http::HttpBackend;
pub use memory::{MemoryBackend, Operation};

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::AuthError;
use crate::types::{AuthEvent, Profile, ProfileUpdate, Session, SignUpData};

/// Buffered identity-change events per subscriber before it starts lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Credential and session operations, plus the push channel for identity changes.
#[async_trait::async_trait]
pub trait AuthApi: Send + Sync {
    /// Create a session from email and password.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the credentials are rejected or the backend is unreachable.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    /// Create an account, attaching `metadata` to the new identity.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the account cannot be created.
    async fn sign_up(&self, email: &str, password: &str, metadata: Map<String, Value>)
    -> Result<SignUpData, AuthError>;

    /// End the current session.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the backend refuses to end the session.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Currently valid session, if any (e.g. restored from persisted storage).
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if persisted state cannot be read or refreshed.
    async fn get_session(&self) -> Result<Option<Session>, AuthError>;

    /// Subscribe to identity-change events. Each receiver sees every event
    /// sent after it was created.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Record storage for the `profiles` table.
#[async_trait::async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the single profile row whose id equals `id`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ProfileNotFound`] unless exactly one row matches,
    /// or another [`AuthError`] on backend failure.
    async fn fetch_profile(&self, id: Uuid) -> Result<Profile, AuthError>;

    /// Apply a partial update to the profile row `id` and return the updated row.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the row is missing or the backend rejects the update.
    async fn update_profile(&self, id: Uuid, fields: &ProfileUpdate) -> Result<Profile, AuthError>;
}
