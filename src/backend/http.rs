//! HTTP backend for a Supabase-compatible service.
//!
//! ARCHITECTURE
//! ============
//! Credential and session calls go to the auth API under `/auth/v1`; profile
//! rows go to the REST record API under `/rest/v1`. Every request carries the
//! project's anon key; record calls authenticate with the session's access
//! token when one exists.
//!
//! SESSION STORAGE
//! ===============
//! The current session is cached in memory and mirrored to a JSON file so a
//! later process can restore it. An expired session is refreshed on restore;
//! a rejected refresh discards it. Sign-in, sign-up, sign-out and background
//! refresh are broadcast on the identity-change channel; restoring is not,
//! since `get_session` returns its outcome to the caller. The session file is
//! readable by its owner only.

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::ACCEPT;
use serde_json::{Map, Value, json};
use tokio::io::AsyncWriteExt;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AuthApi, EVENT_CHANNEL_CAPACITY, ProfileStore};
use crate::config::AuthConfig;
use crate::error::{AuthError, ErrorCode};
use crate::types::{AuthEvent, AuthEventKind, Identity, Profile, ProfileUpdate, Session, SignUpData, now_unix};

const PROFILES_TABLE: &str = "profiles";
/// Asks the record API for exactly one row; zero or many rows yield 406.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
const RETURN_REPRESENTATION: &str = "return=representation";
const MESSAGE_KEYS: [&str; 4] = ["msg", "message", "error_description", "error"];

// =============================================================================
// CLIENT
// =============================================================================

pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session_file: Option<PathBuf>,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl HttpBackend {
    /// Build a backend client from typed config.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::HttpClientBuild`] if the HTTP client cannot be constructed.
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| AuthError::HttpClientBuild(e.to_string()))?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            http,
            base_url: config.backend_url.clone(),
            anon_key: config.anon_key.clone(),
            session_file: config.session_file.clone(),
            session: RwLock::new(None),
            events,
        })
    }

    /// Exchange a refresh token for a new session and make it current.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the backend rejects the token or is unreachable.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let session = self.exchange_refresh_token(refresh_token).await?;
        self.replace_session(Some(session.clone()), AuthEventKind::TokenRefreshed).await;
        Ok(session)
    }

    /// Spawn a task that refreshes the session before it expires. Checks every `every`.
    /// A rejected refresh signs out; transport failures are retried on the next tick.
    pub fn spawn_auto_refresh(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let backend = Arc::clone(self);
        let lookahead = i64::try_from(every.as_secs()).unwrap_or(i64::MAX / 2);
        info!(every_secs = every.as_secs(), "session auto-refresh configured");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let due = backend
                    .session
                    .read()
                    .await
                    .as_ref()
                    .filter(|s| s.is_expired_at(now_unix() + lookahead))
                    .map(|s| s.refresh_token.clone());
                let Some(refresh_token) = due else {
                    continue;
                };
                match backend.refresh_session(&refresh_token).await {
                    Ok(_) => {}
                    Err(e) if is_rejection(&e) => {
                        // A sign-in during the request installed a session this rejection does not concern.
                        let still_current =
                            backend.session.read().await.as_ref().is_some_and(|s| s.refresh_token == refresh_token);
                        if still_current {
                            warn!(error = %e, "session refresh rejected; signing out");
                            backend.replace_session(None, AuthEventKind::SignedOut).await;
                        }
                    }
                    Err(e) => warn!(error = %e, "session auto-refresh failed"),
                }
            }
        })
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let request = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }));
        let body = self.send(request).await?;
        parse_session(&body, now_unix())
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    /// Access token of the current session, or the anon key when signed out.
    async fn bearer(&self) -> String {
        self.session
            .read()
            .await
            .as_ref()
            .map_or_else(|| self.anon_key.clone(), |s| s.access_token.clone())
    }

    /// Send with the project key; non-2xx responses become [`AuthError::Api`].
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, AuthError> {
        let response = request
            .header("apikey", &self.anon_key)
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(request_error)?;
        debug!(status, "backend response");

        if !(200..300).contains(&status) {
            return Err(api_error(status, &body));
        }
        Ok(body)
    }

    /// Make `session` current and announce it to subscribers.
    async fn replace_session(&self, session: Option<Session>, kind: AuthEventKind) {
        self.store_session(session.clone()).await;
        // No subscribers is fine: the store may not be listening yet.
        let _ = self.events.send(AuthEvent::new(kind, session));
    }

    /// Make `session` current without an event.
    async fn store_session(&self, session: Option<Session>) {
        if let Err(e) = self.persist(session.as_ref()).await {
            warn!(error = %e, "session persistence failed");
        }
        *self.session.write().await = session;
    }

    async fn persist(&self, session: Option<&Session>) -> Result<(), AuthError> {
        let Some(path) = &self.session_file else {
            return Ok(());
        };
        match session {
            Some(session) => {
                let bytes = serde_json::to_vec_pretty(session).map_err(|e| AuthError::Session(e.to_string()))?;
                write_private(path, &bytes)
                    .await
                    .map_err(|e| AuthError::Session(e.to_string()))
            }
            None => match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(AuthError::Session(e.to_string())),
                _ => Ok(()),
            },
        }
    }

    async fn load_persisted(&self) -> Result<Option<Session>, AuthError> {
        let Some(path) = &self.session_file else {
            return Ok(None);
        };
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AuthError::Session(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AuthError::Session(e.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl AuthApi for HttpBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let request = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));
        let body = self.send(request).await?;
        let session = parse_session(&body, now_unix())?;
        info!(user_id = %session.user.id, "signed in");
        self.replace_session(Some(session.clone()), AuthEventKind::SignedIn).await;
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
    ) -> Result<SignUpData, AuthError> {
        let request = self
            .http
            .post(self.auth_url("signup"))
            .json(&json!({ "email": email, "password": password, "data": metadata }));
        let body = self.send(request).await?;
        let data = parse_sign_up(&body, now_unix())?;
        if let Some(session) = &data.session {
            self.replace_session(Some(session.clone()), AuthEventKind::SignedIn).await;
        }
        Ok(data)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let token = self.session.read().await.as_ref().map(|s| s.access_token.clone());
        if let Some(token) = token {
            let request = self.http.post(self.auth_url("logout")).bearer_auth(token);
            match self.send(request).await {
                Ok(_) => {}
                // The token is already invalid server-side; finish the local sign-out.
                Err(AuthError::Api { status: 401 | 403 | 404, message }) => {
                    debug!(%message, "logout for an already-invalid session");
                }
                Err(e) => return Err(e),
            }
        }
        self.replace_session(None, AuthEventKind::SignedOut).await;
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        let cached = self.session.read().await.clone();
        let session = match cached {
            Some(session) => Some(session),
            None => self.load_persisted().await?,
        };
        let Some(session) = session else {
            return Ok(None);
        };

        if !session.is_expired_at(now_unix()) {
            *self.session.write().await = Some(session.clone());
            return Ok(Some(session));
        }

        // The caller receives the outcome directly, so restoring is not announced.
        info!(user_id = %session.user.id, "stored session expired; refreshing");
        match self.exchange_refresh_token(&session.refresh_token).await {
            Ok(fresh) => {
                self.store_session(Some(fresh.clone())).await;
                Ok(Some(fresh))
            }
            Err(e) if is_rejection(&e) => {
                warn!(error = %e, "session refresh rejected; discarding session");
                self.store_session(None).await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait::async_trait]
impl ProfileStore for HttpBackend {
    async fn fetch_profile(&self, id: Uuid) -> Result<Profile, AuthError> {
        let request = self
            .http
            .get(self.rest_url(PROFILES_TABLE))
            .query(&[("id", format!("eq.{id}")), ("select", "*".to_owned())])
            .header(ACCEPT, SINGLE_OBJECT)
            .bearer_auth(self.bearer().await);
        let body = self.send(request).await.map_err(single_row_error)?;
        parse_profile(&body)
    }

    async fn update_profile(&self, id: Uuid, fields: &ProfileUpdate) -> Result<Profile, AuthError> {
        let request = self
            .http
            .patch(self.rest_url(PROFILES_TABLE))
            .query(&[("id", format!("eq.{id}"))])
            .header(ACCEPT, SINGLE_OBJECT)
            .header("Prefer", RETURN_REPRESENTATION)
            .bearer_auth(self.bearer().await)
            .json(fields);
        let body = self.send(request).await.map_err(single_row_error)?;
        parse_profile(&body)
    }
}

/// Write `bytes` to `path`, readable by the owner only. The file holds tokens.
async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    // `mode` only applies on create; tighten a file left by an older run.
    #[cfg(unix)]
    file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
    file.write_all(bytes).await?;
    file.flush().await
}

// =============================================================================
// RESPONSE PARSING
// =============================================================================

fn request_error(e: reqwest::Error) -> AuthError {
    if e.is_timeout() {
        AuthError::Timeout
    } else {
        AuthError::Request(e.to_string())
    }
}

fn parse_error(e: serde_json::Error) -> AuthError {
    AuthError::Parse(e.to_string())
}

/// Build an API error from a non-2xx response, preferring the body's message field.
pub(crate) fn api_error(status: u16, body: &str) -> AuthError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            MESSAGE_KEYS
                .iter()
                .find_map(|key| v.get(*key).and_then(Value::as_str).map(str::to_owned))
        })
        .unwrap_or_else(|| body.trim().to_owned());
    AuthError::Api { status, message }
}

/// The backend refused the refresh token itself, as opposed to being unavailable.
fn is_rejection(e: &AuthError) -> bool {
    matches!(e, AuthError::Api { .. }) && !e.retryable()
}

/// The single-object accept header turns "not exactly one row" into a 406.
fn single_row_error(e: AuthError) -> AuthError {
    match e {
        AuthError::Api { status: 406, .. } => AuthError::ProfileNotFound,
        other => other,
    }
}

/// Decode a session, deriving `expires_at` from `expires_in` when absent.
pub(crate) fn parse_session(body: &str, now: i64) -> Result<Session, AuthError> {
    let mut session: Session = serde_json::from_str(body).map_err(parse_error)?;
    if session.expires_at.is_none() {
        session.expires_at = session.expires_in.map(|secs| now + secs);
    }
    Ok(session)
}

/// Sign-up answers with a full session when no confirmation is required,
/// otherwise with the bare user (or `{ "user": ... }`).
pub(crate) fn parse_sign_up(body: &str, now: i64) -> Result<SignUpData, AuthError> {
    let value: Value = serde_json::from_str(body).map_err(parse_error)?;
    if value.get("access_token").is_some_and(|t| !t.is_null()) {
        let session = parse_session(body, now)?;
        return Ok(SignUpData { user: Some(session.user.clone()), session: Some(session) });
    }

    let user_value = if value.get("user").is_some_and(Value::is_object) { value["user"].clone() } else { value };
    let user: Identity = serde_json::from_value(user_value).map_err(parse_error)?;
    Ok(SignUpData { user: Some(user), session: None })
}

pub(crate) fn parse_profile(body: &str) -> Result<Profile, AuthError> {
    serde_json::from_str(body).map_err(parse_error)
}

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;
