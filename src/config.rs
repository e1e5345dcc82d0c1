//! Backend connection configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SESSION_FILE: &str = ".fluensa-session.json";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_INIT_TIMEOUT_SECS: u64 = 15;

/// Errors produced while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
}

impl crate::error::ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Missing(_) => "E_CONFIG_MISSING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
    /// Upper bound on session restoration during initialization.
    pub init_secs: u64,
}

impl Default for AuthTimeouts {
    fn default() -> Self {
        Self {
            request_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            init_secs: DEFAULT_INIT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Backend base URL without trailing slash.
    pub backend_url: String,
    /// Public project key sent with every request.
    pub anon_key: String,
    /// Where the session is persisted between runs. `None` keeps it in memory.
    pub session_file: Option<PathBuf>,
    pub timeouts: AuthTimeouts,
}

impl AuthConfig {
    /// Config with default session file and timeouts.
    #[must_use]
    pub fn new(backend_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            session_file: Some(PathBuf::from(DEFAULT_SESSION_FILE)),
            timeouts: AuthTimeouts::default(),
        }
    }

    /// Build typed config from environment variables.
    ///
    /// Required:
    /// - `FLUENSA_BACKEND_URL`
    /// - `FLUENSA_ANON_KEY`
    ///
    /// Optional:
    /// - `FLUENSA_SESSION_FILE`: default `.fluensa-session.json`; empty disables persistence
    /// - `FLUENSA_REQUEST_TIMEOUT_SECS`: default 30
    /// - `FLUENSA_CONNECT_TIMEOUT_SECS`: default 10
    /// - `FLUENSA_INIT_TIMEOUT_SECS`: default 15
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if a required variable is unset or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend_url = required_env("FLUENSA_BACKEND_URL")?;
        let anon_key = required_env("FLUENSA_ANON_KEY")?;

        let session_file = match std::env::var("FLUENSA_SESSION_FILE") {
            Ok(path) if path.trim().is_empty() => None,
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => Some(PathBuf::from(DEFAULT_SESSION_FILE)),
        };
        let timeouts = AuthTimeouts {
            request_secs: env_parse_u64("FLUENSA_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse_u64("FLUENSA_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
            init_secs: env_parse_u64("FLUENSA_INIT_TIMEOUT_SECS", DEFAULT_INIT_TIMEOUT_SECS),
        };

        Ok(Self { session_file, timeouts, ..Self::new(backend_url, anon_key) })
    }

    #[must_use]
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.init_secs)
    }
}

fn required_env(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
