//! Error types for session and backend operations.
//!
//! ERROR HANDLING
//! ==============
//! Every public operation returns `Result<_, AuthError>` so callers decide
//! presentation. Backend failures are surfaced verbatim; `NoUser` is the only
//! error synthesized locally.

/// Stable machine-readable code and retry hint for an error.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Errors produced by session store and backend operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// A profile mutation was attempted with no signed-in identity.
    #[error("No user")]
    NoUser,

    /// The backend rejected the request.
    #[error("backend error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The request never produced a response.
    #[error("request failed: {0}")]
    Request(String),

    /// The backend response body could not be decoded.
    #[error("response parse failed: {0}")]
    Parse(String),

    /// The HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// The request exceeded its configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The persisted session could not be read or written.
    #[error("session storage failed: {0}")]
    Session(String),

    /// Zero or several profile rows matched the identity id.
    #[error("profile not found")]
    ProfileNotFound,
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NoUser => "E_NO_USER",
            Self::Api { .. } => "E_API",
            Self::Request(_) => "E_REQUEST",
            Self::Parse(_) => "E_PARSE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
            Self::Timeout => "E_TIMEOUT",
            Self::Session(_) => "E_SESSION_STORAGE",
            Self::ProfileNotFound => "E_PROFILE_NOT_FOUND",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Timeout | Self::Api { status: 429 | 500..=599, .. })
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
