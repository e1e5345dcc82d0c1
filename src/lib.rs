//! Fluensa auth session manager.
//!
//! ARCHITECTURE
//! ============
//! `SessionStore` owns the signed-in identity and its profile record, fed by
//! explicit calls and by the backend's identity-change events. The
//! `NavigationGuard` consults it on every route transition, waiting out
//! startup restoration. Backends sit behind the `AuthApi` and `ProfileStore`
//! traits: `HttpBackend` for a hosted auth + record service,
//! `MemoryBackend` for tests and offline runs.

pub mod backend;
pub mod config;
pub mod error;
pub mod guard;
pub mod routes;
pub mod state;
pub mod store;
pub mod types;

pub use backend::{AuthApi, HttpBackend, MemoryBackend, ProfileStore};
pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, ErrorCode};
pub use guard::{Decision, NavigationGuard, RouteMeta};
pub use routes::{NavigationError, Navigator, ResolvedRoute, RouteTable};
pub use state::AuthState;
pub use store::SessionStore;
pub use types::{AuthEvent, AuthEventKind, Identity, Profile, ProfileUpdate, Session, SignUpData};
