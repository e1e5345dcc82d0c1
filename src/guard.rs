//! Navigation guard: decide whether a route transition may proceed.
//!
//! DESIGN
//! ======
//! The decision is a pure function of route metadata and whether someone is
//! signed in. `NavigationGuard` adds the one async concern: if the session
//! store is still initializing, it waits for the completion signal first, so
//! the first transition after startup sees the restored session rather than a
//! transient "signed out".

use serde::Serialize;
use tracing::debug;

use crate::store::SessionStore;

pub const SIGN_IN_PATH: &str = "/auth";
pub const HOME_PATH: &str = "/";

/// Access requirements declared on a route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouteMeta {
    pub requires_auth: bool,
    pub requires_guest: bool,
}

impl RouteMeta {
    pub const PUBLIC: Self = Self { requires_auth: false, requires_guest: false };
    pub const AUTH: Self = Self { requires_auth: true, requires_guest: false };
    pub const GUEST: Self = Self { requires_auth: false, requires_guest: true };

    /// Requirements inherited from a parent route plus the child's own.
    #[must_use]
    pub const fn merge(self, child: Self) -> Self {
        Self {
            requires_auth: self.requires_auth || child.requires_auth,
            requires_guest: self.requires_guest || child.requires_guest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "to", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Redirect(String),
}

/// Redirect targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardPaths {
    pub sign_in: String,
    pub home: String,
}

impl Default for GuardPaths {
    fn default() -> Self {
        Self { sign_in: SIGN_IN_PATH.to_owned(), home: HOME_PATH.to_owned() }
    }
}

/// Auth-required routes send visitors to sign-in; guest-only routes send
/// signed-in users home.
#[must_use]
pub fn decide(meta: RouteMeta, authenticated: bool, paths: &GuardPaths) -> Decision {
    if meta.requires_auth && !authenticated {
        return Decision::Redirect(paths.sign_in.clone());
    }
    if meta.requires_guest && authenticated {
        return Decision::Redirect(paths.home.clone());
    }
    Decision::Allow
}

#[derive(Clone)]
pub struct NavigationGuard {
    store: SessionStore,
    paths: GuardPaths,
}

impl NavigationGuard {
    #[must_use]
    pub fn new(store: SessionStore) -> Self {
        Self::with_paths(store, GuardPaths::default())
    }

    #[must_use]
    pub fn with_paths(store: SessionStore, paths: GuardPaths) -> Self {
        Self { store, paths }
    }

    #[must_use]
    pub fn paths(&self) -> &GuardPaths {
        &self.paths
    }

    /// Decide a transition to a route with `meta`. Suspends while the store is
    /// initializing; the store's owner is expected to have started `init`.
    pub async fn check(&self, meta: RouteMeta) -> Decision {
        if self.store.is_loading() {
            debug!("navigation waiting for session initialization");
            self.store.wait_initialized().await;
        }
        decide(meta, self.store.is_authenticated(), &self.paths)
    }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
