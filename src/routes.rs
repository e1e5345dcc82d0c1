//! Declared application routes and guarded navigation.
//!
//! ARCHITECTURE
//! ============
//! Routes form a tree. A layout route (no name) contributes a path prefix
//! and access requirements to its children; a named route is a navigable
//! page. `:segment` captures a path parameter. Requirements are OR-merged
//! down the tree, so every child of an auth-required layout is
//! auth-required.
//!
//! `Navigator` resolves a path, asks the guard, and follows redirects until
//! a page is allowed or the hop limit is hit.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::ErrorCode;
use crate::guard::{Decision, NavigationGuard, RouteMeta};

/// Redirects followed before navigation gives up.
pub const MAX_REDIRECTS: usize = 5;

// =============================================================================
// ROUTE TABLE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDef {
    pub path: &'static str,
    /// `None` for layout routes that only group children.
    pub name: Option<&'static str>,
    pub meta: RouteMeta,
    pub children: Vec<RouteDef>,
}

impl RouteDef {
    #[must_use]
    pub fn page(path: &'static str, name: &'static str) -> Self {
        Self { path, name: Some(name), meta: RouteMeta::PUBLIC, children: Vec::new() }
    }

    #[must_use]
    pub fn layout(path: &'static str, children: Vec<RouteDef>) -> Self {
        Self { path, name: None, meta: RouteMeta::PUBLIC, children }
    }

    #[must_use]
    pub fn with_meta(mut self, meta: RouteMeta) -> Self {
        self.meta = meta;
        self
    }
}

/// A path matched against the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRoute {
    pub name: String,
    /// Normalized path: leading `/`, no trailing `/`, no query.
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub meta: RouteMeta,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteDef>,
}

impl RouteTable {
    #[must_use]
    pub fn new(routes: Vec<RouteDef>) -> Self {
        Self { routes }
    }

    /// The Fluensa app: a guest-only sign-in page and an auth-required shell.
    #[must_use]
    pub fn fluensa() -> Self {
        Self::new(vec![
            RouteDef::page("/auth", "Auth").with_meta(RouteMeta::GUEST),
            RouteDef::layout(
                "/",
                vec![
                    RouteDef::page("", "Home"),
                    RouteDef::page("lessons", "Lessons"),
                    RouteDef::page("lessons/:id", "LessonDetail"),
                    RouteDef::page("practice", "Practice"),
                    RouteDef::page("fluensa", "Fluensa"),
                    RouteDef::page("profile", "Profile"),
                ],
            )
            .with_meta(RouteMeta::AUTH),
        ])
    }

    #[must_use]
    pub fn routes(&self) -> &[RouteDef] {
        &self.routes
    }

    /// Match `path` (query and fragment ignored). First declared match wins.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<ResolvedRoute> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = split_segments(path).collect();
        self.routes
            .iter()
            .find_map(|route| match_route(route, &segments, RouteMeta::PUBLIC, BTreeMap::new()))
            .map(|(name, meta, params)| ResolvedRoute {
                name: name.to_owned(),
                path: format!("/{}", segments.join("/")),
                params,
                meta,
            })
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

type Match = (&'static str, RouteMeta, BTreeMap<String, String>);

fn match_route(
    route: &RouteDef,
    segments: &[&str],
    inherited: RouteMeta,
    mut params: BTreeMap<String, String>,
) -> Option<Match> {
    let mut rest = segments;
    for pattern in split_segments(route.path) {
        let (segment, tail) = rest.split_first()?;
        match pattern.strip_prefix(':') {
            Some(param) => {
                params.insert(param.to_owned(), (*segment).to_owned());
            }
            None if pattern == *segment => {}
            None => return None,
        }
        rest = tail;
    }

    let meta = inherited.merge(route.meta);
    if let Some(found) =
        route.children.iter().find_map(|child| match_route(child, rest, meta, params.clone()))
    {
        return Some(found);
    }
    match route.name {
        Some(name) if rest.is_empty() => Some((name, meta, params)),
        _ => None,
    }
}

// =============================================================================
// NAVIGATOR
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigationError {
    #[error("no route matches {0}")]
    NotFound(String),
    #[error("navigation to {path} exceeded {hops} redirects")]
    RedirectLoop { path: String, hops: usize },
}

impl ErrorCode for NavigationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_ROUTE_NOT_FOUND",
            Self::RedirectLoop { .. } => "E_REDIRECT_LOOP",
        }
    }
}

#[derive(Clone)]
pub struct Navigator {
    routes: RouteTable,
    guard: NavigationGuard,
}

impl Navigator {
    #[must_use]
    pub fn new(routes: RouteTable, guard: NavigationGuard) -> Self {
        Self { routes, guard }
    }

    /// Resolve `path` and follow guard redirects to the page actually shown.
    ///
    /// # Errors
    ///
    /// [`NavigationError::NotFound`] if `path` or a redirect target matches no
    /// route, [`NavigationError::RedirectLoop`] after [`MAX_REDIRECTS`] redirects.
    pub async fn navigate(&self, path: &str) -> Result<ResolvedRoute, NavigationError> {
        let mut target = path.to_owned();
        for hop in 0..=MAX_REDIRECTS {
            let route = self.routes.resolve(&target).ok_or_else(|| NavigationError::NotFound(target.clone()))?;
            match self.guard.check(route.meta).await {
                Decision::Allow => {
                    info!(requested = path, route = %route.name, redirects = hop, "navigation allowed");
                    return Ok(route);
                }
                Decision::Redirect(to) => {
                    debug!(from = %route.path, to = %to, hop, "navigation redirected");
                    target = to;
                }
            }
        }
        Err(NavigationError::RedirectLoop { path: path.to_owned(), hops: MAX_REDIRECTS })
    }
}

#[cfg(test)]
#[path = "routes_test.rs"]
mod tests;
