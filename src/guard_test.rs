use super::*;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::MemoryBackend;

fn redirect(to: &str) -> Decision {
    Decision::Redirect(to.to_owned())
}

#[test]
fn decide_covers_every_meta_and_auth_combination() {
    let paths = GuardPaths::default();
    assert_eq!(decide(RouteMeta::AUTH, false, &paths), redirect("/auth"));
    assert_eq!(decide(RouteMeta::AUTH, true, &paths), Decision::Allow);
    assert_eq!(decide(RouteMeta::GUEST, true, &paths), redirect("/"));
    assert_eq!(decide(RouteMeta::GUEST, false, &paths), Decision::Allow);
    assert_eq!(decide(RouteMeta::PUBLIC, false, &paths), Decision::Allow);
    assert_eq!(decide(RouteMeta::PUBLIC, true, &paths), Decision::Allow);
}

#[test]
fn decide_uses_configured_paths() {
    let paths = GuardPaths { sign_in: "/login".into(), home: "/dashboard".into() };
    assert_eq!(decide(RouteMeta::AUTH, false, &paths), redirect("/login"));
    assert_eq!(decide(RouteMeta::GUEST, true, &paths), redirect("/dashboard"));
}

#[test]
fn merge_ors_parent_and_child_flags() {
    assert_eq!(RouteMeta::AUTH.merge(RouteMeta::PUBLIC), RouteMeta::AUTH);
    assert_eq!(RouteMeta::PUBLIC.merge(RouteMeta::GUEST), RouteMeta::GUEST);
    let both = RouteMeta::AUTH.merge(RouteMeta::GUEST);
    assert!(both.requires_auth && both.requires_guest);
}

#[test]
fn decision_serializes_with_tag() {
    let json = serde_json::to_value(redirect("/auth")).unwrap();
    assert_eq!(json, serde_json::json!({ "decision": "redirect", "to": "/auth" }));
    let json = serde_json::to_value(Decision::Allow).unwrap();
    assert_eq!(json, serde_json::json!({ "decision": "allow" }));
}

#[tokio::test]
async fn check_after_init_follows_session() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_user("u1@example.com", "pw", "User One");
    let store = SessionStore::with_backend(Arc::clone(&backend), Duration::from_secs(5));
    store.init().await;
    let guard = NavigationGuard::new(store.clone());

    assert_eq!(guard.check(RouteMeta::AUTH).await, redirect("/auth"));
    assert_eq!(guard.check(RouteMeta::GUEST).await, Decision::Allow);

    store.sign_in("u1@example.com", "pw").await.unwrap();
    let mut rx = store.subscribe();
    rx.wait_for(|s| s.is_authenticated()).await.unwrap();

    assert_eq!(guard.check(RouteMeta::AUTH).await, Decision::Allow);
    assert_eq!(guard.check(RouteMeta::GUEST).await, redirect("/"));
}

#[tokio::test]
async fn check_waits_for_in_flight_init() {
    let backend = Arc::new(MemoryBackend::new());
    let u1 = backend.add_user("u1@example.com", "pw", "User One");
    backend.restore_session(&u1);
    backend.set_get_session_delay(Duration::from_millis(50));
    let store = SessionStore::with_backend(Arc::clone(&backend), Duration::from_secs(5));
    let guard = NavigationGuard::new(store.clone());

    let pending = tokio::spawn({
        let guard = guard.clone();
        async move { guard.check(RouteMeta::AUTH).await }
    });
    tokio::task::yield_now().await;
    assert!(!pending.is_finished());

    store.init().await;
    let decision = tokio::time::timeout(Duration::from_secs(2), pending).await.unwrap().unwrap();
    // A premature decision would have redirected to sign-in.
    assert_eq!(decision, Decision::Allow);
}
