use super::*;
use crate::types::test_helpers::{identity, profile_for, session_for};
use crate::types::{AuthEventKind, Session};

fn signed_in_state(user: &Identity) -> AuthState {
    AuthState { identity: Some(user.clone()), profile: Some(profile_for(user)), loading: false }
}

// =============================================================================
// AuthState
// =============================================================================

#[test]
fn new_state_is_loading_and_anonymous() {
    let state = AuthState::new();
    assert!(state.loading);
    assert!(!state.is_authenticated());
    assert!(state.profile.is_none());
    assert_eq!(state, AuthState::default());
}

#[test]
fn set_identity_same_user_keeps_profile() {
    let user = identity("u1@example.com");
    let mut state = signed_in_state(&user);
    let mut fresher = user.clone();
    fresher.email = Some("u1+new@example.com".into());
    state.set_identity(Some(fresher));
    assert!(state.profile.is_some());
    assert_eq!(state.identity.unwrap().email.as_deref(), Some("u1+new@example.com"));
}

#[test]
fn set_identity_other_user_drops_profile() {
    let mut state = signed_in_state(&identity("u1@example.com"));
    state.set_identity(Some(identity("u2@example.com")));
    assert!(state.profile.is_none());
    assert!(state.is_authenticated());
}

#[test]
fn set_identity_none_drops_profile() {
    let mut state = signed_in_state(&identity("u1@example.com"));
    state.set_identity(None);
    assert!(state.identity.is_none());
    assert!(state.profile.is_none());
}

#[test]
fn set_profile_rejects_foreign_profile() {
    let user = identity("u1@example.com");
    let other = identity("u2@example.com");
    let mut state = AuthState { identity: Some(user.clone()), profile: None, loading: false };
    assert!(!state.set_profile(profile_for(&other)));
    assert!(state.profile.is_none());
    assert!(state.set_profile(profile_for(&user)));
    assert_eq!(state.profile.unwrap().id, user.id);
}

#[test]
fn set_profile_rejects_when_signed_out() {
    let mut state = AuthState { loading: false, ..AuthState::new() };
    assert!(!state.set_profile(profile_for(&identity("u1@example.com"))));
    assert!(state.profile.is_none());
}

// =============================================================================
// apply_event
// =============================================================================

#[test]
fn signed_in_event_sets_identity_and_requests_fetch() {
    let user = identity("u1@example.com");
    let state = AuthState { loading: false, ..AuthState::new() };
    let t = apply_event(&state, &AuthEvent::signed_in(session_for(&user)));
    assert_eq!(t.state.user_id(), Some(user.id));
    assert_eq!(t.profile, ProfileAction::Fetch(user.id));
    assert!(t.state.profile.is_none());
}

#[test]
fn null_session_event_clears_identity_and_profile() {
    let user = identity("u1@example.com");
    let state = signed_in_state(&user);
    let t = apply_event(&state, &AuthEvent::new(AuthEventKind::SignedOut, None));
    assert!(t.state.identity.is_none());
    assert!(t.state.profile.is_none());
    assert_eq!(t.profile, ProfileAction::Clear);
}

#[test]
fn token_refresh_for_same_user_keeps_profile() {
    let user = identity("u1@example.com");
    let state = signed_in_state(&user);
    let refreshed = Session { access_token: "new".into(), ..session_for(&user) };
    let t = apply_event(&state, &AuthEvent::new(AuthEventKind::TokenRefreshed, Some(refreshed)));
    assert_eq!(t.state.profile.as_ref().map(|p| p.id), Some(user.id));
    assert_eq!(t.profile, ProfileAction::Fetch(user.id));
}

#[test]
fn event_for_other_user_replaces_identity_and_drops_profile() {
    let u1 = identity("u1@example.com");
    let u2 = identity("u2@example.com");
    let t = apply_event(&signed_in_state(&u1), &AuthEvent::signed_in(session_for(&u2)));
    assert_eq!(t.state.user_id(), Some(u2.id));
    assert!(t.state.profile.is_none());
}

#[test]
fn apply_event_preserves_loading_flag() {
    let user = identity("u1@example.com");
    let state = AuthState::new();
    let t = apply_event(&state, &AuthEvent::signed_in(session_for(&user)));
    assert!(t.state.loading);
}

#[test]
fn apply_event_does_not_mutate_input() {
    let user = identity("u1@example.com");
    let state = signed_in_state(&user);
    let before = state.clone();
    let _ = apply_event(&state, &AuthEvent::signed_out());
    assert_eq!(state, before);
}

#[test]
fn profile_invariant_holds_after_any_event_sequence() {
    let u1 = identity("u1@example.com");
    let u2 = identity("u2@example.com");
    let events = [
        AuthEvent::signed_in(session_for(&u1)),
        AuthEvent::new(AuthEventKind::TokenRefreshed, Some(session_for(&u1))),
        AuthEvent::signed_in(session_for(&u2)),
        AuthEvent::signed_out(),
        AuthEvent::signed_in(session_for(&u1)),
    ];
    let mut state = signed_in_state(&u1);
    for event in &events {
        state = apply_event(&state, event).state;
        if let Some(profile) = &state.profile {
            assert_eq!(state.user_id(), Some(profile.id));
        }
    }
}
