//! End-to-end coach/client flow through the public API.

use std::sync::Arc;
use std::time::Duration;

use coachsync::backend::DocRef;
use coachsync::services::role::Action;
use coachsync::{
    ErrorCode, MemoryCredentials, MemoryStore, Role, SessionConfig, SessionError, SessionPhase, SessionState,
    SessionStore,
};
use tokio::sync::watch;

const PASSWORD: &str = "secret1";

fn backend() -> (Arc<MemoryStore>, Arc<MemoryCredentials>) {
    let config = SessionConfig::default();
    (Arc::new(MemoryStore::new()), Arc::new(MemoryCredentials::from_config(&config)))
}

fn session(store: &Arc<MemoryStore>, credentials: &Arc<MemoryCredentials>) -> SessionStore {
    SessionStore::new(store.clone(), credentials.clone(), SessionConfig::default())
}

async fn wait_for(rx: &mut watch::Receiver<SessionState>, pred: impl FnMut(&SessionState) -> bool) -> SessionState {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(pred))
        .await
        .expect("state wait timed out")
        .expect("state channel closed")
        .clone()
}

#[tokio::test]
async fn coach_creates_group_and_client_joins() {
    let (store, credentials) = backend();
    let coach = session(&store, &credentials);
    let client = session(&store, &credentials);

    let coach_user = coach
        .sign_up("Casey", "Coach", "coach@example.com", Role::Coach, PASSWORD)
        .await
        .unwrap();
    let group = coach.create_group("Morning Runners").await.unwrap();
    assert_eq!(group.coach_id, coach_user.id);

    let client_user = client
        .sign_up("Robin", "Client", "robin@example.com", Role::Client, PASSWORD)
        .await
        .unwrap();
    let refused = client.create_group("Mine").await.unwrap_err();
    assert!(matches!(refused, SessionError::Authorization(_)));
    assert_eq!(refused.error_code(), "E_FORBIDDEN");

    client.join_group(&group.code.to_lowercase()).await.unwrap();

    let mut client_rx = client.subscribe();
    let state = wait_for(&mut client_rx, |s| s.group.as_ref().is_some_and(|g| g.members.len() == 2)).await;
    assert_eq!(state.phase(), SessionPhase::SignedInWithGroup);
    assert_eq!(state.group.as_ref().map(|g| g.id.as_str()), Some(group.id.as_str()));
    let perms = state.permissions().unwrap();
    assert!(perms.allows(Action::JoinGroup));
    assert!(!perms.allows(Action::CreateGroup));

    // The coach's live group view picks up the new member too.
    let mut coach_rx = coach.subscribe();
    let state = wait_for(&mut coach_rx, |s| {
        s.group.as_ref().is_some_and(|g| g.has_member(&client_user.id))
    })
    .await;
    assert_eq!(state.group.unwrap().members, vec![coach_user.id.clone(), client_user.id.clone()]);

    let roster = coach.group_members().await.unwrap();
    assert_eq!(roster.len(), 2);
}

#[tokio::test]
async fn unknown_join_code_changes_nothing() {
    let (store, credentials) = backend();
    let client = session(&store, &credentials);
    let user = client
        .sign_up("Robin", "Client", "robin@example.com", Role::Client, PASSWORD)
        .await
        .unwrap();
    let commits = store.commit_count();

    let err = client.join_group("ZZZZZZ").await.unwrap_err();
    assert!(matches!(err, SessionError::NotFound { .. }));
    assert_eq!(store.commit_count(), commits);
    let doc = store.document(&DocRef::new("users", &user.id)).unwrap();
    assert_eq!(doc.get("groupId"), Some(&serde_json::Value::Null));
}

#[tokio::test]
async fn signing_in_elsewhere_restores_cached_view() {
    let (store, credentials) = backend();
    let first = session(&store, &credentials);
    first
        .sign_up("Casey", "Coach", "coach@example.com", Role::Coach, PASSWORD)
        .await
        .unwrap();
    let group = first.create_group("Team").await.unwrap();
    first.sign_out().await.unwrap();
    assert_eq!(first.snapshot(), SessionState::default());

    let second = session(&store, &credentials);
    second.sign_in("COACH@example.com", PASSWORD).await.unwrap();
    let mut rx = second.subscribe();
    let state = wait_for(&mut rx, |s| s.group.is_some()).await;
    assert_eq!(state.group.unwrap().code, group.code);
    assert_eq!(state.user.unwrap().role, Role::Coach);
}
