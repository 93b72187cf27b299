use super::*;
use serde_json::json;

fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => panic!("test document must be an object"),
    }
}

fn group_ref(id: &str) -> DocRef {
    DocRef::new("groups", id)
}

// =============================================================================
// DOCUMENT STORE
// =============================================================================

#[tokio::test]
async fn set_then_get_round_trips_fields() {
    let store = MemoryStore::new();
    store
        .set(group_ref("g1"), vec![FieldUpdate::set("name", "Team A"), FieldUpdate::set("members", json!([]))])
        .await
        .unwrap();

    let body = store.get(&group_ref("g1")).await.unwrap().unwrap();
    assert_eq!(body.get("name"), Some(&json!("Team A")));
    assert_eq!(store.commit_count(), 1);
    assert_eq!(store.get(&group_ref("missing")).await.unwrap(), None);
}

#[tokio::test]
async fn set_replaces_whole_document() {
    let store = MemoryStore::new();
    store.put_raw(group_ref("g1"), doc(json!({"name": "old", "stale": true})));
    store
        .set(group_ref("g1"), vec![FieldUpdate::set("name", "new")])
        .await
        .unwrap();

    assert_eq!(store.document(&group_ref("g1")), Some(doc(json!({"name": "new"}))));
}

#[tokio::test]
async fn update_of_missing_document_is_not_found() {
    let store = MemoryStore::new();
    let err = store
        .update(group_ref("nope"), vec![FieldUpdate::set("name", "x")])
        .await
        .unwrap_err();
    assert_eq!(err, BackendError::DocumentNotFound(group_ref("nope")));
    assert_eq!(store.commit_count(), 0);
}

#[tokio::test]
async fn array_union_skips_existing_values() {
    let store = MemoryStore::new();
    store.put_raw(group_ref("g1"), doc(json!({"members": ["a", "b"]})));
    store
        .update(group_ref("g1"), vec![FieldUpdate::array_union("members", vec![json!("b"), json!("c")])])
        .await
        .unwrap();

    let body = store.document(&group_ref("g1")).unwrap();
    assert_eq!(body.get("members"), Some(&json!(["a", "b", "c"])));
}

#[tokio::test]
async fn array_union_on_scalar_is_rejected() {
    let store = MemoryStore::new();
    store.put_raw(group_ref("g1"), doc(json!({"members": "a"})));
    let err = store
        .update(group_ref("g1"), vec![FieldUpdate::array_union("members", vec![json!("b")])])
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Rejected(_)));
}

#[tokio::test]
async fn server_timestamp_uses_pinned_time() {
    let store = MemoryStore::new();
    store.pin_server_time(1234);
    store
        .set(group_ref("g1"), vec![FieldUpdate::server_timestamp("createdAt")])
        .await
        .unwrap();
    assert_eq!(store.document(&group_ref("g1")).unwrap().get("createdAt"), Some(&json!(1234)));
}

#[tokio::test]
async fn failing_batch_applies_nothing() {
    let store = MemoryStore::new();
    store.put_raw(group_ref("g1"), doc(json!({"members": ["a"]})));
    let batch = WriteBatch::new()
        .update(group_ref("g1"), vec![FieldUpdate::array_union("members", vec![json!("b")])])
        .update(DocRef::new("users", "ghost"), vec![FieldUpdate::set("groupId", "g1")]);

    let err = store.commit(batch).await.unwrap_err();
    assert!(matches!(err, BackendError::DocumentNotFound(_)));
    assert_eq!(store.document(&group_ref("g1")), Some(doc(json!({"members": ["a"]}))));
    assert_eq!(store.collection_len("users"), 0);
    assert_eq!(store.commit_count(), 0);
}

#[tokio::test]
async fn injected_failure_is_consumed_once() {
    let store = MemoryStore::new();
    store.fail_next_commit(BackendError::Unavailable("offline".into()));
    let write = || store.set(group_ref("g1"), vec![FieldUpdate::set("name", "x")]);

    assert_eq!(write().await.unwrap_err(), BackendError::Unavailable("offline".into()));
    assert_eq!(store.collection_len("groups"), 0);
    write().await.unwrap();
    assert_eq!(store.collection_len("groups"), 1);
}

#[tokio::test]
async fn query_eq_matches_field_value() {
    let store = MemoryStore::new();
    store.put_raw(group_ref("g1"), doc(json!({"code": "AB12CD"})));
    store.put_raw(group_ref("g2"), doc(json!({"code": "ZZ99ZZ"})));

    let hits = store.query_eq("groups", "code", &json!("AB12CD")).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, "g1");
    assert!(store.query_eq("users", "code", &json!("AB12CD")).await.unwrap().is_empty());
}

#[tokio::test]
async fn watch_yields_current_then_changes() {
    let store = MemoryStore::new();
    let mut snapshots = store.watch(&group_ref("g1")).unwrap();
    assert_eq!(snapshots.next().await, Some(Ok(None)));
    assert_eq!(store.active_watchers(&group_ref("g1")), 1);

    store.put_raw(group_ref("g1"), doc(json!({"name": "a"})));
    assert_eq!(snapshots.next().await, Some(Ok(Some(doc(json!({"name": "a"}))))));

    drop(snapshots);
    assert_eq!(store.active_watchers(&group_ref("g1")), 0);
}

#[tokio::test]
async fn unwatched_channels_are_discarded() {
    let store = MemoryStore::new();
    let first = store.watch(&group_ref("g1")).unwrap();
    let second = store.watch(&group_ref("g2")).unwrap();
    assert_eq!(store.watched_documents(), 2);

    drop(first);
    store.put_raw(group_ref("g1"), doc(json!({"name": "a"})));
    assert_eq!(store.watched_documents(), 1);

    drop(second);
    let _third = store.watch(&group_ref("g3")).unwrap();
    assert_eq!(store.watched_documents(), 1);
    assert_eq!(store.active_watchers(&group_ref("g3")), 1);
}

#[tokio::test]
async fn targeted_failure_skips_unrelated_batches() {
    let store = MemoryStore::new();
    let user = DocRef::new("users", "u1");
    store.fail_commit_touching(user.clone(), BackendError::Unavailable("offline".into()));

    store
        .set(group_ref("g1"), vec![FieldUpdate::set("name", "x")])
        .await
        .unwrap();
    let err = store
        .set(user.clone(), vec![FieldUpdate::set("groupId", "g1")])
        .await
        .unwrap_err();
    assert_eq!(err, BackendError::Unavailable("offline".into()));
    assert_eq!(store.document(&user), None);

    store
        .set(user.clone(), vec![FieldUpdate::set("groupId", "g1")])
        .await
        .unwrap();
    assert_eq!(store.commit_count(), 2);
}

#[test]
fn new_ids_are_unique() {
    let store = MemoryStore::new();
    assert_ne!(store.new_id("groups"), store.new_id("groups"));
}

// =============================================================================
// CREDENTIAL SERVICE
// =============================================================================

#[tokio::test]
async fn create_account_then_sign_in() {
    let creds = MemoryCredentials::new(6);
    let uid = creds.create_account(" Ada@Example.com ", "secret1").await.unwrap();
    assert_eq!(creds.current_uid(), Some(uid.clone()));

    creds.sign_out().await.unwrap();
    assert_eq!(creds.current_uid(), None);

    let again = creds.sign_in("ada@example.com", "secret1").await.unwrap();
    assert_eq!(again, uid);
}

#[tokio::test]
async fn create_account_failure_codes() {
    let creds = MemoryCredentials::new(6);
    creds.create_account("a@b.com", "secret1").await.unwrap();

    let dup = creds.create_account("A@B.COM", "secret1").await.unwrap_err();
    assert_eq!(dup.code, auth::EMAIL_IN_USE);
    let weak = creds.create_account("c@d.com", "short").await.unwrap_err();
    assert_eq!(weak.code, auth::WEAK_PASSWORD);
    let bad = creds.create_account("nope", "secret1").await.unwrap_err();
    assert_eq!(bad.code, auth::INVALID_EMAIL);
    assert_eq!(creds.account_count(), 1);
}

#[tokio::test]
async fn sign_in_failure_codes() {
    let creds = MemoryCredentials::new(6);
    creds.create_account("a@b.com", "secret1").await.unwrap();
    creds.sign_out().await.unwrap();

    let wrong = creds.sign_in("a@b.com", "secret2").await.unwrap_err();
    assert_eq!(wrong.code, auth::WRONG_PASSWORD);
    let missing = creds.sign_in("x@y.com", "secret1").await.unwrap_err();
    assert_eq!(missing.code, auth::USER_NOT_FOUND);
    assert_eq!(creds.current_uid(), None);
}

#[tokio::test]
async fn credential_changes_report_invalidation() {
    let creds = MemoryCredentials::new(6);
    let uid = creds.create_account("a@b.com", "secret1").await.unwrap();
    let mut changes = creds.credential_changes();
    assert_eq!(changes.next().await, Some(Some(uid)));

    creds.invalidate_current();
    assert_eq!(changes.next().await, Some(None));
}

#[test]
fn password_hash_depends_on_salt() {
    assert_eq!(hash_password("s1", "pw"), hash_password("s1", "pw"));
    assert_ne!(hash_password("s1", "pw"), hash_password("s2", "pw"));
    assert_eq!(generate_salt().len(), 32);
}
