//! In-process backend — document store and credential service held in memory.
//!
//! DESIGN
//! ======
//! `MemoryStore` keeps every collection in a `BTreeMap` behind one mutex, so
//! a batch commit is atomic by construction: ops are staged against scratch
//! copies of the touched documents and only swapped in once all of them have
//! applied cleanly. Each watched document owns a `tokio::sync::watch`
//! channel, which gives subscribers latest-value semantics. A channel is
//! discarded once its last subscriber has gone.
//!
//! `MemoryCredentials` stores salted SHA-256 password hashes and publishes the
//! current uid on its own watch channel.
//!
//! Both types expose a few inspection and fault-injection hooks used by tests
//! and the demo binary.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use futures::StreamExt;
use futures::stream::BoxStream;
use rand::Rng;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BackendError, CredentialChanges, CredentialError, CredentialService, DocRef, Document, DocumentStore, FieldUpdate,
    FieldValue, Snapshots, WriteBatch, WriteOp,
};
use crate::config::SessionConfig;
use crate::models::now_ms;
use crate::services::auth::{self, normalize_email};

/// Turn a watch receiver into a stream that yields the current value first,
/// then every subsequent change. Ends when the sender is dropped.
fn watch_stream<T>(rx: watch::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    futures::stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, (rx, false)))
    })
    .boxed()
}

// =============================================================================
// DOCUMENT STORE
// =============================================================================

#[derive(Default)]
struct StoreInner {
    collections: BTreeMap<String, BTreeMap<String, Document>>,
    watchers: HashMap<DocRef, watch::Sender<Option<Document>>>,
    pinned_time: Option<i64>,
    fail_next_commit: Option<BackendError>,
    fail_on: Option<(DocRef, BackendError)>,
    commits: u64,
}

impl StoreInner {
    fn read(&self, doc: &DocRef) -> Option<&Document> {
        self.collections.get(&doc.collection)?.get(&doc.id)
    }

    fn write(&mut self, doc: DocRef, body: Document) {
        match self.watchers.get(&doc).map(watch::Sender::receiver_count) {
            Some(0) => {
                self.watchers.remove(&doc);
            }
            Some(_) => {
                if let Some(tx) = self.watchers.get(&doc) {
                    tx.send_replace(Some(body.clone()));
                }
            }
            None => {}
        }
        self.collections
            .entry(doc.collection)
            .or_default()
            .insert(doc.id, body);
    }
}

/// Document store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Use a fixed value for server timestamps instead of the wall clock.
    pub fn pin_server_time(&self, ms: i64) {
        self.lock().pinned_time = Some(ms);
    }

    /// Make the next `commit` fail with `err` without applying anything.
    pub fn fail_next_commit(&self, err: BackendError) {
        self.lock().fail_next_commit = Some(err);
    }

    /// Make the next `commit` that writes `doc` fail with `err`. Batches not
    /// touching `doc` go through.
    pub fn fail_commit_touching(&self, doc: DocRef, err: BackendError) {
        self.lock().fail_on = Some((doc, err));
    }

    /// Number of batches committed successfully so far.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.lock().commits
    }

    /// Number of live subscriptions on `doc`.
    #[must_use]
    pub fn active_watchers(&self, doc: &DocRef) -> usize {
        self.lock()
            .watchers
            .get(doc)
            .map_or(0, watch::Sender::receiver_count)
    }

    /// Number of documents holding a watch channel.
    #[must_use]
    pub fn watched_documents(&self) -> usize {
        self.lock().watchers.len()
    }

    #[must_use]
    pub fn collection_len(&self, collection: &str) -> usize {
        self.lock()
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Synchronous peek at a stored document.
    #[must_use]
    pub fn document(&self, doc: &DocRef) -> Option<Document> {
        self.lock().read(doc).cloned()
    }

    /// Store `body` verbatim, bypassing batches and the commit counter.
    /// Watchers are notified as for a normal write.
    pub fn put_raw(&self, doc: DocRef, body: Document) {
        self.lock().write(doc, body);
    }
}

fn apply_fields(body: &mut Document, fields: Vec<FieldUpdate>, now: i64) -> Result<(), BackendError> {
    for FieldUpdate { field, value } in fields {
        match value {
            FieldValue::Value(v) => {
                body.insert(field, v);
            }
            FieldValue::ServerTimestamp => {
                body.insert(field, Value::from(now));
            }
            FieldValue::ArrayUnion(values) => {
                let entry = body
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                let Value::Array(items) = entry else {
                    return Err(BackendError::Rejected(format!("field {field} is not an array")));
                };
                for v in values {
                    if !items.contains(&v) {
                        items.push(v);
                    }
                }
            }
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    fn new_id(&self, _collection: &str) -> String {
        Uuid::new_v4().simple().to_string()
    }

    async fn get(&self, doc: &DocRef) -> Result<Option<Document>, BackendError> {
        Ok(self.lock().read(doc).cloned())
    }

    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Document)>, BackendError> {
        let inner = self.lock();
        let Some(docs) = inner.collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|(_, body)| body.get(field) == Some(value))
            .map(|(id, body)| (id.clone(), body.clone()))
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), BackendError> {
        let mut inner = self.lock();
        if let Some(err) = inner.fail_next_commit.take() {
            warn!(ops = batch.len(), error = %err, "injected commit failure");
            return Err(err);
        }
        let hits_target = inner
            .fail_on
            .as_ref()
            .is_some_and(|(doc, _)| batch.ops().iter().any(|op| op.target() == doc));
        if hits_target {
            if let Some((doc, err)) = inner.fail_on.take() {
                warn!(%doc, error = %err, "injected commit failure");
                return Err(err);
            }
        }
        if batch.is_empty() {
            return Ok(());
        }

        let now = inner.pinned_time.unwrap_or_else(now_ms);
        let mut staged: BTreeMap<DocRef, Document> = BTreeMap::new();
        for op in batch.into_ops() {
            match op {
                WriteOp::Set(doc, fields) => {
                    let mut body = Document::new();
                    apply_fields(&mut body, fields, now)?;
                    staged.insert(doc, body);
                }
                WriteOp::Update(doc, fields) => {
                    let mut body = match staged.remove(&doc) {
                        Some(body) => body,
                        None => inner
                            .read(&doc)
                            .cloned()
                            .ok_or_else(|| BackendError::DocumentNotFound(doc.clone()))?,
                    };
                    apply_fields(&mut body, fields, now)?;
                    staged.insert(doc, body);
                }
            }
        }

        let touched = staged.len();
        for (doc, body) in staged {
            inner.write(doc, body);
        }
        inner.commits += 1;
        debug!(touched, "committed batch");
        Ok(())
    }

    fn watch(&self, doc: &DocRef) -> Result<Snapshots, BackendError> {
        let mut inner = self.lock();
        let current = inner.read(doc).cloned();
        inner.watchers.retain(|_, tx| tx.receiver_count() > 0);
        let rx = inner
            .watchers
            .entry(doc.clone())
            .or_insert_with(|| watch::Sender::new(current))
            .subscribe();
        debug!(%doc, "document watch registered");
        Ok(watch_stream(rx).map(Ok::<_, BackendError>).boxed())
    }
}

// =============================================================================
// CREDENTIAL SERVICE
// =============================================================================

struct Account {
    uid: String,
    salt: String,
    password_hash: String,
}

fn generate_salt() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Email/password credential service backed by process memory.
pub struct MemoryCredentials {
    min_password_len: usize,
    accounts: Mutex<HashMap<String, Account>>,
    current: watch::Sender<Option<String>>,
}

impl MemoryCredentials {
    #[must_use]
    pub fn new(min_password_len: usize) -> Self {
        Self { min_password_len, accounts: Mutex::new(HashMap::new()), current: watch::Sender::new(None) }
    }

    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.min_password_len)
    }

    fn accounts(&self) -> MutexGuard<'_, HashMap<String, Account>> {
        self.accounts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Drop the current credential from outside the session, as a revoked
    /// or expired token would.
    pub fn invalidate_current(&self) {
        let previous = self.current.send_replace(None);
        if let Some(uid) = previous {
            info!(%uid, "credential invalidated");
        }
    }

    #[must_use]
    pub fn account_count(&self) -> usize {
        self.accounts().len()
    }
}

fn invalid_email() -> CredentialError {
    CredentialError::new(auth::INVALID_EMAIL, "The email address is badly formatted.")
}

#[async_trait::async_trait]
impl CredentialService for MemoryCredentials {
    async fn create_account(&self, email: &str, password: &str) -> Result<String, CredentialError> {
        let email = normalize_email(email).ok_or_else(invalid_email)?;
        if password.chars().count() < self.min_password_len {
            return Err(CredentialError::new(
                auth::WEAK_PASSWORD,
                format!("Password should be at least {} characters.", self.min_password_len),
            ));
        }

        let uid = {
            let mut accounts = self.accounts();
            if accounts.contains_key(&email) {
                return Err(CredentialError::new(
                    auth::EMAIL_IN_USE,
                    "The email address is already in use by another account.",
                ));
            }
            let uid = Uuid::new_v4().simple().to_string();
            let salt = generate_salt();
            let password_hash = hash_password(&salt, password);
            accounts.insert(email, Account { uid: uid.clone(), salt, password_hash });
            uid
        };

        self.current.send_replace(Some(uid.clone()));
        info!(%uid, "credential created");
        Ok(uid)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<String, CredentialError> {
        let email = normalize_email(email).ok_or_else(invalid_email)?;
        let uid = {
            let accounts = self.accounts();
            let Some(account) = accounts.get(&email) else {
                return Err(CredentialError::new(auth::USER_NOT_FOUND, "There is no user record for this email."));
            };
            if hash_password(&account.salt, password) != account.password_hash {
                return Err(CredentialError::new(auth::WRONG_PASSWORD, "The password is invalid."));
            }
            account.uid.clone()
        };

        self.current.send_replace(Some(uid.clone()));
        Ok(uid)
    }

    async fn sign_out(&self) -> Result<(), CredentialError> {
        self.current.send_replace(None);
        Ok(())
    }

    fn current_uid(&self) -> Option<String> {
        self.current.borrow().clone()
    }

    fn credential_changes(&self) -> CredentialChanges {
        watch_stream(self.current.subscribe())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
