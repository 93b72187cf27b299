//! Session store — the signed-in identity, its cached documents, and the
//! live subscriptions that keep them current.
//!
//! ARCHITECTURE
//! ============
//! `SessionStore` is an explicitly constructed service: callers hand it a
//! document store and a credential service, then drive it with
//! `start(uid)` / `stop()` or the sign-in operations that call them. It is
//! `Clone` and cheap to pass around; all clones share one cache.
//!
//! The cache is published as a `SessionState` on a `watch` channel. The
//! store is its only writer.
//!
//! CONCURRENCY
//! ===========
//! Two subscriptions may be live: one on the user document and, when the
//! user carries a group reference, one on that group document. Each is a
//! spawned task draining a snapshot stream. Re-arming drops the previous
//! `Subscription` first, which aborts its task and with it the stream.
//!
//! Every armed subscription gets a fresh generation number. Snapshots are
//! applied under the listener lock and only if their generation is still
//! the armed one, so a snapshot already in flight from a torn-down
//! subscription can never overwrite fresher state.
//!
//! TRADE-OFFS
//! ==========
//! Sign-up creates the credential and then the user document as two separate
//! calls. If the second fails the credential is left in place; there is no
//! compensating delete. Group creation is likewise two writes (group, then
//! the coach's reference), ordered so a failure in between never leaves a
//! reference to a group that does not list its owner.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, CredentialChanges, CredentialService, Document, DocumentStore, Snapshots};
use crate::config::SessionConfig;
use crate::error::ErrorCode;
use crate::models::{self, DecodeError, Group, Role, User, decode_group, decode_user};
use crate::services::auth::{AuthError, normalize_email};
use crate::services::group::{self, LookupError};
use crate::services::role::{self, Action, AuthorizationError, Permissions};
use crate::state::{AuthPhase, ListenerError, SessionState};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("no group uses join code {code}")]
    NotFound { code: String },
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("not signed in")]
    NotSignedIn,
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("document encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<LookupError> for SessionError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::Backend(e) => Self::Backend(e),
            LookupError::Decode(e) => Self::Decode(e),
        }
    }
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.error_code(),
            Self::NotFound { .. } => "E_GROUP_NOT_FOUND",
            Self::Authorization(e) => e.error_code(),
            Self::Decode(e) => e.error_code(),
            Self::NotSignedIn => "E_NOT_SIGNED_IN",
            Self::Backend(e) => e.error_code(),
            Self::Encode(_) => "E_ENCODE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Backend(e) if e.retryable())
    }
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// A live document subscription. Dropping it aborts the listener task.
struct Subscription {
    target: String,
    generation: u64,
    task: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Default)]
struct Listeners {
    last_generation: u64,
    user: Option<Subscription>,
    group: Option<Subscription>,
    credentials: Option<JoinHandle<()>>,
}

impl Listeners {
    fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    fn is_current_user(&self, generation: u64) -> bool {
        self.user.as_ref().is_some_and(|s| s.generation == generation)
    }

    fn is_current_group(&self, generation: u64) -> bool {
        self.group.as_ref().is_some_and(|s| s.generation == generation)
    }
}

impl Drop for Listeners {
    fn drop(&mut self) {
        if let Some(task) = self.credentials.take() {
            task.abort();
        }
    }
}

/// Document ids the store is currently subscribed to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArmedListeners {
    pub user: Option<String>,
    pub group: Option<String>,
}

// =============================================================================
// SESSION STORE
// =============================================================================

struct Inner {
    store: Arc<dyn DocumentStore>,
    credentials: Arc<dyn CredentialService>,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    listeners: Mutex<Listeners>,
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        credentials: Arc<dyn CredentialService>,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                credentials,
                config,
                state: watch::Sender::new(SessionState::default()),
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    /// Receiver for the published session state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Copy of the current session state.
    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn current_user(&self) -> Option<User> {
        self.inner.state.borrow().user.clone()
    }

    #[must_use]
    pub fn current_group(&self) -> Option<Group> {
        self.inner.state.borrow().group.clone()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<ListenerError> {
        self.inner.state.borrow().last_error.clone()
    }

    /// Permission set of the cached user. Evaluated on every call.
    #[must_use]
    pub fn permissions(&self) -> Option<Permissions> {
        self.inner.state.borrow().permissions()
    }

    #[must_use]
    pub fn armed_listeners(&self) -> ArmedListeners {
        let listeners = self.inner.lock_listeners();
        ArmedListeners {
            user: listeners.user.as_ref().map(|s| s.target.clone()),
            group: listeners.group.as_ref().map(|s| s.target.clone()),
        }
    }

    // =========================================================================
    // AUTHENTICATION
    // =========================================================================

    /// Create a credential and its user document, then start the session.
    ///
    /// # Errors
    ///
    /// Returns `Auth` for credential failures. A failure writing the user
    /// document is returned as-is and leaves the new credential in place.
    pub async fn sign_up(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        role: Role,
        password: &str,
    ) -> Result<User, SessionError> {
        let previous = self.begin_authenticating();
        let uid = match self.inner.credentials.create_account(email, password).await {
            Ok(uid) => uid,
            Err(e) => {
                let err = AuthError::from(e);
                warn!(error = %err, "sign-up rejected");
                self.restore_auth(previous);
                return Err(err.into());
            }
        };

        let user = User {
            id: uid.clone(),
            first_name: first_name.trim().to_owned(),
            last_name: last_name.trim().to_owned(),
            email: normalize_email(email).unwrap_or_else(|| email.trim().to_owned()),
            role,
            group_id: None,
            created_at: models::now_ms(),
        };
        if let Err(err) = self.write_user_document(&user).await {
            warn!(%uid, error = %err, "user document write failed; credential left without a profile");
            self.restore_auth(previous);
            return Err(err);
        }

        info!(%uid, %role, "account created");
        self.start(&uid);
        Ok(user)
    }

    /// Authenticate and (re)arm the listeners for the returned uid.
    ///
    /// # Errors
    ///
    /// Returns `Auth` if the credential service refuses the sign-in.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<String, SessionError> {
        let previous = self.begin_authenticating();
        match self.inner.credentials.sign_in(email, password).await {
            Ok(uid) => {
                info!(%uid, "signed in");
                self.start(&uid);
                Ok(uid)
            }
            Err(e) => {
                let err = AuthError::from(e);
                warn!(error = %err, "sign-in rejected");
                self.restore_auth(previous);
                Err(err.into())
            }
        }
    }

    /// Sign out of the credential service and drop all session state.
    ///
    /// # Errors
    ///
    /// Returns `Auth` if the credential service fails; local state is kept.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        self.inner
            .credentials
            .sign_out()
            .await
            .map_err(AuthError::from)?;
        self.stop();
        Ok(())
    }

    /// Follow the credential service's "current credential changed" events:
    /// a uid starts the session, `None` stops it. Replaces any previous
    /// credential watcher.
    pub fn watch_credentials(&self) {
        let changes = self.inner.credentials.credential_changes();
        let task = tokio::spawn(run_credential_listener(Arc::downgrade(&self.inner), changes));
        if let Some(previous) = self.inner.lock_listeners().credentials.replace(task) {
            previous.abort();
        }
    }

    fn begin_authenticating(&self) -> AuthPhase {
        let mut previous = AuthPhase::SignedOut;
        self.inner.state.send_modify(|s| {
            previous = std::mem::replace(&mut s.auth, AuthPhase::Authenticating);
        });
        previous
    }

    fn restore_auth(&self, previous: AuthPhase) {
        self.inner.state.send_modify(|s| {
            if s.auth == AuthPhase::Authenticating {
                s.auth = previous;
            }
        });
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Start (or keep) the session for `uid`. Must be called inside a tokio
    /// runtime.
    pub fn start(&self, uid: &str) {
        self.setup_listeners(uid);
    }

    /// Subscribe to the user document for `uid`. Idempotent for the uid that
    /// is already armed; a different uid tears everything down first and
    /// discards the previous identity's cached documents.
    pub fn setup_listeners(&self, uid: &str) {
        let mut listeners = self.inner.lock_listeners();
        let same_identity = listeners.user.as_ref().is_some_and(|s| s.target == uid);
        self.inner.state.send_modify(|s| {
            if !same_identity {
                s.user = None;
                s.group = None;
                s.last_error = None;
            }
            s.auth = AuthPhase::SignedIn { uid: uid.to_owned() };
        });
        if same_identity {
            debug!(%uid, "user listener already armed");
            return;
        }

        listeners.group = None;
        listeners.user = None;
        let generation = listeners.next_generation();
        match self.inner.store.watch(&self.inner.config.user_ref(uid)) {
            Ok(snapshots) => {
                let task = tokio::spawn(run_user_listener(
                    Arc::downgrade(&self.inner),
                    uid.to_owned(),
                    generation,
                    snapshots,
                ));
                listeners.user = Some(Subscription { target: uid.to_owned(), generation, task });
                info!(%uid, generation, "user listener armed");
            }
            Err(err) => {
                warn!(%uid, error = %err, "user listener failed to arm");
                self.inner.state.send_modify(|s| s.last_error = Some(err.into()));
            }
        }
    }

    /// Tear down both subscriptions and clear all cached state.
    pub fn stop(&self) {
        let mut listeners = self.inner.lock_listeners();
        let had_user = listeners.user.take().is_some();
        let had_group = listeners.group.take().is_some();
        self.inner.state.send_modify(|s| *s = SessionState::default());
        info!(had_user, had_group, "session stopped");
    }

    // =========================================================================
    // GROUP OPERATIONS
    // =========================================================================

    /// Join the group whose code matches `code`, ignoring case.
    ///
    /// # Errors
    ///
    /// - `NotSignedIn` without a session
    /// - `Authorization` unless the caller is a client (nothing is written)
    /// - `NotFound` if no group uses the code (nothing is written)
    /// - `Backend` if the membership batch fails (nothing is written)
    pub async fn join_group(&self, code: &str) -> Result<Group, SessionError> {
        let uid = self.require_uid()?;
        let user = self.load_user(&uid).await?;
        role::authorize(user.role, Action::JoinGroup)?;
        let Some(normalized) = group::normalize_join_code(code) else {
            info!(%uid, code, "join code has the wrong shape");
            return Err(SessionError::NotFound { code: code.trim().to_ascii_uppercase() });
        };

        let found = group::find_by_code(self.inner.store.as_ref(), &self.inner.config, &normalized).await?;
        let Some(mut target) = found else {
            info!(%uid, code = %normalized, "no group for join code");
            return Err(SessionError::NotFound { code: normalized });
        };

        self.inner
            .store
            .commit(group::join_batch(&self.inner.config, &target.id, &uid))
            .await?;
        if !target.has_member(&uid) {
            target.members.push(uid.clone());
        }
        info!(%uid, group_id = %target.id, "joined group");
        Ok(target)
    }

    /// Create a group owned by the signed-in coach and point the coach's user
    /// document at it.
    ///
    /// The returned group is built locally: its `created_at` is this
    /// process's clock, while the stored document carries the server
    /// timestamp.
    ///
    /// # Errors
    ///
    /// - `NotSignedIn` without a session
    /// - `Authorization` unless the caller is a coach (nothing is written)
    /// - `Backend` / `Decode` from the underlying reads and writes
    pub async fn create_group(&self, name: &str) -> Result<Group, SessionError> {
        let uid = self.require_uid()?;
        let user = self.load_user(&uid).await?;
        role::authorize(user.role, Action::CreateGroup)?;

        let store = &self.inner.store;
        let config = &self.inner.config;
        let group = Group {
            id: store.new_id(&config.groups_collection),
            name: name.trim().to_owned(),
            code: group::generate_group_code(),
            coach_id: uid.clone(),
            members: vec![uid.clone()],
            created_at: models::now_ms(),
        };

        store
            .set(config.group_ref(&group.id), models::create_fields(&group)?)
            .await?;
        if let Err(err) = store
            .update(config.user_ref(&uid), group::assign_fields(&group.id))
            .await
        {
            warn!(%uid, group_id = %group.id, error = %err, "group created but owner reference not set");
            return Err(err.into());
        }

        info!(%uid, group_id = %group.id, code = %group.code, "group created");
        Ok(group)
    }

    /// Users belonging to the signed-in coach's group.
    ///
    /// # Errors
    ///
    /// - `NotSignedIn` without a session
    /// - `Authorization` unless the caller is a coach
    /// - `Backend` / `Decode` from the query
    pub async fn group_members(&self) -> Result<Vec<User>, SessionError> {
        let uid = self.require_uid()?;
        let user = self.load_user(&uid).await?;
        role::authorize(user.role, Action::ViewRoster)?;
        let Some(group_id) = user.group_id else {
            return Ok(Vec::new());
        };
        Ok(group::list_members(self.inner.store.as_ref(), &self.inner.config, &group_id).await?)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn require_uid(&self) -> Result<String, SessionError> {
        self.inner
            .state
            .borrow()
            .uid()
            .map(str::to_owned)
            .ok_or(SessionError::NotSignedIn)
    }

    async fn write_user_document(&self, user: &User) -> Result<(), SessionError> {
        let fields = models::create_fields(user)?;
        self.inner
            .store
            .set(self.inner.config.user_ref(&user.id), fields)
            .await?;
        Ok(())
    }

    /// Cached user for `uid`, or a point read when the listener has not
    /// delivered one yet.
    async fn load_user(&self, uid: &str) -> Result<User, SessionError> {
        let cached = self.inner.state.borrow().user.clone().filter(|u| u.id == uid);
        if let Some(user) = cached {
            return Ok(user);
        }
        let doc = self.inner.store.get(&self.inner.config.user_ref(uid)).await?;
        Ok(decode_user(&self.inner.config.users_collection, uid, doc)?)
    }
}

// =============================================================================
// SNAPSHOT APPLICATION
// =============================================================================

impl Inner {
    fn lock_listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn apply_user_snapshot(
        self: &Arc<Self>,
        uid: &str,
        generation: u64,
        snapshot: Result<Option<Document>, BackendError>,
    ) {
        let mut listeners = self.lock_listeners();
        if !listeners.is_current_user(generation) {
            debug!(%uid, generation, "dropping stale user snapshot");
            return;
        }

        let decoded = snapshot
            .map_err(ListenerError::from)
            .and_then(|doc| decode_user(&self.config.users_collection, uid, doc).map_err(ListenerError::from));
        let user = match decoded {
            Ok(user) => user,
            Err(err) => {
                warn!(%uid, error = %err, "user snapshot rejected; keeping previous value");
                self.state.send_modify(|s| s.last_error = Some(err));
                return;
            }
        };

        let (clear_group, arm_error) = match user.group_id.as_deref() {
            Some(group_id) => match self.arm_group_listener(&mut listeners, group_id) {
                Ok(rearmed) => (rearmed, None),
                Err(err) => (true, Some(err)),
            },
            None => {
                if let Some(previous) = listeners.group.take() {
                    info!(%uid, group_id = %previous.target, "group listener torn down");
                }
                (true, None)
            }
        };

        self.state.send_modify(|s| {
            if clear_group {
                s.group = None;
            }
            s.user = Some(user);
            s.last_error = arm_error;
        });
    }

    /// Make sure the group subscription targets `group_id`. Returns whether a
    /// new subscription replaced the old one.
    fn arm_group_listener(self: &Arc<Self>, listeners: &mut Listeners, group_id: &str) -> Result<bool, ListenerError> {
        if listeners.group.as_ref().is_some_and(|s| s.target == group_id) {
            return Ok(false);
        }

        if let Some(previous) = listeners.group.take() {
            info!(group_id = %previous.target, "group listener torn down");
        }
        let generation = listeners.next_generation();
        let snapshots = self.store.watch(&self.config.group_ref(group_id)).map_err(|err| {
            warn!(group_id, error = %err, "group listener failed to arm");
            ListenerError::from(err)
        })?;
        let task = tokio::spawn(run_group_listener(
            Arc::downgrade(self),
            group_id.to_owned(),
            generation,
            snapshots,
        ));
        listeners.group = Some(Subscription { target: group_id.to_owned(), generation, task });
        info!(group_id, generation, "group listener armed");
        Ok(true)
    }

    fn apply_group_snapshot(&self, group_id: &str, generation: u64, snapshot: Result<Option<Document>, BackendError>) {
        let listeners = self.lock_listeners();
        if !listeners.is_current_group(generation) {
            debug!(group_id, generation, "dropping stale group snapshot");
            return;
        }

        let decoded = snapshot
            .map_err(ListenerError::from)
            .and_then(|doc| decode_group(&self.config.groups_collection, group_id, doc).map_err(ListenerError::from));
        match decoded {
            Ok(group) => {
                self.state.send_modify(|s| {
                    if let Some(uid) = s.uid() {
                        if !group.has_member(uid) {
                            warn!(uid, group_id, "group does not list the signed-in user");
                        }
                    }
                    s.group = Some(group);
                });
            }
            Err(err) => {
                warn!(group_id, error = %err, "group snapshot rejected; keeping previous value");
                self.state.send_modify(|s| s.last_error = Some(err));
            }
        }
        drop(listeners);
    }
}

// =============================================================================
// LISTENER TASKS
// =============================================================================

async fn run_user_listener(weak: Weak<Inner>, uid: String, generation: u64, mut snapshots: Snapshots) {
    while let Some(snapshot) = snapshots.next().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        inner.apply_user_snapshot(&uid, generation, snapshot);
    }
    debug!(%uid, generation, "user snapshot stream ended");
}

async fn run_group_listener(weak: Weak<Inner>, group_id: String, generation: u64, mut snapshots: Snapshots) {
    while let Some(snapshot) = snapshots.next().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        inner.apply_group_snapshot(&group_id, generation, snapshot);
    }
    debug!(%group_id, generation, "group snapshot stream ended");
}

async fn run_credential_listener(weak: Weak<Inner>, mut changes: CredentialChanges) {
    while let Some(current) = changes.next().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let session = SessionStore { inner };
        match current {
            Some(uid) => session.start(&uid),
            None => {
                let signed_in = session.inner.state.borrow().uid().is_some();
                if signed_in {
                    info!("credential invalidated; ending session");
                    session.stop();
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
