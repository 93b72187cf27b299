//! Backend seams — document store and credential service.
//!
//! DESIGN
//! ======
//! The remote backend is an opaque collaborator. Services depend only on the
//! [`DocumentStore`] and [`CredentialService`] traits, so production SDK
//! adapters and the in-process [`memory`] backend are interchangeable.
//!
//! Documents are loosely typed JSON maps on this side of the seam; typed
//! decoding happens in `models`, never here.
//!
//! SUBSCRIPTIONS
//! =============
//! `watch` returns a stream whose first item is the current state of the
//! document, followed by one item per committed change. Intermediate states
//! may be coalesced; observers only rely on the latest snapshot. Dropping the
//! stream ends the subscription.

pub mod memory;

use futures::stream::BoxStream;
use serde_json::{Map, Value};

use crate::error::ErrorCode;

/// Loosely typed document body as stored remotely.
pub type Document = Map<String, Value>;

/// Live snapshot stream for a single document. `None` means the document
/// does not exist (yet).
pub type Snapshots = BoxStream<'static, Result<Option<Document>, BackendError>>;

/// Stream of "current credential changed" events.
pub type CredentialChanges = BoxStream<'static, Option<String>>;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("document not found: {0}")]
    DocumentNotFound(DocRef),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl ErrorCode for BackendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::DocumentNotFound(_) => "E_DOCUMENT_NOT_FOUND",
            Self::Rejected(_) => "E_WRITE_REJECTED",
            Self::Unavailable(_) => "E_BACKEND_UNAVAILABLE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Raw credential-service failure. `code` is the backend's own identifier
/// (e.g. `email-already-in-use`); `services::auth` maps it to `AuthError`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CredentialError {
    pub code: String,
    pub message: String,
}

impl CredentialError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

// =============================================================================
// DOCUMENT ADDRESSING AND WRITES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self { collection: collection.into(), id: id.into() }
    }
}

impl std::fmt::Display for DocRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Overwrite the field.
    Value(Value),
    /// Append each value not already present. Creates the array if missing.
    ArrayUnion(Vec<Value>),
    /// Replaced by the backend's clock (ms since epoch) at commit time.
    ServerTimestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub field: String,
    pub value: FieldValue,
}

impl FieldUpdate {
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { field: field.into(), value: FieldValue::Value(value.into()) }
    }

    pub fn array_union(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self { field: field.into(), value: FieldValue::ArrayUnion(values) }
    }

    pub fn server_timestamp(field: impl Into<String>) -> Self {
        Self { field: field.into(), value: FieldValue::ServerTimestamp }
    }

    /// One `set` per top-level key of `doc`.
    #[must_use]
    pub fn from_document(doc: Document) -> Vec<Self> {
        doc.into_iter().map(|(field, value)| Self::set(field, value)).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create or replace the whole document.
    Set(DocRef, Vec<FieldUpdate>),
    /// Modify fields of an existing document. Fails if it does not exist.
    Update(DocRef, Vec<FieldUpdate>),
}

impl WriteOp {
    #[must_use]
    pub fn target(&self) -> &DocRef {
        match self {
            Self::Set(doc, _) | Self::Update(doc, _) => doc,
        }
    }
}

/// Ordered set of writes committed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, doc: DocRef, fields: Vec<FieldUpdate>) -> Self {
        self.ops.push(WriteOp::Set(doc, fields));
        self
    }

    #[must_use]
    pub fn update(mut self, doc: DocRef, fields: Vec<FieldUpdate>) -> Self {
        self.ops.push(WriteOp::Update(doc, fields));
        self
    }

    #[must_use]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    #[must_use]
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// =============================================================================
// TRAITS
// =============================================================================

/// Remote document database with point reads, equality queries, atomic
/// batches and live per-document subscriptions.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Allocate a fresh document id in `collection`.
    fn new_id(&self, collection: &str) -> String;

    /// Point read. `Ok(None)` if the document does not exist.
    async fn get(&self, doc: &DocRef) -> Result<Option<Document>, BackendError>;

    /// All documents in `collection` whose `field` equals `value`, as
    /// `(id, body)` pairs.
    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Document)>, BackendError>;

    /// Apply every op in `batch` or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<(), BackendError>;

    /// Subscribe to a single document.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be registered.
    fn watch(&self, doc: &DocRef) -> Result<Snapshots, BackendError>;

    async fn set(&self, doc: DocRef, fields: Vec<FieldUpdate>) -> Result<(), BackendError> {
        self.commit(WriteBatch::new().set(doc, fields)).await
    }

    async fn update(&self, doc: DocRef, fields: Vec<FieldUpdate>) -> Result<(), BackendError> {
        self.commit(WriteBatch::new().update(doc, fields)).await
    }
}

/// Email/password credential provider.
#[async_trait::async_trait]
pub trait CredentialService: Send + Sync {
    /// Create an account and sign it in. Returns the new uid.
    async fn create_account(&self, email: &str, password: &str) -> Result<String, CredentialError>;

    /// Authenticate and return the account's uid.
    async fn sign_in(&self, email: &str, password: &str) -> Result<String, CredentialError>;

    async fn sign_out(&self) -> Result<(), CredentialError>;

    /// Uid of the currently signed-in credential, if any.
    fn current_uid(&self) -> Option<String>;

    /// Emits the current uid immediately, then on every change.
    fn credential_changes(&self) -> CredentialChanges;
}
