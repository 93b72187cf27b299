//! Typed user and group documents.
//!
//! DESIGN
//! ======
//! Documents cross the backend seam as loose JSON maps. `decode_user` and
//! `decode_group` are the only way back to typed values: serde enforces the
//! shape, then `validate` enforces the invariants serde cannot express. A
//! snapshot either decodes completely or yields a `DecodeError`; there is no
//! best-effort partial object.
//!
//! Field names on the wire are camelCase; timestamps are milliseconds since
//! the Unix epoch.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{Document, FieldUpdate};
use crate::error::ErrorCode;

const CREATED_AT_FIELD: &str = "createdAt";

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Coach,
    Client,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coach => "coach",
            Self::Client => "client",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coach" => Ok(Self::Coach),
            "client" => Ok(Self::Client),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

// =============================================================================
// DOCUMENTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub group_id: Option<String>,
    pub created_at: i64,
}

impl User {
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub code: String,
    pub coach_id: String,
    pub members: Vec<String>,
    pub created_at: i64,
}

impl Group {
    #[must_use]
    pub fn has_member(&self, uid: &str) -> bool {
        self.members.iter().any(|m| m == uid)
    }

    fn validate(&self) -> Result<(), String> {
        if !crate::services::group::is_valid_code(&self.code) {
            return Err(format!("malformed join code {:?}", self.code));
        }
        let mut seen = HashSet::with_capacity(self.members.len());
        if let Some(dup) = self.members.iter().find(|m| !seen.insert(m.as_str())) {
            return Err(format!("duplicate member {dup}"));
        }
        Ok(())
    }
}

// =============================================================================
// DECODE / ENCODE
// =============================================================================

/// A snapshot that could not be turned into a typed document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot decode {collection}/{id}: {reason}")]
pub struct DecodeError {
    pub collection: String,
    pub id: String,
    pub reason: String,
}

impl ErrorCode for DecodeError {
    fn error_code(&self) -> &'static str {
        "E_DECODE"
    }
}

fn decode_as<T: DeserializeOwned>(collection: &str, id: &str, doc: Option<Document>) -> Result<T, DecodeError> {
    let fail = |reason: String| DecodeError { collection: collection.to_owned(), id: id.to_owned(), reason };
    let Some(mut body) = doc else {
        return Err(fail("document does not exist".into()));
    };
    // The path id is authoritative; bodies written by other clients may omit it.
    body.insert("id".into(), Value::from(id));
    serde_json::from_value(Value::Object(body)).map_err(|e| fail(e.to_string()))
}

/// Decode a user snapshot.
///
/// # Errors
///
/// Returns `DecodeError` if the document is missing or malformed.
pub fn decode_user(collection: &str, id: &str, doc: Option<Document>) -> Result<User, DecodeError> {
    decode_as(collection, id, doc)
}

/// Decode a group snapshot and check its invariants.
///
/// # Errors
///
/// Returns `DecodeError` if the document is missing, malformed, carries a
/// join code outside `[A-Z0-9]{6}`, or lists a member twice.
pub fn decode_group(collection: &str, id: &str, doc: Option<Document>) -> Result<Group, DecodeError> {
    let group: Group = decode_as(collection, id, doc)?;
    group.validate().map_err(|reason| DecodeError {
        collection: collection.to_owned(),
        id: id.to_owned(),
        reason,
    })?;
    Ok(group)
}

/// Serialize a model into a document body.
///
/// # Errors
///
/// Returns an error if the value does not serialize to a JSON object.
pub fn encode<T: Serialize>(value: &T) -> Result<Document, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(serde::ser::Error::custom(format!("expected an object, got {other}"))),
    }
}

/// Fields for creating a document from `value`. `createdAt` is left to the
/// server clock, so the stored value may differ from the caller's copy.
///
/// # Errors
///
/// Returns an error if the value does not serialize to a JSON object.
pub fn create_fields<T: Serialize>(value: &T) -> Result<Vec<FieldUpdate>, serde_json::Error> {
    let mut doc = encode(value)?;
    doc.remove(CREATED_AT_FIELD);
    let mut fields = FieldUpdate::from_document(doc);
    fields.push(FieldUpdate::server_timestamp(CREATED_AT_FIELD));
    Ok(fields)
}

#[cfg(test)]
#[path = "models_test.rs"]
mod tests;
