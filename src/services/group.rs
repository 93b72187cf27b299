//! Group service — join codes, lookup, and membership writes.
//!
//! DESIGN
//! ======
//! Join codes are six characters drawn uniformly from `[A-Z0-9]`. Lookups
//! uppercase the input first, so codes are case-insensitive for people typing
//! them in.
//!
//! TRADE-OFFS
//! ==========
//! Generated codes are not checked against existing groups. With 36^6
//! possible codes a collision is unlikely at expected group counts; if one
//! happens, `find_by_code` resolves to the group with the lowest id and logs
//! a warning.

use rand::Rng;
use serde_json::Value;
use tracing::warn;

use crate::backend::{DocumentStore, FieldUpdate, WriteBatch};
use crate::config::SessionConfig;
use crate::models::{DecodeError, Group, User, decode_group, decode_user};

pub const CODE_LEN: usize = 6;
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const CODE_FIELD: &str = "code";
const MEMBERS_FIELD: &str = "members";
const GROUP_ID_FIELD: &str = "groupId";

/// Generate a fresh join code.
#[must_use]
pub fn generate_group_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CODE_ALPHABET.len());
            char::from(CODE_ALPHABET[idx])
        })
        .collect()
}

/// Whether `code` is exactly `CODE_LEN` characters from `CODE_ALPHABET`.
#[must_use]
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

/// Trim and uppercase user input. `None` if the result cannot be a join code.
#[must_use]
pub fn normalize_join_code(code: &str) -> Option<String> {
    let normalized = code.trim().to_ascii_uppercase();
    is_valid_code(&normalized).then_some(normalized)
}

// =============================================================================
// READS
// =============================================================================

/// Errors from group reads: the backend failed or a document was malformed.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error(transparent)]
    Backend(#[from] crate::backend::BackendError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Find the group whose code equals the already-normalized `code`.
///
/// # Errors
///
/// Returns an error if the query fails or the matching document is malformed.
pub async fn find_by_code(
    store: &dyn DocumentStore,
    config: &SessionConfig,
    code: &str,
) -> Result<Option<Group>, LookupError> {
    let mut matches = store
        .query_eq(&config.groups_collection, CODE_FIELD, &Value::from(code))
        .await?;
    if matches.len() > 1 {
        warn!(code, count = matches.len(), "join code matches more than one group");
    }
    matches.sort_by(|a, b| a.0.cmp(&b.0));
    let Some((id, body)) = matches.into_iter().next() else {
        return Ok(None);
    };
    Ok(Some(decode_group(&config.groups_collection, &id, Some(body))?))
}

/// Users whose group reference points at `group_id`.
///
/// # Errors
///
/// Returns an error if the query fails or any matching document is malformed.
pub async fn list_members(
    store: &dyn DocumentStore,
    config: &SessionConfig,
    group_id: &str,
) -> Result<Vec<User>, LookupError> {
    let rows = store
        .query_eq(&config.users_collection, GROUP_ID_FIELD, &Value::from(group_id))
        .await?;
    let mut users = rows
        .into_iter()
        .map(|(id, body)| decode_user(&config.users_collection, &id, Some(body)))
        .collect::<Result<Vec<_>, _>>()?;
    users.sort_by(|a, b| (&a.last_name, &a.first_name).cmp(&(&b.last_name, &b.first_name)));
    Ok(users)
}

// =============================================================================
// WRITES
// =============================================================================

/// The two writes that make `uid` a member of `group_id`. Committed as one
/// batch so neither side can exist without the other.
#[must_use]
pub fn join_batch(config: &SessionConfig, group_id: &str, uid: &str) -> WriteBatch {
    WriteBatch::new()
        .update(config.group_ref(group_id), vec![FieldUpdate::array_union(MEMBERS_FIELD, vec![Value::from(uid)])])
        .update(config.user_ref(uid), assign_fields(group_id))
}

/// Point the user document at `group_id`.
#[must_use]
pub fn assign_fields(group_id: &str) -> Vec<FieldUpdate> {
    vec![FieldUpdate::set(GROUP_ID_FIELD, group_id)]
}

#[cfg(test)]
#[path = "group_test.rs"]
mod tests;
