//! Session configuration parsed from environment variables.

use crate::backend::DocRef;
use crate::error::ErrorCode;

pub const DEFAULT_USERS_COLLECTION: &str = "users";
pub const DEFAULT_GROUPS_COLLECTION: &str = "groups";
pub const DEFAULT_MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
    #[error("{var} must not be empty")]
    Empty { var: String },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidValue { .. } => "E_CONFIG_INVALID",
            Self::Empty { .. } => "E_CONFIG_EMPTY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Collection holding one document per account, keyed by uid.
    pub users_collection: String,
    /// Collection holding group documents, keyed by generated id.
    pub groups_collection: String,
    /// Shortest password the in-memory credential service accepts.
    pub min_password_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            users_collection: DEFAULT_USERS_COLLECTION.to_owned(),
            groups_collection: DEFAULT_GROUPS_COLLECTION.to_owned(),
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
        }
    }
}

impl SessionConfig {
    /// Build typed session config from environment variables.
    ///
    /// Optional:
    /// - `USERS_COLLECTION`: default `users`
    /// - `GROUPS_COLLECTION`: default `groups`
    /// - `MIN_PASSWORD_LEN`: default 6
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but empty or unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup. `from_env` delegates here so
    /// parsing can be exercised without touching process env.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but empty or unparseable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let users_collection = parse_collection("USERS_COLLECTION", lookup("USERS_COLLECTION"), DEFAULT_USERS_COLLECTION)?;
        let groups_collection =
            parse_collection("GROUPS_COLLECTION", lookup("GROUPS_COLLECTION"), DEFAULT_GROUPS_COLLECTION)?;
        let min_password_len = match lookup("MIN_PASSWORD_LEN") {
            None => DEFAULT_MIN_PASSWORD_LEN,
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue { var: "MIN_PASSWORD_LEN".into(), value: raw.clone() })?,
        };

        Ok(Self { users_collection, groups_collection, min_password_len })
    }

    #[must_use]
    pub fn user_ref(&self, uid: &str) -> DocRef {
        DocRef::new(&self.users_collection, uid)
    }

    #[must_use]
    pub fn group_ref(&self, group_id: &str) -> DocRef {
        DocRef::new(&self.groups_collection, group_id)
    }
}

fn parse_collection(var: &str, raw: Option<String>, default: &str) -> Result<String, ConfigError> {
    match raw {
        None => Ok(default.to_owned()),
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(ConfigError::Empty { var: var.to_owned() });
            }
            if trimmed.contains('/') {
                return Err(ConfigError::InvalidValue { var: var.to_owned(), value });
            }
            Ok(trimmed.to_owned())
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
