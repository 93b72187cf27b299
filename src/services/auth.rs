//! Credential error taxonomy and input normalization.
//!
//! Credential backends report failures with their own string codes. This
//! module folds them into the fixed `AuthError` set whose `Display` output is
//! suitable for showing to the person signing in.

use crate::backend::CredentialError;
use crate::error::ErrorCode;

pub const EMAIL_IN_USE: &str = "email-already-in-use";
pub const INVALID_EMAIL: &str = "invalid-email";
pub const WEAK_PASSWORD: &str = "weak-password";
pub const WRONG_PASSWORD: &str = "wrong-password";
pub const USER_NOT_FOUND: &str = "user-not-found";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("An account already exists for that email address.")]
    EmailInUse,
    #[error("That email address is not valid.")]
    InvalidEmail,
    #[error("That password is too weak.")]
    WeakPassword,
    #[error("Incorrect password.")]
    WrongPassword,
    #[error("No account exists for that email address.")]
    UserNotFound,
    #[error("Authentication failed: {0}")]
    Unknown(String),
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::EmailInUse => "E_AUTH_EMAIL_IN_USE",
            Self::InvalidEmail => "E_AUTH_INVALID_EMAIL",
            Self::WeakPassword => "E_AUTH_WEAK_PASSWORD",
            Self::WrongPassword => "E_AUTH_WRONG_PASSWORD",
            Self::UserNotFound => "E_AUTH_USER_NOT_FOUND",
            Self::Unknown(_) => "E_AUTH_UNKNOWN",
        }
    }
}

impl From<CredentialError> for AuthError {
    fn from(err: CredentialError) -> Self {
        // Some SDKs prefix codes with the service name (`auth/weak-password`).
        let code = err.code.rsplit('/').next().unwrap_or_default();
        match code {
            EMAIL_IN_USE => Self::EmailInUse,
            INVALID_EMAIL => Self::InvalidEmail,
            WEAK_PASSWORD => Self::WeakPassword,
            WRONG_PASSWORD | "invalid-credential" => Self::WrongPassword,
            USER_NOT_FOUND => Self::UserNotFound,
            _ => Self::Unknown(err.message),
        }
    }
}

/// Trim and lowercase an email address. `None` unless it has exactly one `@`
/// with something on both sides.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let (local, domain) = normalized.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') || normalized.contains(char::is_whitespace) {
        return None;
    }
    Some(normalized)
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
