use super::*;

fn cred(code: &str) -> CredentialError {
    CredentialError::new(code, "backend message")
}

// =============================================================================
// AuthError::from
// =============================================================================

#[test]
fn maps_known_codes() {
    assert_eq!(AuthError::from(cred(EMAIL_IN_USE)), AuthError::EmailInUse);
    assert_eq!(AuthError::from(cred(INVALID_EMAIL)), AuthError::InvalidEmail);
    assert_eq!(AuthError::from(cred(WEAK_PASSWORD)), AuthError::WeakPassword);
    assert_eq!(AuthError::from(cred(WRONG_PASSWORD)), AuthError::WrongPassword);
    assert_eq!(AuthError::from(cred(USER_NOT_FOUND)), AuthError::UserNotFound);
}

#[test]
fn maps_prefixed_codes() {
    assert_eq!(AuthError::from(cred("auth/weak-password")), AuthError::WeakPassword);
    assert_eq!(AuthError::from(cred("auth/invalid-credential")), AuthError::WrongPassword);
}

#[test]
fn unknown_code_keeps_backend_message() {
    let err = AuthError::from(cred("too-many-requests"));
    assert_eq!(err, AuthError::Unknown("backend message".into()));
    assert_eq!(err.error_code(), "E_AUTH_UNKNOWN");
    assert!(err.to_string().contains("backend message"));
}

#[test]
fn messages_are_user_readable() {
    assert_eq!(AuthError::EmailInUse.to_string(), "An account already exists for that email address.");
    assert_eq!(AuthError::WrongPassword.error_code(), "E_AUTH_WRONG_PASSWORD");
}

// =============================================================================
// normalize_email
// =============================================================================

#[test]
fn normalize_email_accepts_basic_address() {
    assert_eq!(normalize_email("  A@B.com "), Some("a@b.com".to_owned()));
}

#[test]
fn normalize_email_rejects_invalid_values() {
    assert_eq!(normalize_email(""), None);
    assert_eq!(normalize_email("user"), None);
    assert_eq!(normalize_email("@example.com"), None);
    assert_eq!(normalize_email("user@"), None);
    assert_eq!(normalize_email("a@b@c"), None);
    assert_eq!(normalize_email("a b@c.com"), None);
}
