//! Observable session state.
//!
//! DESIGN
//! ======
//! `SessionState` is the value published by the session store on a
//! `tokio::sync::watch` channel. Observers clone a receiver and read the
//! latest value; only the session store writes it. Every field is replaced
//! wholesale, so a reader never sees a user from one identity next to a group
//! from another.

use crate::backend::BackendError;
use crate::error::ErrorCode;
use crate::models::{DecodeError, Group, User};
use crate::services::role::{self, Permissions};

// =============================================================================
// AUTH PHASE
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthPhase {
    #[default]
    SignedOut,
    Authenticating,
    SignedIn {
        uid: String,
    },
}

/// Coarse lifecycle used to pick a UI branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    SignedOut,
    Authenticating,
    SignedInNoGroup,
    SignedInWithGroup,
}

// =============================================================================
// LISTENER ERRORS
// =============================================================================

/// Failure observed by a live subscription. Recorded on the state, never
/// returned to a caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenerError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ErrorCode for ListenerError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Decode(e) => e.error_code(),
            Self::Backend(e) => e.error_code(),
        }
    }
}

// =============================================================================
// SESSION STATE
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub auth: AuthPhase,
    /// Latest successfully decoded user snapshot.
    pub user: Option<User>,
    /// Latest successfully decoded snapshot of the user's group.
    pub group: Option<Group>,
    /// Most recent listener failure. Cleared by the next good user snapshot.
    pub last_error: Option<ListenerError>,
}

impl SessionState {
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        match &self.auth {
            AuthPhase::SignedIn { uid } => Some(uid),
            _ => None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        match &self.auth {
            AuthPhase::SignedOut => SessionPhase::SignedOut,
            AuthPhase::Authenticating => SessionPhase::Authenticating,
            AuthPhase::SignedIn { .. } => {
                if self.user.as_ref().is_some_and(|u| u.group_id.is_some()) {
                    SessionPhase::SignedInWithGroup
                } else {
                    SessionPhase::SignedInNoGroup
                }
            }
        }
    }

    /// Permission set for the cached user, recomputed on every call.
    #[must_use]
    pub fn permissions(&self) -> Option<Permissions> {
        self.user.as_ref().map(|u| role::permissions(u.role))
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
