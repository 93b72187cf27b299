//! Role gate — what a coach or a client may do.
//!
//! Role is fixed per account, but the gate is always evaluated against the
//! latest cached user rather than a stored copy of the permission set.

use crate::error::ErrorCode;
use crate::models::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateGroup,
    ManageClientResources,
    ViewRoster,
    JoinGroup,
    EditOwnResources,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateGroup => "create groups",
            Self::ManageClientResources => "manage client resources",
            Self::ViewRoster => "view the group roster",
            Self::JoinGroup => "join groups",
            Self::EditOwnResources => "edit their own resources",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Permissions {
    pub create_group: bool,
    pub manage_client_resources: bool,
    pub view_roster: bool,
    pub join_group: bool,
    pub edit_own_resources: bool,
}

impl Permissions {
    #[must_use]
    pub fn allows(self, action: Action) -> bool {
        match action {
            Action::CreateGroup => self.create_group,
            Action::ManageClientResources => self.manage_client_resources,
            Action::ViewRoster => self.view_roster,
            Action::JoinGroup => self.join_group,
            Action::EditOwnResources => self.edit_own_resources,
        }
    }
}

#[must_use]
pub fn permissions(role: Role) -> Permissions {
    match role {
        Role::Coach => Permissions {
            create_group: true,
            manage_client_resources: true,
            view_roster: true,
            join_group: false,
            edit_own_resources: false,
        },
        Role::Client => Permissions {
            create_group: false,
            manage_client_resources: false,
            view_roster: false,
            join_group: true,
            edit_own_resources: true,
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{role} accounts cannot {action}")]
pub struct AuthorizationError {
    pub role: Role,
    pub action: Action,
}

impl ErrorCode for AuthorizationError {
    fn error_code(&self) -> &'static str {
        "E_FORBIDDEN"
    }
}

/// Fail unless `role` is allowed to perform `action`.
///
/// # Errors
///
/// Returns `AuthorizationError` naming the role and the refused action.
pub fn authorize(role: Role, action: Action) -> Result<(), AuthorizationError> {
    if permissions(role).allows(action) {
        Ok(())
    } else {
        Err(AuthorizationError { role, action })
    }
}

#[cfg(test)]
#[path = "role_test.rs"]
mod tests;
