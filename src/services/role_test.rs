use super::*;

const ALL_ACTIONS: [Action; 5] = [
    Action::CreateGroup,
    Action::ManageClientResources,
    Action::ViewRoster,
    Action::JoinGroup,
    Action::EditOwnResources,
];

#[test]
fn coach_may_create_and_manage() {
    let perms = permissions(Role::Coach);
    assert!(perms.allows(Action::CreateGroup));
    assert!(perms.allows(Action::ManageClientResources));
    assert!(perms.allows(Action::ViewRoster));
    assert!(!perms.allows(Action::JoinGroup));
}

#[test]
fn client_may_join_and_edit_own() {
    let perms = permissions(Role::Client);
    assert!(perms.allows(Action::JoinGroup));
    assert!(perms.allows(Action::EditOwnResources));
    assert!(!perms.allows(Action::CreateGroup));
    assert!(!perms.allows(Action::ViewRoster));
}

#[test]
fn roles_split_every_action_between_them() {
    for action in ALL_ACTIONS {
        let coach = permissions(Role::Coach).allows(action);
        let client = permissions(Role::Client).allows(action);
        assert_ne!(coach, client, "{action} must belong to exactly one role");
    }
}

#[test]
fn authorize_refuses_client_group_creation() {
    let err = authorize(Role::Client, Action::CreateGroup).unwrap_err();
    assert_eq!(err, AuthorizationError { role: Role::Client, action: Action::CreateGroup });
    assert_eq!(err.to_string(), "client accounts cannot create groups");
    assert_eq!(err.error_code(), "E_FORBIDDEN");
}

#[test]
fn authorize_allows_coach_group_creation() {
    assert!(authorize(Role::Coach, Action::CreateGroup).is_ok());
}
