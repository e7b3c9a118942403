//! Permission verbs.
//!
//! Permissions are opaque tokens carried by roles and compared by equality only;
//! the constants below are the verbs used by the predefined roles.

pub const GET: &str = "get";
pub const LIST: &str = "list";
pub const CREATE: &str = "create";
pub const UPDATE: &str = "update";
pub const DELETE: &str = "delete";
pub const MANAGE: &str = "manage";
/// Synthetic permission held by every member of an organization or group.
pub const MEMBERSHIP: &str = "membership";
/// Granted to platform members: may check other principals' permissions.
pub const CHECK: &str = "check";
pub const PROJECT_CREATE: &str = "projectcreate";
pub const PROJECT_LIST: &str = "projectlist";
pub const GROUP_CREATE: &str = "groupcreate";
pub const GROUP_LIST: &str = "grouplist";
pub const RESOURCE_LIST: &str = "resourcelist";
pub const INVITATION_CREATE: &str = "invitationcreate";
pub const INVITATION_LIST: &str = "invitationlist";
pub const POLICY_MANAGE: &str = "policymanage";
pub const ROLE_MANAGE: &str = "rolemanage";
pub const SERVICE_USER_MANAGE: &str = "serviceusermanage";

/// Permission names are non-empty and strictly alphanumeric.
pub fn is_valid_permission_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
}
