//! Predefined roles seeded at bootstrap.
//!
//! Their names are the roles implied by the base schema's relations, so a freshly
//! written `organization#owner` tuple grants `organization_owner` without any policy.

use tessera_core::Namespace;
use tessera_core::schema::roles;

use crate::permissions::*;
use crate::role::NewRole;

pub fn predefined_roles() -> Vec<NewRole> {
    vec![
        NewRole::new(roles::PLATFORM_MEMBER, Namespace::PLATFORM, &[CHECK])
            .titled("Platform Member"),
        NewRole::new(
            roles::ORGANIZATION_OWNER,
            Namespace::ORGANIZATION,
            &[
                GET,
                UPDATE,
                DELETE,
                MANAGE,
                MEMBERSHIP,
                PROJECT_CREATE,
                PROJECT_LIST,
                GROUP_CREATE,
                GROUP_LIST,
                INVITATION_CREATE,
                INVITATION_LIST,
                POLICY_MANAGE,
                ROLE_MANAGE,
                SERVICE_USER_MANAGE,
            ],
        )
        .titled("Organization Owner"),
        NewRole::new(
            roles::ORGANIZATION_MANAGER,
            Namespace::ORGANIZATION,
            &[
                GET,
                UPDATE,
                MEMBERSHIP,
                PROJECT_CREATE,
                PROJECT_LIST,
                GROUP_CREATE,
                GROUP_LIST,
                SERVICE_USER_MANAGE,
            ],
        )
        .titled("Organization Manager"),
        NewRole::new(
            roles::ORGANIZATION_VIEWER,
            Namespace::ORGANIZATION,
            &[GET, MEMBERSHIP],
        )
        .titled("Organization Viewer"),
        NewRole::new(
            roles::ORGANIZATION_MEMBER,
            Namespace::ORGANIZATION,
            &[MEMBERSHIP, PROJECT_LIST, GROUP_LIST],
        )
        .titled("Organization Member"),
        NewRole::new(
            roles::PROJECT_OWNER,
            Namespace::PROJECT,
            &[GET, UPDATE, DELETE, MANAGE, RESOURCE_LIST, POLICY_MANAGE],
        )
        .titled("Project Owner"),
        NewRole::new(
            roles::PROJECT_MANAGER,
            Namespace::PROJECT,
            &[GET, UPDATE, RESOURCE_LIST],
        )
        .titled("Project Manager"),
        NewRole::new(roles::PROJECT_VIEWER, Namespace::PROJECT, &[GET]).titled("Project Viewer"),
        NewRole::new(
            roles::GROUP_OWNER,
            Namespace::GROUP,
            &[GET, UPDATE, DELETE, MANAGE, MEMBERSHIP],
        )
        .titled("Group Owner"),
        NewRole::new(roles::GROUP_MEMBER, Namespace::GROUP, &[GET, MEMBERSHIP])
            .titled("Group Member"),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tessera_core::SchemaRegistry;

    use super::*;

    #[test]
    fn every_implied_role_is_predefined() {
        let reg = SchemaRegistry::base();
        let names: HashSet<String> = predefined_roles().into_iter().map(|r| r.name).collect();
        for def in reg.namespaces() {
            for rel in &def.relations {
                if let Some(role) = &rel.implied_role {
                    assert!(names.contains(role), "{role} missing from catalog");
                }
            }
        }
    }

    #[test]
    fn role_names_are_unique() {
        let roles = predefined_roles();
        let names: HashSet<&str> = roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names.len(), roles.len());
    }

    #[test]
    fn predefined_permissions_are_well_formed() {
        for role in predefined_roles() {
            assert!(
                role.permissions.iter().all(|p| is_valid_permission_name(p)),
                "{}",
                role.name
            );
        }
    }
}
