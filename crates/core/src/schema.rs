//! Immutable namespace/schema registry.
//!
//! Built once at process start and handed to every component that needs to
//! validate tuples or walk the resource hierarchy.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{AuthzError, AuthzResult};
use crate::namespace::{Namespace, ObjectRef, SubjectRef};

/// Relation names used by the base schema.
pub mod relations {
    pub const SUDO: &str = "sudo";
    pub const MEMBER: &str = "member";
    pub const OWNER: &str = "owner";
    pub const PLATFORM: &str = "platform";
    pub const ORG: &str = "org";
    pub const PROJECT: &str = "project";
}

/// Names of the predefined roles implied by base relations.
pub mod roles {
    pub const PLATFORM_MEMBER: &str = "platform_member";
    pub const ORGANIZATION_OWNER: &str = "organization_owner";
    pub const ORGANIZATION_MANAGER: &str = "organization_manager";
    pub const ORGANIZATION_VIEWER: &str = "organization_viewer";
    pub const ORGANIZATION_MEMBER: &str = "organization_member";
    pub const PROJECT_OWNER: &str = "project_owner";
    pub const PROJECT_MANAGER: &str = "project_manager";
    pub const PROJECT_VIEWER: &str = "project_viewer";
    pub const GROUP_OWNER: &str = "group_owner";
    pub const GROUP_MEMBER: &str = "group_member";
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceKind {
    Principal,
    Resource,
}

/// A relation that may be written on objects of one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationDefinition {
    pub name: String,
    /// Namespaces allowed as direct subjects.
    pub subjects: Vec<Namespace>,
    /// Subject sets allowed as subjects, e.g. `(group, member)`.
    pub subject_sets: Vec<(Namespace, String)>,
    /// Role conferred on the subject by holding this relation.
    pub implied_role: Option<String>,
}

impl RelationDefinition {
    fn new(name: &str, subjects: &[Namespace]) -> Self {
        Self {
            name: name.to_string(),
            subjects: subjects.to_vec(),
            subject_sets: Vec::new(),
            implied_role: None,
        }
    }

    fn implying(mut self, role: &str) -> Self {
        self.implied_role = Some(role.to_string());
        self
    }

    fn with_subject_set(mut self, namespace: Namespace, relation: &str) -> Self {
        self.subject_sets.push((namespace, relation.to_string()));
        self
    }

    fn accepts(&self, subject: &SubjectRef) -> bool {
        match &subject.sub_relation {
            None => self.subjects.contains(&subject.namespace),
            Some(rel) => self
                .subject_sets
                .iter()
                .any(|(ns, r)| *ns == subject.namespace && r == rel),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceDefinition {
    pub namespace: Namespace,
    pub kind: NamespaceKind,
    pub relations: Vec<RelationDefinition>,
    /// Relation on this namespace whose subject is the parent resource.
    pub parent_relation: Option<String>,
}

impl NamespaceDefinition {
    pub fn relation(&self, name: &str) -> Option<&RelationDefinition> {
        self.relations.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRegistry {
    namespaces: BTreeMap<Namespace, NamespaceDefinition>,
}

impl SchemaRegistry {
    /// Registry with the reserved namespaces only.
    pub fn base() -> Self {
        SchemaBuilder::new().build()
    }

    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// Resolve a raw namespace string (aliases allowed) to a registered namespace.
    pub fn namespace(&self, raw: &str) -> AuthzResult<Namespace> {
        let ns = Namespace::canonical(raw);
        if self.namespaces.contains_key(&ns) {
            Ok(ns)
        } else {
            Err(AuthzError::invalid_detail(format!("unknown namespace '{raw}'")))
        }
    }

    pub fn definition(&self, namespace: &Namespace) -> Option<&NamespaceDefinition> {
        self.namespaces.get(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &NamespaceDefinition> {
        self.namespaces.values()
    }

    pub fn is_known(&self, namespace: &Namespace) -> bool {
        self.namespaces.contains_key(namespace)
    }

    pub fn is_resource(&self, namespace: &Namespace) -> bool {
        self.definition(namespace)
            .is_some_and(|d| d.kind == NamespaceKind::Resource)
    }

    /// Namespaces that may be the principal of a policy: users, service users and groups.
    pub fn is_policy_principal(&self, namespace: &Namespace) -> bool {
        *namespace == Namespace::USER
            || *namespace == Namespace::SERVICE_USER
            || *namespace == Namespace::GROUP
    }

    /// Parse `"namespace:id"` and require the namespace to be registered.
    pub fn parse_object(&self, encoded: &str) -> AuthzResult<ObjectRef> {
        let object = ObjectRef::parse(encoded)?;
        self.require_known(&object.namespace)?;
        Ok(object)
    }

    pub fn parse_subject(&self, encoded: &str) -> AuthzResult<SubjectRef> {
        let subject = SubjectRef::parse(encoded)?;
        self.require_known(&subject.namespace)?;
        Ok(subject)
    }

    pub fn relation(&self, namespace: &Namespace, name: &str) -> Option<&RelationDefinition> {
        self.definition(namespace).and_then(|d| d.relation(name))
    }

    pub fn parent_relation(&self, namespace: &Namespace) -> Option<&str> {
        self.definition(namespace)
            .and_then(|d| d.parent_relation.as_deref())
    }

    pub fn implied_role(&self, namespace: &Namespace, relation: &str) -> Option<&str> {
        self.relation(namespace, relation)
            .and_then(|r| r.implied_role.as_deref())
    }

    /// Validate a tuple against the schema.
    pub fn validate_tuple(
        &self,
        subject: &SubjectRef,
        relation_name: &str,
        object: &ObjectRef,
    ) -> AuthzResult<()> {
        if relation_name.trim().is_empty() {
            return Err(AuthzError::invalid_detail("relation name is empty"));
        }
        if subject.id.is_empty() || object.id.is_empty() {
            return Err(AuthzError::invalid_detail("subject and object ids must be set"));
        }
        self.require_known(&subject.namespace)?;
        let def = self.require_known(&object.namespace)?;
        let relation = def.relation(relation_name).ok_or_else(|| {
            AuthzError::invalid_detail(format!(
                "relation '{relation_name}' is not defined on namespace '{}'",
                object.namespace
            ))
        })?;
        if !relation.accepts(subject) {
            return Err(AuthzError::invalid_detail(format!(
                "subject '{subject}' is not allowed for {}#{relation_name}",
                object.namespace
            )));
        }
        Ok(())
    }

    fn require_known(&self, namespace: &Namespace) -> AuthzResult<&NamespaceDefinition> {
        self.definition(namespace)
            .ok_or_else(|| AuthzError::invalid_detail(format!("unknown namespace '{namespace}'")))
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::base()
    }
}

/// Builder seeded with the reserved namespaces; custom resources can be added.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    namespaces: BTreeMap<Namespace, NamespaceDefinition>,
}

impl SchemaBuilder {
    fn new() -> Self {
        use relations::*;

        let principals = [Namespace::USER, Namespace::SERVICE_USER];
        let mut b = Self {
            namespaces: BTreeMap::new(),
        };

        b.insert(Namespace::USER, NamespaceKind::Principal, vec![], None);
        b.insert(
            Namespace::SERVICE_USER,
            NamespaceKind::Principal,
            vec![RelationDefinition::new(ORG, &[Namespace::ORGANIZATION])],
            None,
        );
        b.insert(
            Namespace::PLATFORM,
            NamespaceKind::Resource,
            vec![
                RelationDefinition::new(SUDO, &principals),
                RelationDefinition::new(MEMBER, &principals).implying(roles::PLATFORM_MEMBER),
            ],
            None,
        );
        b.insert(
            Namespace::ORGANIZATION,
            NamespaceKind::Resource,
            vec![
                RelationDefinition::new(OWNER, &principals).implying(roles::ORGANIZATION_OWNER),
                RelationDefinition::new(MEMBER, &principals)
                    .with_subject_set(Namespace::GROUP, MEMBER)
                    .implying(roles::ORGANIZATION_MEMBER),
                RelationDefinition::new(PLATFORM, &[Namespace::PLATFORM]),
            ],
            Some(PLATFORM),
        );
        b.insert(
            Namespace::PROJECT,
            NamespaceKind::Resource,
            vec![
                RelationDefinition::new(OWNER, &principals).implying(roles::PROJECT_OWNER),
                RelationDefinition::new(MEMBER, &principals)
                    .with_subject_set(Namespace::GROUP, MEMBER)
                    .implying(roles::PROJECT_VIEWER),
                RelationDefinition::new(ORG, &[Namespace::ORGANIZATION]),
            ],
            Some(ORG),
        );
        b.insert(
            Namespace::GROUP,
            NamespaceKind::Resource,
            vec![
                RelationDefinition::new(OWNER, &principals).implying(roles::GROUP_OWNER),
                RelationDefinition::new(MEMBER, &principals).implying(roles::GROUP_MEMBER),
                RelationDefinition::new(ORG, &[Namespace::ORGANIZATION]),
            ],
            Some(ORG),
        );
        b
    }

    fn insert(
        &mut self,
        namespace: Namespace,
        kind: NamespaceKind,
        relations: Vec<RelationDefinition>,
        parent_relation: Option<&str>,
    ) {
        self.namespaces.insert(
            namespace.clone(),
            NamespaceDefinition {
                namespace,
                kind,
                relations,
                parent_relation: parent_relation.map(str::to_string),
            },
        );
    }

    /// Register a service-defined resource namespace owned by a project.
    ///
    /// Reserved namespaces are left untouched.
    pub fn with_resource(mut self, namespace: &str) -> Self {
        use relations::*;

        let ns = Namespace::canonical(namespace);
        if self.namespaces.contains_key(&ns) {
            return self;
        }
        let principals = [Namespace::USER, Namespace::SERVICE_USER];
        self.insert(
            ns,
            NamespaceKind::Resource,
            vec![
                RelationDefinition::new(PROJECT, &[Namespace::PROJECT]),
                RelationDefinition::new(OWNER, &principals),
                RelationDefinition::new(MEMBER, &principals)
                    .with_subject_set(Namespace::GROUP, MEMBER),
            ],
            Some(PROJECT),
        );
        self
    }

    pub fn build(self) -> SchemaRegistry {
        SchemaRegistry {
            namespaces: self.namespaces,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn user(id: &str) -> SubjectRef {
        SubjectRef::new(Namespace::USER, id)
    }

    #[test]
    fn base_schema_accepts_membership_tuples() {
        let reg = SchemaRegistry::base();
        reg.validate_tuple(&user("u1"), "member", &ObjectRef::organization("o1"))
            .unwrap();
        reg.validate_tuple(
            &SubjectRef::new(Namespace::GROUP, "g1").with_sub_relation("member"),
            "member",
            &ObjectRef::organization("o1"),
        )
        .unwrap();
        reg.validate_tuple(
            &ObjectRef::organization("o1").as_subject(),
            "org",
            &ObjectRef::project("p1"),
        )
        .unwrap();
    }

    #[test]
    fn unknown_relation_and_namespace_are_invalid_detail() {
        let reg = SchemaRegistry::base();
        let err = reg
            .validate_tuple(&user("u1"), "editor", &ObjectRef::organization("o1"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDetail);

        let err = reg
            .validate_tuple(
                &SubjectRef::new(Namespace::new("robot"), "r1"),
                "member",
                &ObjectRef::organization("o1"),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDetail);

        let err = reg
            .validate_tuple(&user("u1"), "", &ObjectRef::organization("o1"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDetail);
    }

    #[test]
    fn subject_namespace_must_be_allowed_by_relation() {
        let reg = SchemaRegistry::base();
        // groups cannot be nested inside groups
        let err = reg
            .validate_tuple(
                &SubjectRef::new(Namespace::GROUP, "g2").with_sub_relation("member"),
                "member",
                &ObjectRef::group("g1"),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidDetail);
    }

    #[test]
    fn custom_resources_hang_off_projects() {
        let reg = SchemaRegistry::builder().with_resource("compute/instance").build();
        let ns = reg.namespace("compute/instance").unwrap();
        assert!(reg.is_resource(&ns));
        assert_eq!(reg.parent_relation(&ns), Some("project"));
        assert_eq!(reg.parent_relation(&Namespace::PROJECT), Some("org"));
        assert_eq!(reg.parent_relation(&Namespace::ORGANIZATION), Some("platform"));
        assert_eq!(reg.parent_relation(&Namespace::PLATFORM), None);
    }

    #[test]
    fn parse_object_requires_registered_namespace() {
        let reg = SchemaRegistry::base();
        assert_eq!(
            reg.parse_object("org:o1").unwrap(),
            ObjectRef::organization("o1")
        );
        assert_eq!(
            reg.parse_object("warehouse:w1").unwrap_err().kind(),
            ErrorKind::InvalidDetail
        );
        assert_eq!(
            reg.parse_object("organization").unwrap_err().kind(),
            ErrorKind::NamespaceSplitNotation
        );
    }

    #[test]
    fn implied_roles_follow_relations() {
        let reg = SchemaRegistry::base();
        assert_eq!(
            reg.implied_role(&Namespace::ORGANIZATION, "owner"),
            Some(roles::ORGANIZATION_OWNER)
        );
        assert_eq!(reg.implied_role(&Namespace::PLATFORM, "sudo"), None);
        assert_eq!(reg.implied_role(&Namespace::PROJECT, "org"), None);
    }
}
