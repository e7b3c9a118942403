//! Role resolution: which roles does a principal hold on one resource.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tessera_core::schema::relations;
use tessera_core::{AuthzResult, Namespace, ObjectRef, RoleId, SchemaRegistry, SubjectRef};

use crate::policy::{PolicyFilter, PolicyRepository};
use crate::relation::{RelationFilter, RelationRepository};
use crate::role::{Role, RoleRepository};

/// Resolves roles from three sources:
///
/// 1. policies naming the principal on the resource,
/// 2. roles implied by relations between the principal and the resource,
/// 3. for users, both of the above for every group the user belongs to
///    (group policies and `group:G#member` subject sets).
///
/// Group indirection is a single level.
pub struct RoleResolver {
    registry: Arc<SchemaRegistry>,
    relations: Arc<dyn RelationRepository>,
    policies: Arc<dyn PolicyRepository>,
    roles: Arc<dyn RoleRepository>,
}

impl RoleResolver {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        relations: Arc<dyn RelationRepository>,
        policies: Arc<dyn PolicyRepository>,
        roles: Arc<dyn RoleRepository>,
    ) -> Self {
        Self {
            registry,
            relations,
            policies,
            roles,
        }
    }

    pub async fn list_roles(
        &self,
        principal_type: &Namespace,
        principal_id: &str,
        resource: &ObjectRef,
    ) -> AuthzResult<Vec<Role>> {
        let groups = if *principal_type == Namespace::USER {
            self.groups_of(principal_id).await?
        } else {
            Vec::new()
        };
        self.list_roles_with_groups(principal_type, principal_id, &groups, resource)
            .await
    }

    /// Groups a user is a member or owner of, deduplicated and sorted.
    pub async fn groups_of(&self, user_id: &str) -> AuthzResult<Vec<String>> {
        let filter = RelationFilter::default()
            .subject(&SubjectRef::new(Namespace::USER, user_id))
            .object_namespace(Namespace::GROUP);
        let groups: BTreeSet<String> = self
            .relations
            .list(&filter)
            .await?
            .into_iter()
            .filter(|r| r.relation_name == relations::MEMBER || r.relation_name == relations::OWNER)
            .map(|r| r.object.id)
            .collect();
        Ok(groups.into_iter().collect())
    }

    /// Like [`list_roles`](Self::list_roles) with the group set supplied by the caller,
    /// so repeated lookups for one principal share a single group query.
    pub async fn list_roles_with_groups(
        &self,
        principal_type: &Namespace,
        principal_id: &str,
        groups: &[String],
        resource: &ObjectRef,
    ) -> AuthzResult<Vec<Role>> {
        let mut grants = Grants::default();

        self.collect(
            &SubjectRef::new(principal_type.clone(), principal_id),
            resource,
            &mut grants,
        )
        .await?;

        // visited guards against a group appearing twice (or a cycle, should nested
        // membership ever become representable)
        let mut visited: HashSet<&str> = HashSet::new();
        for group in groups {
            if !visited.insert(group.as_str()) {
                continue;
            }
            self.collect(&SubjectRef::new(Namespace::GROUP, group.clone()), resource, &mut grants)
                .await?;
            let members = SubjectRef::new(Namespace::GROUP, group.clone())
                .with_sub_relation(relations::MEMBER);
            self.collect_implied(&members, resource, &mut grants).await?;
        }

        self.load(grants).await
    }

    /// Policies and relation-implied roles of one direct subject.
    async fn collect(
        &self,
        subject: &SubjectRef,
        resource: &ObjectRef,
        grants: &mut Grants,
    ) -> AuthzResult<()> {
        let policies = self
            .policies
            .list(
                &PolicyFilter::default()
                    .principal(subject.namespace.clone(), subject.id.clone())
                    .resource(resource),
            )
            .await?;
        for p in policies {
            grants.push_id(p.role_id);
        }
        self.collect_implied(subject, resource, grants).await
    }

    async fn collect_implied(
        &self,
        subject: &SubjectRef,
        resource: &ObjectRef,
        grants: &mut Grants,
    ) -> AuthzResult<()> {
        let filter = RelationFilter::default().subject(subject).object(resource);
        for rel in self.relations.list(&filter).await? {
            // a plain subject filter also matches subject sets; keep them apart
            if rel.subject.sub_relation != subject.sub_relation {
                continue;
            }
            if let Some(role) = self
                .registry
                .implied_role(&resource.namespace, &rel.relation_name)
            {
                grants.push_name(role);
            }
        }
        Ok(())
    }

    async fn load(&self, grants: Grants) -> AuthzResult<Vec<Role>> {
        let mut seen: HashSet<RoleId> = HashSet::new();
        let mut out = Vec::with_capacity(grants.ids.len() + grants.names.len());

        for id in grants.ids {
            if let Some(role) = self.roles.get(id).await? {
                if seen.insert(role.id) {
                    out.push(role);
                }
            }
        }
        for name in grants.names {
            if let Some(role) = self.roles.get_by_name(&name).await? {
                if seen.insert(role.id) {
                    out.push(role);
                }
            }
        }
        Ok(out)
    }
}

/// Role references gathered before loading, in discovery order.
#[derive(Default)]
struct Grants {
    ids: Vec<RoleId>,
    names: Vec<String>,
}

impl Grants {
    fn push_id(&mut self, id: RoleId) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
    }

    fn push_name(&mut self, name: &str) {
        if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_string());
        }
    }
}
