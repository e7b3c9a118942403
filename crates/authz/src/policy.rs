//! Policies: bindings of (principal, role, resource).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tessera_core::{
    AuthzError, AuthzResult, Entity, Namespace, ObjectRef, PolicyId, RoleId, SchemaRegistry,
};

use crate::resolve::RoleResolver;
use crate::role::{Role, RoleRepository};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub principal_type: Namespace,
    pub principal_id: String,
    pub resource_type: Namespace,
    pub resource_id: String,
    pub role_id: RoleId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    pub fn resource(&self) -> ObjectRef {
        ObjectRef::new(self.resource_type.clone(), self.resource_id.clone())
    }
}

impl Entity for Policy {
    type Id = PolicyId;

    fn id(&self) -> PolicyId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPolicy {
    pub principal_type: Namespace,
    pub principal_id: String,
    pub resource: ObjectRef,
    pub role_id: RoleId,
}

impl NewPolicy {
    pub fn new(
        principal_type: Namespace,
        principal_id: impl Into<String>,
        resource: ObjectRef,
        role_id: RoleId,
    ) -> Self {
        Self {
            principal_type,
            principal_id: principal_id.into(),
            resource,
            role_id,
        }
    }

    fn into_policy(self) -> Policy {
        let now = Utc::now();
        Policy {
            id: PolicyId::new(),
            principal_type: self.principal_type,
            principal_id: self.principal_id,
            resource_type: self.resource.namespace,
            resource_id: self.resource.id,
            role_id: self.role_id,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFilter {
    pub principal_type: Option<Namespace>,
    pub principal_id: Option<String>,
    pub resource_type: Option<Namespace>,
    pub resource_id: Option<String>,
    pub role_id: Option<RoleId>,
}

impl PolicyFilter {
    pub fn principal(mut self, principal_type: Namespace, principal_id: impl Into<String>) -> Self {
        self.principal_type = Some(principal_type);
        self.principal_id = Some(principal_id.into());
        self
    }

    pub fn resource(mut self, resource: &ObjectRef) -> Self {
        self.resource_type = Some(resource.namespace.clone());
        self.resource_id = Some(resource.id.clone());
        self
    }

    pub fn role(mut self, role_id: RoleId) -> Self {
        self.role_id = Some(role_id);
        self
    }

    pub fn matches(&self, policy: &Policy) -> bool {
        self.principal_type
            .as_ref()
            .is_none_or(|t| *t == policy.principal_type)
            && self
                .principal_id
                .as_ref()
                .is_none_or(|id| *id == policy.principal_id)
            && self
                .resource_type
                .as_ref()
                .is_none_or(|t| *t == policy.resource_type)
            && self
                .resource_id
                .as_ref()
                .is_none_or(|id| *id == policy.resource_id)
            && self.role_id.is_none_or(|id| id == policy.role_id)
    }
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// `Conflict` when the same (principal, resource, role) binding exists.
    async fn insert(&self, policy: Policy) -> AuthzResult<Policy>;

    async fn get(&self, id: PolicyId) -> AuthzResult<Option<Policy>>;

    async fn list(&self, filter: &PolicyFilter) -> AuthzResult<Vec<Policy>>;

    /// Returns `false` when the id is unknown.
    async fn delete(&self, id: PolicyId) -> AuthzResult<bool>;

    async fn delete_matching(&self, filter: &PolicyFilter) -> AuthzResult<usize>;
}

#[derive(Clone)]
pub struct PolicyService {
    registry: Arc<SchemaRegistry>,
    repository: Arc<dyn PolicyRepository>,
    roles: Arc<dyn RoleRepository>,
    resolver: Arc<RoleResolver>,
}

impl PolicyService {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        repository: Arc<dyn PolicyRepository>,
        roles: Arc<dyn RoleRepository>,
        resolver: Arc<RoleResolver>,
    ) -> Self {
        Self {
            registry,
            repository,
            roles,
            resolver,
        }
    }

    /// Bind a principal to a role on a resource.
    ///
    /// Several roles may coexist for the same (principal, resource); only an identical
    /// binding is rejected.
    pub async fn create(&self, policy: NewPolicy) -> AuthzResult<Policy> {
        if !self.registry.is_policy_principal(&policy.principal_type) {
            return Err(AuthzError::invalid_detail(format!(
                "'{}' cannot hold a policy",
                policy.principal_type
            )));
        }
        if policy.principal_id.is_empty() || policy.resource.id.is_empty() {
            return Err(AuthzError::invalid_detail("principal and resource ids must be set"));
        }
        if !self.registry.is_resource(&policy.resource.namespace) {
            return Err(AuthzError::invalid_detail(format!(
                "unknown resource namespace '{}'",
                policy.resource.namespace
            )));
        }
        let role = self
            .roles
            .get(policy.role_id)
            .await?
            .ok_or_else(|| {
                AuthzError::invalid_detail(format!("role {} does not exist", policy.role_id))
            })?;
        if role.namespace != policy.resource.namespace {
            return Err(AuthzError::invalid_detail(format!(
                "role '{}' is scoped to '{}', not '{}'",
                role.name, role.namespace, policy.resource.namespace
            )));
        }

        let created = self.repository.insert(policy.into_policy()).await?;
        tracing::debug!(
            policy = %created.id,
            principal = format_args!("{}:{}", created.principal_type, created.principal_id),
            resource = %created.resource(),
            role = %role.name,
            "policy created"
        );
        Ok(created)
    }

    pub async fn get(&self, id: &str) -> AuthzResult<Policy> {
        let id: PolicyId = id.parse()?;
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| AuthzError::not_exist(format!("policy {id}")))
    }

    pub async fn list(&self, filter: &PolicyFilter) -> AuthzResult<Vec<Policy>> {
        self.repository.list(filter).await
    }

    pub async fn delete(&self, id: &str) -> AuthzResult<()> {
        let id: PolicyId = id.parse()?;
        if self.repository.delete(id).await? {
            tracing::debug!(policy = %id, "policy deleted");
            Ok(())
        } else {
            Err(AuthzError::not_exist(format!("policy {id}")))
        }
    }

    pub async fn delete_matching(&self, filter: &PolicyFilter) -> AuthzResult<usize> {
        self.repository.delete_matching(filter).await
    }

    /// Roles held by a principal on a resource, directly or through group membership.
    pub async fn list_roles(
        &self,
        principal_type: &str,
        principal_id: &str,
        resource_namespace: &str,
        resource_id: &str,
    ) -> AuthzResult<Vec<Role>> {
        let principal_type = self.registry.namespace(principal_type)?;
        if !self.registry.is_policy_principal(&principal_type) {
            return Err(AuthzError::invalid_detail(format!(
                "'{principal_type}' is not a principal type"
            )));
        }
        let resource = ObjectRef::new(self.registry.namespace(resource_namespace)?, resource_id);
        self.resolver
            .list_roles(&principal_type, principal_id, &resource)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_fields_are_conjunctive() {
        let role_id = RoleId::new();
        let p = NewPolicy::new(
            Namespace::USER,
            "u1",
            ObjectRef::project("p1"),
            role_id,
        )
        .into_policy();

        assert!(PolicyFilter::default().matches(&p));
        assert!(
            PolicyFilter::default()
                .principal(Namespace::USER, "u1")
                .resource(&ObjectRef::project("p1"))
                .role(role_id)
                .matches(&p)
        );
        assert!(!PolicyFilter::default().principal(Namespace::GROUP, "u1").matches(&p));
        assert!(!PolicyFilter::default().resource(&ObjectRef::project("p2")).matches(&p));
        assert!(!PolicyFilter::default().role(RoleId::new()).matches(&p));
    }
}
