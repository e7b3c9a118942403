use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use tessera_core::{AuthzError, AuthzResult, Entity, Namespace, RoleId, SchemaRegistry};

use crate::permissions::is_valid_permission_name;

/// A named bundle of permission verbs scoped to one resource namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub title: Option<String>,
    /// Permission verbs conferred by this role.
    #[serde(alias = "types")]
    pub permissions: Vec<String>,
    pub namespace: Namespace,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn grants(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> RoleId {
        self.id
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Role definition before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub title: Option<String>,
    pub permissions: Vec<String>,
    pub namespace: Namespace,
    #[serde(default)]
    pub metadata: JsonValue,
}

impl NewRole {
    pub fn new(name: impl Into<String>, namespace: Namespace, permissions: &[&str]) -> Self {
        Self {
            name: name.into(),
            title: None,
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            namespace,
            metadata: JsonValue::Null,
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    fn into_role(self) -> Role {
        let now = Utc::now();
        Role {
            id: RoleId::new(),
            name: self.name,
            title: self.title,
            permissions: self.permissions,
            namespace: self.namespace,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// `Conflict` when a role with the same name exists.
    async fn insert(&self, role: Role) -> AuthzResult<Role>;

    async fn get(&self, id: RoleId) -> AuthzResult<Option<Role>>;

    async fn get_by_name(&self, name: &str) -> AuthzResult<Option<Role>>;

    async fn list(&self, namespace: Option<&Namespace>) -> AuthzResult<Vec<Role>>;

    /// Replace a stored role; `NotExist` when the id is unknown.
    async fn update(&self, role: Role) -> AuthzResult<Role>;
}

#[derive(Clone)]
pub struct RoleService {
    registry: Arc<SchemaRegistry>,
    repository: Arc<dyn RoleRepository>,
}

impl RoleService {
    pub fn new(registry: Arc<SchemaRegistry>, repository: Arc<dyn RoleRepository>) -> Self {
        Self {
            registry,
            repository,
        }
    }

    pub async fn create(&self, role: NewRole) -> AuthzResult<Role> {
        self.validate(&role)?;
        let created = self.repository.insert(role.into_role()).await?;
        tracing::debug!(role = %created.name, namespace = %created.namespace, "role created");
        Ok(created)
    }

    /// Create the role, or bring an existing role of the same name in line with `role`.
    pub async fn ensure(&self, role: NewRole) -> AuthzResult<Role> {
        self.validate(&role)?;
        match self.repository.get_by_name(&role.name).await? {
            None => self.create(role).await,
            Some(existing)
                if existing.permissions == role.permissions
                    && existing.namespace == role.namespace =>
            {
                Ok(existing)
            }
            Some(mut existing) => {
                existing.permissions = role.permissions;
                existing.namespace = role.namespace;
                existing.title = role.title.or(existing.title);
                existing.updated_at = Utc::now();
                self.repository.update(existing).await
            }
        }
    }

    pub async fn get(&self, id: &str) -> AuthzResult<Role> {
        let id: RoleId = id.parse()?;
        self.get_by_id(id).await
    }

    pub async fn get_by_id(&self, id: RoleId) -> AuthzResult<Role> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| AuthzError::not_exist(format!("role {id}")))
    }

    pub async fn get_by_name(&self, name: &str) -> AuthzResult<Role> {
        self.repository
            .get_by_name(name)
            .await?
            .ok_or_else(|| AuthzError::not_exist(format!("role {name}")))
    }

    pub async fn list(&self, namespace: Option<&Namespace>) -> AuthzResult<Vec<Role>> {
        self.repository.list(namespace).await
    }

    fn validate(&self, role: &NewRole) -> AuthzResult<()> {
        if role.name.trim().is_empty() {
            return Err(AuthzError::invalid_detail("role name is empty"));
        }
        if !self.registry.is_resource(&role.namespace) {
            return Err(AuthzError::invalid_detail(format!(
                "role namespace '{}' is not a resource namespace",
                role.namespace
            )));
        }
        if role.permissions.is_empty() {
            return Err(AuthzError::invalid_detail("role grants no permissions"));
        }
        if let Some(bad) = role
            .permissions
            .iter()
            .find(|p| !is_valid_permission_name(p))
        {
            return Err(AuthzError::invalid_detail(format!(
                "invalid permission name '{bad}'"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_is_exact_match() {
        let role = NewRole::new("viewer", Namespace::PROJECT, &["get", "list"]).into_role();
        assert!(role.grants("get"));
        assert!(!role.grants("ge"));
        assert!(!role.grants("GET"));
        assert!(!role.grants("*"));
    }

    #[test]
    fn deserializes_types_alias() {
        let json = serde_json::json!({
            "id": RoleId::new(),
            "name": "r",
            "title": null,
            "types": ["get"],
            "namespace": "project",
            "metadata": {},
            "created_at": Utc::now(),
            "updated_at": Utc::now(),
        });
        let role: Role = serde_json::from_value(json).unwrap();
        assert_eq!(role.permissions, vec!["get".to_string()]);
    }
}
