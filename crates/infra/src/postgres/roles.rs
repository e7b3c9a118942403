use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use tessera_authz::{Policy, PolicyFilter, PolicyRepository, Role, RoleRepository};
use tessera_core::{AuthzError, AuthzResult, Namespace, PolicyId, RoleId};

use super::{map_row_error, map_sqlx_error};

const ROLE_COLUMNS: &str =
    "id, name, title, permissions, namespace, metadata, created_at, updated_at";

const POLICY_COLUMNS: &str = "id, principal_type, principal_id, resource_type, resource_id, \
                              role_id, created_at, updated_at";

const POLICY_FILTER: &str = "($1::text IS NULL OR principal_type = $1) \
                             AND ($2::text IS NULL OR principal_id = $2) \
                             AND ($3::text IS NULL OR resource_type = $3) \
                             AND ($4::text IS NULL OR resource_id = $4) \
                             AND ($5::uuid IS NULL OR role_id = $5)";

fn role_from_row(row: &PgRow) -> Result<Role, sqlx::Error> {
    Ok(Role {
        id: RoleId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        title: row.try_get("title")?,
        permissions: row.try_get("permissions")?,
        namespace: Namespace::new(row.try_get::<String, _>("namespace")?),
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn policy_from_row(row: &PgRow) -> Result<Policy, sqlx::Error> {
    Ok(Policy {
        id: PolicyId::from_uuid(row.try_get::<Uuid, _>("id")?),
        principal_type: Namespace::new(row.try_get::<String, _>("principal_type")?),
        principal_id: row.try_get("principal_id")?,
        resource_type: Namespace::new(row.try_get::<String, _>("resource_type")?),
        resource_id: row.try_get("resource_id")?,
        role_id: RoleId::from_uuid(row.try_get::<Uuid, _>("role_id")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct PostgresRoleStore {
    pool: Arc<PgPool>,
}

impl PostgresRoleStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> AuthzResult<Option<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE {column} = $1");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_role", e))?;
        row.map(|r| role_from_row(&r))
            .transpose()
            .map_err(|e| map_row_error("get_role", e))
    }
}

#[async_trait]
impl RoleRepository for PostgresRoleStore {
    #[instrument(skip(self, role), fields(role = %role.name), err)]
    async fn insert(&self, role: Role) -> AuthzResult<Role> {
        sqlx::query(
            r#"
            INSERT INTO roles (
                id, name, title, permissions, namespace, metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(&role.name)
        .bind(&role.title)
        .bind(&role.permissions)
        .bind(role.namespace.as_str())
        .bind(&role.metadata)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;
        Ok(role)
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: RoleId) -> AuthzResult<Option<Role>> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_role", e))?;
        row.map(|r| role_from_row(&r))
            .transpose()
            .map_err(|e| map_row_error("get_role", e))
    }

    #[instrument(skip(self), err)]
    async fn get_by_name(&self, name: &str) -> AuthzResult<Option<Role>> {
        self.fetch_one_by("name", name).await
    }

    #[instrument(skip(self), err)]
    async fn list(&self, namespace: Option<&Namespace>) -> AuthzResult<Vec<Role>> {
        let sql = format!(
            "SELECT {ROLE_COLUMNS} FROM roles \
             WHERE ($1::text IS NULL OR namespace = $1) ORDER BY name"
        );
        let rows = sqlx::query(&sql)
            .bind(namespace.map(|ns| ns.as_str()))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_roles", e))?;
        rows.iter()
            .map(role_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_row_error("list_roles", e))
    }

    #[instrument(skip(self, role), fields(role = %role.name), err)]
    async fn update(&self, role: Role) -> AuthzResult<Role> {
        let result = sqlx::query(
            r#"
            UPDATE roles
            SET name = $2, title = $3, permissions = $4, namespace = $5, metadata = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(&role.name)
        .bind(&role.title)
        .bind(&role.permissions)
        .bind(role.namespace.as_str())
        .bind(&role.metadata)
        .bind(role.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_role", e))?;
        if result.rows_affected() == 0 {
            return Err(AuthzError::not_exist(format!("role {}", role.id)));
        }
        Ok(role)
    }
}

#[derive(Debug, Clone)]
pub struct PostgresPolicyStore {
    pool: Arc<PgPool>,
}

impl PostgresPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl PolicyRepository for PostgresPolicyStore {
    #[instrument(
        skip(self, policy),
        fields(policy = %policy.id, resource = %policy.resource()),
        err
    )]
    async fn insert(&self, policy: Policy) -> AuthzResult<Policy> {
        sqlx::query(
            r#"
            INSERT INTO policies (
                id, principal_type, principal_id, resource_type, resource_id,
                role_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(policy.id.as_uuid())
        .bind(policy.principal_type.as_str())
        .bind(&policy.principal_id)
        .bind(policy.resource_type.as_str())
        .bind(&policy.resource_id)
        .bind(policy.role_id.as_uuid())
        .bind(policy.created_at)
        .bind(policy.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_policy", e))?;
        Ok(policy)
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: PolicyId) -> AuthzResult<Option<Policy>> {
        let row = sqlx::query(&format!("SELECT {POLICY_COLUMNS} FROM policies WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_policy", e))?;
        row.map(|r| policy_from_row(&r))
            .transpose()
            .map_err(|e| map_row_error("get_policy", e))
    }

    #[instrument(skip(self), err)]
    async fn list(&self, filter: &PolicyFilter) -> AuthzResult<Vec<Policy>> {
        let sql = format!(
            "SELECT {POLICY_COLUMNS} FROM policies WHERE {POLICY_FILTER} ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.principal_type.as_ref().map(|ns| ns.as_str()))
            .bind(filter.principal_id.as_deref())
            .bind(filter.resource_type.as_ref().map(|ns| ns.as_str()))
            .bind(filter.resource_id.as_deref())
            .bind(filter.role_id.map(|id| *id.as_uuid()))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_policies", e))?;
        rows.iter()
            .map(policy_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_row_error("list_policies", e))
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, id: PolicyId) -> AuthzResult<bool> {
        let result = sqlx::query("DELETE FROM policies WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_policy", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn delete_matching(&self, filter: &PolicyFilter) -> AuthzResult<usize> {
        let sql = format!("DELETE FROM policies WHERE {POLICY_FILTER}");
        let result = sqlx::query(&sql)
            .bind(filter.principal_type.as_ref().map(|ns| ns.as_str()))
            .bind(filter.principal_id.as_deref())
            .bind(filter.resource_type.as_ref().map(|ns| ns.as_str()))
            .bind(filter.resource_id.as_deref())
            .bind(filter.role_id.map(|id| *id.as_uuid()))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_policies", e))?;
        Ok(result.rows_affected() as usize)
    }
}
