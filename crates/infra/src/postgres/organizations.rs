use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use tessera_authz::{Organization, OrganizationDirectory, OrganizationState};
use tessera_core::{AuthzError, AuthzResult};
use tessera_membership::{User, UserDirectory};

use super::{map_row_error, map_sqlx_error};

fn organization_from_row(row: &PgRow) -> Result<Organization, sqlx::Error> {
    let state: String = row.try_get("state")?;
    Ok(Organization {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        state: OrganizationState::parse(&state).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "state".into(),
            source: format!("unknown organization state '{state}'").into(),
        })?,
        created_at: row.try_get("created_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct PostgresOrganizationStore {
    pool: Arc<PgPool>,
}

impl PostgresOrganizationStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl OrganizationDirectory for PostgresOrganizationStore {
    #[instrument(skip(self), err)]
    async fn get(&self, id: &str) -> AuthzResult<Option<Organization>> {
        let row = sqlx::query("SELECT id, name, state, created_at FROM organizations WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_organization", e))?;
        row.map(|r| organization_from_row(&r))
            .transpose()
            .map_err(|e| map_row_error("get_organization", e))
    }

    #[instrument(skip(self, organization), fields(organization = %organization.id), err)]
    async fn insert(&self, organization: Organization) -> AuthzResult<Organization> {
        sqlx::query(
            "INSERT INTO organizations (id, name, state, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&organization.id)
        .bind(&organization.name)
        .bind(organization.state.as_str())
        .bind(organization.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_organization", e))?;
        Ok(organization)
    }

    #[instrument(skip(self), err)]
    async fn list(&self) -> AuthzResult<Vec<Organization>> {
        let rows = sqlx::query(
            "SELECT id, name, state, created_at FROM organizations ORDER BY created_at, id",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_organizations", e))?;
        rows.iter()
            .map(organization_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_row_error("list_organizations", e))
    }

    #[instrument(skip(self), err)]
    async fn set_state(&self, id: &str, state: OrganizationState) -> AuthzResult<Organization> {
        let row = sqlx::query(
            "UPDATE organizations SET state = $2 WHERE id = $1 \
             RETURNING id, name, state, created_at",
        )
        .bind(id)
        .bind(state.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_organization_state", e))?
        .ok_or_else(|| AuthzError::not_exist(format!("organization {id}")))?;
        organization_from_row(&row).map_err(|e| map_row_error("set_organization_state", e))
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, id: &str) -> AuthzResult<bool> {
        let result = sqlx::query("DELETE FROM organizations WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_organization", e))?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, Clone)]
pub struct PostgresUserStore {
    pool: Arc<PgPool>,
}

impl PostgresUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
    })
}

#[async_trait]
impl UserDirectory for PostgresUserStore {
    #[instrument(skip(self), err)]
    async fn get_by_id(&self, id: &str) -> AuthzResult<Option<User>> {
        let row = sqlx::query("SELECT id, email FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?;
        row.map(|r| user_from_row(&r))
            .transpose()
            .map_err(|e| map_row_error("get_user", e))
    }

    #[instrument(skip(self), err)]
    async fn get_by_email(&self, email: &str) -> AuthzResult<Option<User>> {
        let row = sqlx::query("SELECT id, email FROM users WHERE lower(email) = lower($1)")
            .bind(email.trim())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user_by_email", e))?;
        row.map(|r| user_from_row(&r))
            .transpose()
            .map_err(|e| map_row_error("get_user_by_email", e))
    }

    #[instrument(skip(self, user), fields(user = %user.id), err)]
    async fn insert(&self, user: User) -> AuthzResult<User> {
        sqlx::query("INSERT INTO users (id, email) VALUES ($1, $2)")
            .bind(&user.id)
            .bind(&user.email)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_user", e))?;
        Ok(user)
    }
}
