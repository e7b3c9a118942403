use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use tessera_core::{AuthzError, AuthzResult, DomainId, InvitationId, RoleId};
use tessera_membership::{
    Domain, DomainFilter, DomainRepository, DomainState, Invitation, InvitationFilter,
    InvitationRepository,
};

use super::{map_row_error, map_sqlx_error};

const DOMAIN_COLUMNS: &str = "id, name, org_id, token, state, created_at, updated_at";

const INVITATION_COLUMNS: &str =
    "id, user_id, org_id, group_ids, role_ids, metadata, created_at, expires_at, accepted_at";

fn domain_from_row(row: &PgRow) -> Result<Domain, sqlx::Error> {
    let state: String = row.try_get("state")?;
    Ok(Domain {
        id: DomainId::from_uuid(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        org_id: row.try_get("org_id")?,
        token: row.try_get("token")?,
        state: DomainState::parse(&state).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "state".into(),
            source: format!("unknown domain state '{state}'").into(),
        })?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn invitation_from_row(row: &PgRow) -> Result<Invitation, sqlx::Error> {
    let role_ids: Vec<Uuid> = row.try_get("role_ids")?;
    Ok(Invitation {
        id: InvitationId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: row.try_get("user_id")?,
        org_id: row.try_get("org_id")?,
        group_ids: row.try_get("group_ids")?,
        role_ids: role_ids.into_iter().map(RoleId::from_uuid).collect(),
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        accepted_at: row.try_get("accepted_at")?,
    })
}

#[derive(Debug, Clone)]
pub struct PostgresDomainStore {
    pool: Arc<PgPool>,
}

impl PostgresDomainStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl DomainRepository for PostgresDomainStore {
    #[instrument(skip(self, domain), fields(domain = %domain.name, org = %domain.org_id), err)]
    async fn insert(&self, domain: Domain) -> AuthzResult<Domain> {
        sqlx::query(
            r#"
            INSERT INTO domains (id, name, org_id, token, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(domain.id.as_uuid())
        .bind(&domain.name)
        .bind(&domain.org_id)
        .bind(&domain.token)
        .bind(domain.state.as_str())
        .bind(domain.created_at)
        .bind(domain.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_domain", e))?;
        Ok(domain)
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: DomainId) -> AuthzResult<Option<Domain>> {
        let row = sqlx::query(&format!("SELECT {DOMAIN_COLUMNS} FROM domains WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_domain", e))?;
        row.map(|r| domain_from_row(&r))
            .transpose()
            .map_err(|e| map_row_error("get_domain", e))
    }

    #[instrument(skip(self), err)]
    async fn list(&self, filter: &DomainFilter) -> AuthzResult<Vec<Domain>> {
        let sql = format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains \
             WHERE ($1::text IS NULL OR org_id = $1) \
               AND ($2::text IS NULL OR name = $2) \
               AND ($3::text IS NULL OR state = $3) \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.org_id.as_deref())
            .bind(filter.name.as_deref())
            .bind(filter.state.map(DomainState::as_str))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_domains", e))?;
        rows.iter()
            .map(domain_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_row_error("list_domains", e))
    }

    #[instrument(skip(self, domain), fields(domain = %domain.id), err)]
    async fn update(&self, domain: Domain) -> AuthzResult<Domain> {
        let result = sqlx::query(
            "UPDATE domains SET name = $2, token = $3, state = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(domain.id.as_uuid())
        .bind(&domain.name)
        .bind(&domain.token)
        .bind(domain.state.as_str())
        .bind(domain.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_domain", e))?;
        if result.rows_affected() == 0 {
            return Err(AuthzError::not_exist(format!("domain {}", domain.id)));
        }
        Ok(domain)
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, id: DomainId) -> AuthzResult<bool> {
        let result = sqlx::query("DELETE FROM domains WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_domain", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn delete_pending_before(&self, cutoff: DateTime<Utc>) -> AuthzResult<usize> {
        let result = sqlx::query("DELETE FROM domains WHERE state = 'pending' AND created_at < $1")
            .bind(cutoff)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_expired_domains", e))?;
        Ok(result.rows_affected() as usize)
    }
}

#[derive(Debug, Clone)]
pub struct PostgresInvitationStore {
    pool: Arc<PgPool>,
}

impl PostgresInvitationStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl InvitationRepository for PostgresInvitationStore {
    #[instrument(skip(self, invitation), fields(invitation = %invitation.id), err)]
    async fn upsert(&self, invitation: Invitation) -> AuthzResult<Invitation> {
        let role_ids: Vec<Uuid> = invitation.role_ids.iter().map(|id| *id.as_uuid()).collect();
        sqlx::query(
            r#"
            INSERT INTO invitations (
                id, user_id, org_id, group_ids, role_ids, metadata,
                created_at, expires_at, accepted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                org_id = EXCLUDED.org_id,
                group_ids = EXCLUDED.group_ids,
                role_ids = EXCLUDED.role_ids,
                metadata = EXCLUDED.metadata,
                expires_at = EXCLUDED.expires_at,
                accepted_at = EXCLUDED.accepted_at
            "#,
        )
        .bind(invitation.id.as_uuid())
        .bind(&invitation.user_id)
        .bind(&invitation.org_id)
        .bind(&invitation.group_ids)
        .bind(&role_ids)
        .bind(&invitation.metadata)
        .bind(invitation.created_at)
        .bind(invitation.expires_at)
        .bind(invitation.accepted_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_invitation", e))?;
        Ok(invitation)
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: InvitationId) -> AuthzResult<Option<Invitation>> {
        let row = sqlx::query(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_invitation", e))?;
        row.map(|r| invitation_from_row(&r))
            .transpose()
            .map_err(|e| map_row_error("get_invitation", e))
    }

    #[instrument(skip(self), err)]
    async fn list(&self, filter: &InvitationFilter) -> AuthzResult<Vec<Invitation>> {
        let sql = format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations \
             WHERE ($1::text IS NULL OR org_id = $1) \
               AND ($2::text IS NULL OR lower(user_id) = lower($2)) \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.org_id.as_deref())
            .bind(filter.user_id.as_deref())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_invitations", e))?;
        rows.iter()
            .map(invitation_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_row_error("list_invitations", e))
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, id: InvitationId) -> AuthzResult<bool> {
        let result = sqlx::query("DELETE FROM invitations WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_invitation", e))?;
        Ok(result.rows_affected() > 0)
    }
}
