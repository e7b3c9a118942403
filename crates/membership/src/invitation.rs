//! Organization invitations.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use tessera_authz::{NewPolicy, OrganizationDirectory, PolicyService, RelationService};
use tessera_core::{AuthzError, AuthzResult, Entity, InvitationId, Namespace, ObjectRef, RoleId};

use crate::email::email_domain;
use crate::members;
use crate::settings::MembershipSettings;
use crate::user::UserDirectory;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: InvitationId,
    /// Invitee email.
    pub user_id: String,
    pub org_id: String,
    pub group_ids: Vec<String>,
    pub role_ids: Vec<RoleId>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Invitation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted_at.is_some()
    }
}

impl Entity for Invitation {
    type Id = InvitationId;

    fn id(&self) -> InvitationId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvitation {
    pub user_id: String,
    pub org_id: String,
    #[serde(default)]
    pub group_ids: Vec<String>,
    #[serde(default)]
    pub role_ids: Vec<RoleId>,
    #[serde(default)]
    pub metadata: JsonValue,
    /// Defaults to now plus the configured invitation horizon.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewInvitation {
    pub fn new(org_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            org_id: org_id.into(),
            group_ids: Vec::new(),
            role_ids: Vec::new(),
            metadata: JsonValue::Null,
            expires_at: None,
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_ids = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = RoleId>) -> Self {
        self.role_ids = roles.into_iter().collect();
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationFilter {
    pub org_id: Option<String>,
    pub user_id: Option<String>,
}

impl InvitationFilter {
    pub fn org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn matches(&self, invitation: &Invitation) -> bool {
        self.org_id.as_ref().is_none_or(|o| *o == invitation.org_id)
            && self
                .user_id
                .as_ref()
                .is_none_or(|u| u.eq_ignore_ascii_case(&invitation.user_id))
    }
}

#[async_trait]
pub trait InvitationRepository: Send + Sync {
    /// Insert, or replace the stored invitation with the same id.
    async fn upsert(&self, invitation: Invitation) -> AuthzResult<Invitation>;

    async fn get(&self, id: InvitationId) -> AuthzResult<Option<Invitation>>;

    async fn list(&self, filter: &InvitationFilter) -> AuthzResult<Vec<Invitation>>;

    async fn delete(&self, id: InvitationId) -> AuthzResult<bool>;
}

pub struct InvitationService {
    repository: Arc<dyn InvitationRepository>,
    organizations: Arc<dyn OrganizationDirectory>,
    users: Arc<dyn UserDirectory>,
    relations: RelationService,
    policies: PolicyService,
    settings: MembershipSettings,
}

impl InvitationService {
    pub fn new(
        repository: Arc<dyn InvitationRepository>,
        organizations: Arc<dyn OrganizationDirectory>,
        users: Arc<dyn UserDirectory>,
        relations: RelationService,
        policies: PolicyService,
        settings: MembershipSettings,
    ) -> Self {
        Self {
            repository,
            organizations,
            users,
            relations,
            policies,
            settings,
        }
    }

    /// Invite an email address into an organization (and optionally some of its groups).
    ///
    /// A still-pending, unexpired invitation for the same (organization, email) is
    /// refreshed in place and keeps its id.
    pub async fn create(&self, invite: NewInvitation) -> AuthzResult<Invitation> {
        let org = self
            .organizations
            .get(&invite.org_id)
            .await?
            .ok_or_else(|| AuthzError::not_exist(format!("organization {}", invite.org_id)))?;
        if !org.is_enabled() {
            return Err(AuthzError::Disabled(org.id));
        }
        let email = invite.user_id.trim().to_string();
        email_domain(&email)?;

        for group_id in &invite.group_ids {
            if !members::group_belongs_to(&self.relations, group_id, &org.id).await? {
                return Err(AuthzError::invalid_detail(format!(
                    "group {group_id} does not belong to organization {}",
                    org.id
                )));
            }
        }

        if let Some(user) = self.users.get_by_email(&email).await? {
            if members::is_org_member(&self.relations, &org.id, &user.id).await? {
                return Err(AuthzError::conflict(format!(
                    "{email} is already a member of organization {}",
                    org.id
                )));
            }
        }

        let now = Utc::now();
        let pending = self
            .repository
            .list(&InvitationFilter::default().org(org.id.clone()).user(email.clone()))
            .await?
            .into_iter()
            .find(|i| !i.is_accepted() && !i.is_expired(now));

        let role_ids = if self.settings.invite_with_roles {
            invite.role_ids
        } else {
            Vec::new()
        };
        let expires_at = match invite.expires_at {
            Some(at) => at,
            None => now
                .checked_add_signed(self.settings.invitation_ttl)
                .ok_or_else(|| AuthzError::invalid_detail("invitation expiry is out of range"))?,
        };
        let invitation = Invitation {
            id: pending.as_ref().map(|i| i.id).unwrap_or_default(),
            user_id: email,
            org_id: org.id,
            group_ids: invite.group_ids,
            role_ids,
            metadata: invite.metadata,
            created_at: pending.as_ref().map(|i| i.created_at).unwrap_or(now),
            expires_at,
            accepted_at: None,
        };

        let stored = self.repository.upsert(invitation).await?;
        tracing::info!(
            invitation = %stored.id,
            org = %stored.org_id,
            groups = stored.group_ids.len(),
            refreshed = pending.is_some(),
            "invitation created"
        );
        Ok(stored)
    }

    pub async fn get(&self, id: &str) -> AuthzResult<Invitation> {
        let id: InvitationId = id.parse()?;
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| AuthzError::not_exist(format!("invitation {id}")))
    }

    pub async fn list(&self, filter: &InvitationFilter) -> AuthzResult<Vec<Invitation>> {
        self.repository.list(filter).await
    }

    /// Invitations addressed to `email`.
    pub async fn list_by_user(&self, email: &str) -> AuthzResult<Vec<Invitation>> {
        self.repository
            .list(&InvitationFilter::default().user(email.trim()))
            .await
    }

    /// Make the invitee an organization member and a member of every listed group.
    ///
    /// Every listed group must still belong to the organization, otherwise nothing is
    /// written. The membership tuples are written together. Memberships that already
    /// exist are left alone, so a failed acceptance can be retried. Accepting twice is
    /// a no-op; an invitation past its expiry is rejected with `InviteExpired`.
    pub async fn accept(&self, id: &str) -> AuthzResult<()> {
        let mut invitation = self.get(id).await?;
        if invitation.is_accepted() {
            tracing::debug!(invitation = %invitation.id, "invitation already accepted");
            return Ok(());
        }
        let now = Utc::now();
        if invitation.is_expired(now) {
            return Err(AuthzError::InviteExpired);
        }

        let user = self
            .users
            .get_by_email(&invitation.user_id)
            .await?
            .ok_or_else(|| AuthzError::not_exist(format!("user {}", invitation.user_id)))?;

        for group_id in &invitation.group_ids {
            if !members::group_belongs_to(&self.relations, group_id, &invitation.org_id).await? {
                return Err(AuthzError::invalid_detail(format!(
                    "group {group_id} no longer belongs to organization {}",
                    invitation.org_id
                )));
            }
        }

        let mut tuples = Vec::with_capacity(invitation.group_ids.len() + 1);
        if !members::is_org_member(&self.relations, &invitation.org_id, &user.id).await? {
            tuples.push(members::org_member(&invitation.org_id, &user.id));
        }
        tuples.extend(
            invitation
                .group_ids
                .iter()
                .map(|group_id| members::group_member(group_id, &user.id)),
        );
        let written = self.relations.ensure_all(tuples).await?;

        if self.settings.invite_with_roles {
            for role_id in &invitation.role_ids {
                let policy = NewPolicy::new(
                    Namespace::USER,
                    user.id.clone(),
                    ObjectRef::organization(invitation.org_id.clone()),
                    *role_id,
                );
                match self.policies.create(policy).await {
                    Ok(_) | Err(AuthzError::Conflict(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        invitation.accepted_at = Some(now);
        let invitation = self.repository.upsert(invitation).await?;
        tracing::info!(
            invitation = %invitation.id,
            org = %invitation.org_id,
            user = %user.id,
            memberships = written,
            "invitation accepted"
        );
        Ok(())
    }

    /// Remove the invitation record. Memberships granted by an earlier acceptance stay.
    pub async fn delete(&self, id: &str) -> AuthzResult<()> {
        let id: InvitationId = id.parse()?;
        if !self.repository.delete(id).await? {
            return Err(AuthzError::not_exist(format!("invitation {id}")));
        }
        tracing::info!(invitation = %id, "invitation deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn invitation(expires_in: Duration) -> Invitation {
        let now = Utc::now();
        Invitation {
            id: InvitationId::new(),
            user_id: "Ann@Acme.io".into(),
            org_id: "o1".into(),
            group_ids: vec![],
            role_ids: vec![],
            metadata: JsonValue::Null,
            created_at: now,
            expires_at: now + expires_in,
            accepted_at: None,
        }
    }

    #[test]
    fn expiry_is_inclusive_of_the_deadline() {
        let inv = invitation(Duration::hours(1));
        assert!(!inv.is_expired(Utc::now()));
        assert!(inv.is_expired(inv.expires_at));
    }

    #[test]
    fn user_filter_ignores_email_case() {
        let inv = invitation(Duration::hours(1));
        assert!(InvitationFilter::default().user("ann@acme.io").matches(&inv));
        assert!(!InvitationFilter::default().org("o2").matches(&inv));
    }

    #[test]
    fn builder_collects_groups() {
        let invite = NewInvitation::new("o1", "a@b.io").with_groups(["g1", "g2"]);
        assert_eq!(invite.group_ids, vec!["g1".to_string(), "g2".to_string()]);
        assert!(invite.expires_at.is_none());
    }
}
