//! Organization email domains: DNS TXT ownership proof and domain-based auto-join.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use tessera_authz::{OrganizationDirectory, RelationService};
use tessera_core::{AuthzError, AuthzResult, DomainId, Entity};

use crate::dns::{LookupError, TxtResolver};
use crate::email::email_domain;
use crate::members;
use crate::settings::MembershipSettings;
use crate::user::UserDirectory;

/// Prefix of the TXT value an organization publishes to prove it owns a domain.
pub const CHALLENGE_PREFIX: &str = "_tessera-domain-verification=";

const TOKEN_BYTES: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainState {
    Pending,
    Verified,
}

impl DomainState {
    pub fn as_str(self) -> &'static str {
        match self {
            DomainState::Pending => "pending",
            DomainState::Verified => "verified",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(DomainState::Pending),
            "verified" => Some(DomainState::Verified),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    pub name: String,
    pub org_id: String,
    /// Expected TXT value.
    pub token: String,
    pub state: DomainState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Domain {
    type Id = DomainId;

    fn id(&self) -> DomainId {
        self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainFilter {
    pub org_id: Option<String>,
    pub name: Option<String>,
    pub state: Option<DomainState>,
}

impl DomainFilter {
    pub fn org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn state(mut self, state: DomainState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn matches(&self, domain: &Domain) -> bool {
        self.org_id.as_ref().is_none_or(|o| *o == domain.org_id)
            && self.name.as_ref().is_none_or(|n| *n == domain.name)
            && self.state.is_none_or(|s| s == domain.state)
    }
}

#[async_trait]
pub trait DomainRepository: Send + Sync {
    /// `Conflict` when the organization already registered the name.
    async fn insert(&self, domain: Domain) -> AuthzResult<Domain>;

    async fn get(&self, id: DomainId) -> AuthzResult<Option<Domain>>;

    async fn list(&self, filter: &DomainFilter) -> AuthzResult<Vec<Domain>>;

    /// `NotExist` when the id is unknown.
    async fn update(&self, domain: Domain) -> AuthzResult<Domain>;

    async fn delete(&self, id: DomainId) -> AuthzResult<bool>;

    /// Drop pending requests created before `cutoff`; returns how many were removed.
    async fn delete_pending_before(&self, cutoff: DateTime<Utc>) -> AuthzResult<usize>;
}

/// Trim, lower-case and require at least one inner dot.
pub fn normalize_domain(raw: &str) -> AuthzResult<String> {
    let name = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    let valid = name.contains('.')
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !valid {
        return Err(AuthzError::invalid_detail(format!("'{raw}' is not a domain name")));
    }
    Ok(name)
}

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes[..]);
    format!("{CHALLENGE_PREFIX}{}", STANDARD.encode(bytes))
}

pub struct DomainService {
    repository: Arc<dyn DomainRepository>,
    organizations: Arc<dyn OrganizationDirectory>,
    users: Arc<dyn UserDirectory>,
    relations: RelationService,
    resolver: Arc<dyn TxtResolver>,
    settings: MembershipSettings,
}

impl DomainService {
    pub fn new(
        repository: Arc<dyn DomainRepository>,
        organizations: Arc<dyn OrganizationDirectory>,
        users: Arc<dyn UserDirectory>,
        relations: RelationService,
        resolver: Arc<dyn TxtResolver>,
        settings: MembershipSettings,
    ) -> Self {
        Self {
            repository,
            organizations,
            users,
            relations,
            resolver,
            settings,
        }
    }

    /// Register a domain for an organization in `Pending` state with a fresh token.
    pub async fn create(&self, org_id: &str, name: &str) -> AuthzResult<Domain> {
        let name = normalize_domain(name)?;
        let org = self
            .organizations
            .get(org_id)
            .await?
            .ok_or_else(|| AuthzError::not_exist(format!("organization {org_id}")))?;
        if !org.is_enabled() {
            return Err(AuthzError::Disabled(org.id));
        }

        let now = Utc::now();
        let domain = self
            .repository
            .insert(Domain {
                id: DomainId::new(),
                name,
                org_id: org.id,
                token: generate_token(),
                state: DomainState::Pending,
                created_at: now,
                updated_at: now,
            })
            .await?;
        tracing::info!(
            domain = %domain.name,
            org = %domain.org_id,
            id = %domain.id,
            "domain registered"
        );
        Ok(domain)
    }

    pub async fn get(&self, id: &str) -> AuthzResult<Domain> {
        let id: DomainId = id.parse()?;
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| AuthzError::not_exist(format!("domain {id}")))
    }

    pub async fn list(&self, filter: &DomainFilter) -> AuthzResult<Vec<Domain>> {
        self.repository.list(filter).await
    }

    pub async fn delete(&self, id: &str) -> AuthzResult<()> {
        let id: DomainId = id.parse()?;
        if !self.repository.delete(id).await? {
            return Err(AuthzError::not_exist(format!("domain {id}")));
        }
        tracing::info!(%id, "domain deleted");
        Ok(())
    }

    /// Look up the domain's TXT records and flip it to `Verified` when one carries the token.
    ///
    /// * `InvalidDomain`: the name does not resolve.
    /// * `TxtRecordNotFound`: it resolves but no record matches.
    /// * `Unavailable`: the resolver failed or exceeded the configured timeout.
    pub async fn verify_domain(&self, id: &str) -> AuthzResult<Domain> {
        let mut domain = self.get(id).await?;
        if domain.state == DomainState::Verified {
            return Ok(domain);
        }

        let lookup = tokio::time::timeout(
            self.settings.dns_timeout,
            self.resolver.lookup_txt(&domain.name),
        )
        .await
        .map_err(|_| {
            AuthzError::Unavailable(format!(
                "TXT lookup for {} timed out after {:?}",
                domain.name, self.settings.dns_timeout
            ))
        })?;

        let records = match lookup {
            Ok(records) => records,
            Err(LookupError::NoSuchHost(_)) => return Err(AuthzError::InvalidDomain(domain.name)),
            Err(LookupError::Failed(e)) => {
                return Err(AuthzError::Unavailable(format!(
                    "TXT lookup for {}: {e}",
                    domain.name
                )));
            }
        };

        let token = domain.token.trim();
        if !records.iter().any(|r| r.trim() == token) {
            tracing::debug!(
                domain = %domain.name,
                records = records.len(),
                "verification token not published"
            );
            return Err(AuthzError::TxtRecordNotFound(domain.name));
        }

        domain.state = DomainState::Verified;
        domain.updated_at = Utc::now();
        let domain = self.repository.update(domain).await?;
        tracing::info!(domain = %domain.name, org = %domain.org_id, "domain verified");
        Ok(domain)
    }

    /// Join `org_id` as a member on the strength of the user's email domain.
    ///
    /// Succeeds without writing when the user already belongs to the organization.
    /// `DomainsMisMatch` when none of the organization's verified domains matches.
    pub async fn join(&self, org_id: &str, user_id: &str) -> AuthzResult<()> {
        let org = self
            .organizations
            .get(org_id)
            .await?
            .ok_or_else(|| AuthzError::not_exist(format!("organization {org_id}")))?;
        if !org.is_enabled() {
            return Err(AuthzError::Disabled(org.id));
        }
        let user = self
            .users
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| AuthzError::not_exist(format!("user {user_id}")))?;

        if members::is_org_member(&self.relations, &org.id, &user.id).await? {
            return Ok(());
        }

        let user_domain = email_domain(&user.email)?;
        let verified = self
            .repository
            .list(
                &DomainFilter::default()
                    .org(org.id.clone())
                    .state(DomainState::Verified),
            )
            .await?;
        if !verified.iter().any(|d| d.name == user_domain) {
            return Err(AuthzError::DomainsMisMatch);
        }

        members::add_org_member(&self.relations, &org.id, &user.id).await?;
        tracing::info!(
            org = %org.id,
            user = %user.id,
            domain = %user_domain,
            "joined organization by domain"
        );
        Ok(())
    }

    /// Organizations whose verified domains match `email` and that the user has not joined.
    pub async fn list_joinable_orgs(&self, email: &str) -> AuthzResult<Vec<String>> {
        let user_domain = email_domain(email)?;
        let domains = self
            .repository
            .list(
                &DomainFilter::default()
                    .name(user_domain)
                    .state(DomainState::Verified),
            )
            .await?;

        let joined = match self.users.get_by_email(email).await? {
            Some(user) => members::organizations_of(&self.relations, &user.id).await?,
            None => Vec::new(),
        };

        let mut orgs: Vec<String> = domains
            .into_iter()
            .map(|d| d.org_id)
            .filter(|org| !joined.contains(org))
            .collect();
        orgs.sort();
        orgs.dedup();
        Ok(orgs)
    }

    /// Purge pending requests older than the configured horizon, relative to `now`.
    pub async fn delete_expired_requests(&self, now: DateTime<Utc>) -> AuthzResult<usize> {
        let cutoff = now
            .checked_sub_signed(self.settings.domain_request_ttl)
            .ok_or_else(|| AuthzError::invalid_detail("domain request horizon is out of range"))?;
        let removed = self.repository.delete_pending_before(cutoff).await?;
        if removed > 0 {
            tracing::info!(removed, %cutoff, "expired domain requests deleted");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_carries_prefix_and_forty_random_bytes() {
        let token = generate_token();
        let encoded = token.strip_prefix(CHALLENGE_PREFIX).unwrap();
        assert_eq!(STANDARD.decode(encoded).unwrap().len(), TOKEN_BYTES);
        assert_ne!(token, generate_token());
    }

    #[test]
    fn domain_names_are_normalized() {
        assert_eq!(normalize_domain("  Example.COM. ").unwrap(), "example.com");
        assert_eq!(normalize_domain("a-b.co.uk").unwrap(), "a-b.co.uk");
        for bad in ["", "localhost", ".com", "a..b", "exa mple.com", "ex@mple.com"] {
            assert!(normalize_domain(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn filter_matches_all_set_fields() {
        let d = Domain {
            id: DomainId::new(),
            name: "acme.io".into(),
            org_id: "o1".into(),
            token: generate_token(),
            state: DomainState::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(DomainFilter::default().matches(&d));
        assert!(DomainFilter::default().org("o1").name("acme.io").matches(&d));
        assert!(!DomainFilter::default().state(DomainState::Verified).matches(&d));
        assert!(!DomainFilter::default().org("o2").matches(&d));
    }
}
