//! In-memory stores for every repository trait.
//!
//! Intended for tests/dev. Every write is visible to the next read, which is all the
//! check engine requires. Not optimized for performance: filters are linear scans.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tessera_authz::{
    Organization, OrganizationDirectory, OrganizationState, Policy, PolicyFilter,
    PolicyRepository, Relation, RelationFilter, RelationRepository, RelationTuple, Role,
    RoleRepository,
};
use tessera_core::{
    AuthzError, AuthzResult, DomainId, Entity, InvitationId, Namespace, PolicyId, RelationId,
    RoleId,
};
use tessera_membership::{
    Domain, DomainFilter, DomainRepository, DomainState, Invitation, InvitationFilter,
    InvitationRepository, User, UserDirectory,
};

/// Rows kept in insertion order.
#[derive(Debug)]
struct Table<T> {
    rows: RwLock<Vec<T>>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }
}

impl<T: Clone> Table<T> {
    fn read(&self) -> AuthzResult<RwLockReadGuard<'_, Vec<T>>> {
        self.rows
            .read()
            .map_err(|_| AuthzError::storage("lock poisoned"))
    }

    fn write(&self) -> AuthzResult<RwLockWriteGuard<'_, Vec<T>>> {
        self.rows
            .write()
            .map_err(|_| AuthzError::storage("lock poisoned"))
    }

    fn select(&self, pred: impl Fn(&T) -> bool) -> AuthzResult<Vec<T>> {
        Ok(self.read()?.iter().filter(|r| pred(r)).cloned().collect())
    }

    fn find(&self, pred: impl Fn(&T) -> bool) -> AuthzResult<Option<T>> {
        Ok(self.read()?.iter().find(|r| pred(r)).cloned())
    }

    fn remove(&self, pred: impl Fn(&T) -> bool) -> AuthzResult<usize> {
        let mut rows = self.write()?;
        let before = rows.len();
        rows.retain(|r| !pred(r));
        Ok(before - rows.len())
    }
}

impl<T: Clone + Entity> Table<T> {
    fn by_id(&self, id: T::Id) -> AuthzResult<Option<T>> {
        self.find(|r| r.id() == id)
    }

    /// Replace the row with the same id; `NotExist` when absent.
    fn replace(&self, row: T, what: &str) -> AuthzResult<T> {
        let mut rows = self.write()?;
        let slot = rows
            .iter_mut()
            .find(|r| r.id() == row.id())
            .ok_or_else(|| AuthzError::not_exist(format!("{what} {:?}", row.id())))?;
        *slot = row.clone();
        Ok(row)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRelationStore {
    table: Table<Relation>,
}

impl InMemoryRelationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelationRepository for InMemoryRelationStore {
    async fn insert(&self, relation: Relation) -> AuthzResult<Relation> {
        let mut rows = self.table.write()?;
        let tuple = relation.tuple();
        if rows.iter().any(|r| r.matches(&tuple)) {
            return Err(AuthzError::conflict(format!("relation {tuple} exists")));
        }
        rows.push(relation.clone());
        Ok(relation)
    }

    async fn insert_missing(&self, relations: Vec<Relation>) -> AuthzResult<usize> {
        let mut rows = self.table.write()?;
        let mut written = 0;
        for relation in relations {
            let tuple = relation.tuple();
            if !rows.iter().any(|r| r.matches(&tuple)) {
                rows.push(relation);
                written += 1;
            }
        }
        Ok(written)
    }

    async fn get(&self, id: RelationId) -> AuthzResult<Option<Relation>> {
        self.table.by_id(id)
    }

    async fn list(&self, filter: &RelationFilter) -> AuthzResult<Vec<Relation>> {
        self.table.select(|r| filter.matches(r))
    }

    async fn delete(&self, tuple: &RelationTuple) -> AuthzResult<bool> {
        Ok(self.table.remove(|r| r.matches(tuple))? > 0)
    }

    async fn delete_matching(&self, filter: &RelationFilter) -> AuthzResult<usize> {
        self.table.remove(|r| filter.matches(r))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRoleStore {
    table: Table<Role>,
}

impl InMemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleRepository for InMemoryRoleStore {
    async fn insert(&self, role: Role) -> AuthzResult<Role> {
        let mut rows = self.table.write()?;
        if rows.iter().any(|r| r.name == role.name) {
            return Err(AuthzError::conflict(format!("role '{}' exists", role.name)));
        }
        rows.push(role.clone());
        Ok(role)
    }

    async fn get(&self, id: RoleId) -> AuthzResult<Option<Role>> {
        self.table.by_id(id)
    }

    async fn get_by_name(&self, name: &str) -> AuthzResult<Option<Role>> {
        self.table.find(|r| r.name == name)
    }

    async fn list(&self, namespace: Option<&Namespace>) -> AuthzResult<Vec<Role>> {
        self.table
            .select(|r| namespace.is_none_or(|ns| *ns == r.namespace))
    }

    async fn update(&self, role: Role) -> AuthzResult<Role> {
        self.table.replace(role, "role")
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    table: Table<Policy>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyRepository for InMemoryPolicyStore {
    async fn insert(&self, policy: Policy) -> AuthzResult<Policy> {
        let mut rows = self.table.write()?;
        let duplicate = rows.iter().any(|p| {
            p.principal_type == policy.principal_type
                && p.principal_id == policy.principal_id
                && p.resource_type == policy.resource_type
                && p.resource_id == policy.resource_id
                && p.role_id == policy.role_id
        });
        if duplicate {
            return Err(AuthzError::conflict(format!(
                "policy {}:{} on {} with role {} exists",
                policy.principal_type,
                policy.principal_id,
                policy.resource(),
                policy.role_id
            )));
        }
        rows.push(policy.clone());
        Ok(policy)
    }

    async fn get(&self, id: PolicyId) -> AuthzResult<Option<Policy>> {
        self.table.by_id(id)
    }

    async fn list(&self, filter: &PolicyFilter) -> AuthzResult<Vec<Policy>> {
        self.table.select(|p| filter.matches(p))
    }

    async fn delete(&self, id: PolicyId) -> AuthzResult<bool> {
        Ok(self.table.remove(|p| p.id == id)? > 0)
    }

    async fn delete_matching(&self, filter: &PolicyFilter) -> AuthzResult<usize> {
        self.table.remove(|p| filter.matches(p))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOrganizationStore {
    table: Table<Organization>,
}

impl InMemoryOrganizationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrganizationDirectory for InMemoryOrganizationStore {
    async fn get(&self, id: &str) -> AuthzResult<Option<Organization>> {
        self.table.find(|o| o.id == id)
    }

    async fn insert(&self, organization: Organization) -> AuthzResult<Organization> {
        let mut rows = self.table.write()?;
        if rows
            .iter()
            .any(|o| o.id == organization.id || o.name == organization.name)
        {
            return Err(AuthzError::conflict(format!(
                "organization '{}' exists",
                organization.name
            )));
        }
        rows.push(organization.clone());
        Ok(organization)
    }

    async fn list(&self) -> AuthzResult<Vec<Organization>> {
        self.table.select(|_| true)
    }

    async fn set_state(&self, id: &str, state: OrganizationState) -> AuthzResult<Organization> {
        let mut rows = self.table.write()?;
        let org = rows
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| AuthzError::not_exist(format!("organization {id}")))?;
        org.state = state;
        Ok(org.clone())
    }

    async fn delete(&self, id: &str) -> AuthzResult<bool> {
        Ok(self.table.remove(|o| o.id == id)? > 0)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    table: Table<User>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserStore {
    async fn get_by_id(&self, id: &str) -> AuthzResult<Option<User>> {
        self.table.find(|u| u.id == id)
    }

    async fn get_by_email(&self, email: &str) -> AuthzResult<Option<User>> {
        let email = email.trim();
        self.table.find(|u| u.email.eq_ignore_ascii_case(email))
    }

    async fn insert(&self, user: User) -> AuthzResult<User> {
        let mut rows = self.table.write()?;
        if rows
            .iter()
            .any(|u| u.id == user.id || u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(AuthzError::conflict(format!("user {} exists", user.email)));
        }
        rows.push(user.clone());
        Ok(user)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDomainStore {
    table: Table<Domain>,
}

impl InMemoryDomainStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DomainRepository for InMemoryDomainStore {
    async fn insert(&self, domain: Domain) -> AuthzResult<Domain> {
        let mut rows = self.table.write()?;
        if rows
            .iter()
            .any(|d| d.org_id == domain.org_id && d.name == domain.name)
        {
            return Err(AuthzError::conflict(format!(
                "domain {} already registered for organization {}",
                domain.name, domain.org_id
            )));
        }
        rows.push(domain.clone());
        Ok(domain)
    }

    async fn get(&self, id: DomainId) -> AuthzResult<Option<Domain>> {
        self.table.by_id(id)
    }

    async fn list(&self, filter: &DomainFilter) -> AuthzResult<Vec<Domain>> {
        self.table.select(|d| filter.matches(d))
    }

    async fn update(&self, domain: Domain) -> AuthzResult<Domain> {
        self.table.replace(domain, "domain")
    }

    async fn delete(&self, id: DomainId) -> AuthzResult<bool> {
        Ok(self.table.remove(|d| d.id == id)? > 0)
    }

    async fn delete_pending_before(&self, cutoff: DateTime<Utc>) -> AuthzResult<usize> {
        self.table
            .remove(|d| d.state == DomainState::Pending && d.created_at < cutoff)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryInvitationStore {
    table: Table<Invitation>,
}

impl InMemoryInvitationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvitationRepository for InMemoryInvitationStore {
    async fn upsert(&self, invitation: Invitation) -> AuthzResult<Invitation> {
        let mut rows = self.table.write()?;
        match rows.iter_mut().find(|i| i.id == invitation.id) {
            Some(slot) => *slot = invitation.clone(),
            None => rows.push(invitation.clone()),
        }
        Ok(invitation)
    }

    async fn get(&self, id: InvitationId) -> AuthzResult<Option<Invitation>> {
        self.table.by_id(id)
    }

    async fn list(&self, filter: &InvitationFilter) -> AuthzResult<Vec<Invitation>> {
        self.table.select(|i| filter.matches(i))
    }

    async fn delete(&self, id: InvitationId) -> AuthzResult<bool> {
        Ok(self.table.remove(|i| i.id == id)? > 0)
    }
}

#[cfg(test)]
mod tests {
    use tessera_core::{ObjectRef, SubjectRef};

    use super::*;

    fn tuple(user: &str, rel: &str, group: &str) -> RelationTuple {
        RelationTuple::new(
            SubjectRef::new(Namespace::USER, user),
            rel,
            ObjectRef::group(group),
        )
    }

    #[tokio::test]
    async fn relation_insert_rejects_duplicates() {
        let store = InMemoryRelationStore::new();
        store.insert(Relation::from_tuple(tuple("u1", "member", "g1"))).await.unwrap();
        let err = store
            .insert(Relation::from_tuple(tuple("u1", "member", "g1")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::Conflict(_)));

        store.insert(Relation::from_tuple(tuple("u1", "owner", "g1"))).await.unwrap();
        assert_eq!(store.list(&RelationFilter::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn relation_delete_is_exact() {
        let store = InMemoryRelationStore::new();
        store.insert(Relation::from_tuple(tuple("u1", "member", "g1"))).await.unwrap();
        store.insert(Relation::from_tuple(tuple("u1", "owner", "g1"))).await.unwrap();

        assert!(store.delete(&tuple("u1", "member", "g1")).await.unwrap());
        assert!(!store.delete(&tuple("u1", "member", "g1")).await.unwrap());
        assert!(store.exists(&tuple("u1", "owner", "g1")).await.unwrap());
    }

    #[tokio::test]
    async fn delete_matching_cascades_by_object() {
        let store = InMemoryRelationStore::new();
        for (u, g) in [("u1", "g1"), ("u2", "g1"), ("u1", "g2")] {
            store.insert(Relation::from_tuple(tuple(u, "member", g))).await.unwrap();
        }
        let removed = store
            .delete_matching(&RelationFilter::default().object(&ObjectRef::group("g1")))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.list(&RelationFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn insert_missing_skips_stored_and_repeated_tuples() {
        let store = InMemoryRelationStore::new();
        store.insert(Relation::from_tuple(tuple("u1", "member", "g1"))).await.unwrap();
        let written = store
            .insert_missing(vec![
                Relation::from_tuple(tuple("u1", "member", "g1")),
                Relation::from_tuple(tuple("u2", "member", "g1")),
                Relation::from_tuple(tuple("u2", "member", "g1")),
            ])
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(store.list(&RelationFilter::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn users_are_found_by_email_case_insensitively() {
        let users = InMemoryUserStore::new();
        users.insert(User::new("u1", "Ann@Acme.io")).await.unwrap();
        assert_eq!(
            users.get_by_email("ann@acme.io").await.unwrap().map(|u| u.id),
            Some("u1".to_string())
        );
        assert!(matches!(
            users.insert(User::new("u2", "ANN@acme.io")).await,
            Err(AuthzError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn organization_state_changes_require_existing_org() {
        let orgs = InMemoryOrganizationStore::new();
        orgs.insert(Organization::new("o1", "acme")).await.unwrap();
        let updated = orgs.set_state("o1", OrganizationState::Disabled).await.unwrap();
        assert_eq!(updated.state, OrganizationState::Disabled);
        assert!(matches!(
            orgs.set_state("nope", OrganizationState::Enabled).await,
            Err(AuthzError::NotExist(_))
        ));
    }
}
