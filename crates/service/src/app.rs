//! Composition root: wires the registry, the stores and every service.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::instrument;

use tessera_authz::{
    Authorizer, Organization, OrganizationDirectory, OrganizationState, PolicyFilter,
    PolicyRepository, PolicyService, RelationFilter, RelationHierarchy, RelationRepository,
    RelationService, RelationTuple, Role, RoleRepository, RoleResolver, RoleService,
};
use tessera_core::schema::relations;
use tessera_core::{AuthzError, AuthzResult, Namespace, ObjectRef, Principal, SchemaRegistry};
use tessera_infra::{
    InMemoryDomainStore, InMemoryInvitationStore, InMemoryOrganizationStore, InMemoryPolicyStore,
    InMemoryRelationStore, InMemoryRoleStore, InMemoryUserStore, PostgresDomainStore,
    PostgresInvitationStore, PostgresOrganizationStore, PostgresPolicyStore,
    PostgresRelationStore, PostgresRoleStore, PostgresUserStore, TesseraConfig,
};
use tessera_membership::{
    DomainRepository, DomainService, InvitationRepository, InvitationService, TxtResolver, User,
    UserDirectory, members,
};

/// One implementation per repository trait.
#[derive(Clone)]
pub struct Stores {
    pub relations: Arc<dyn RelationRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub policies: Arc<dyn PolicyRepository>,
    pub organizations: Arc<dyn OrganizationDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub domains: Arc<dyn DomainRepository>,
    pub invitations: Arc<dyn InvitationRepository>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            relations: Arc::new(InMemoryRelationStore::new()),
            roles: Arc::new(InMemoryRoleStore::new()),
            policies: Arc::new(InMemoryPolicyStore::new()),
            organizations: Arc::new(InMemoryOrganizationStore::new()),
            users: Arc::new(InMemoryUserStore::new()),
            domains: Arc::new(InMemoryDomainStore::new()),
            invitations: Arc::new(InMemoryInvitationStore::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            relations: Arc::new(PostgresRelationStore::new(pool.clone())),
            roles: Arc::new(PostgresRoleStore::new(pool.clone())),
            policies: Arc::new(PostgresPolicyStore::new(pool.clone())),
            organizations: Arc::new(PostgresOrganizationStore::new(pool.clone())),
            users: Arc::new(PostgresUserStore::new(pool.clone())),
            domains: Arc::new(PostgresDomainStore::new(pool.clone())),
            invitations: Arc::new(PostgresInvitationStore::new(pool)),
        }
    }
}

#[derive(Clone)]
pub struct Tessera {
    registry: Arc<SchemaRegistry>,
    stores: Stores,
    relations: RelationService,
    roles: RoleService,
    policies: PolicyService,
    authorizer: Authorizer,
    domains: Arc<DomainService>,
    invitations: Arc<InvitationService>,
}

impl Tessera {
    pub fn new(
        registry: SchemaRegistry,
        stores: Stores,
        config: &TesseraConfig,
        resolver: Arc<dyn TxtResolver>,
    ) -> Self {
        let registry = Arc::new(registry);
        let relations = RelationService::new(registry.clone(), stores.relations.clone());
        let roles = RoleService::new(registry.clone(), stores.roles.clone());
        let role_resolver = Arc::new(RoleResolver::new(
            registry.clone(),
            stores.relations.clone(),
            stores.policies.clone(),
            stores.roles.clone(),
        ));
        let policies = PolicyService::new(
            registry.clone(),
            stores.policies.clone(),
            stores.roles.clone(),
            role_resolver.clone(),
        );
        let hierarchy = Arc::new(RelationHierarchy::new(
            registry.clone(),
            stores.relations.clone(),
            stores.organizations.clone(),
        ));
        let authorizer = Authorizer::new(
            relations.clone(),
            role_resolver,
            hierarchy,
            config.check_settings(),
        );
        let domains = Arc::new(DomainService::new(
            stores.domains.clone(),
            stores.organizations.clone(),
            stores.users.clone(),
            relations.clone(),
            resolver,
            config.membership_settings(),
        ));
        let invitations = Arc::new(InvitationService::new(
            stores.invitations.clone(),
            stores.organizations.clone(),
            stores.users.clone(),
            relations.clone(),
            policies.clone(),
            config.membership_settings(),
        ));

        Self {
            registry,
            stores,
            relations,
            roles,
            policies,
            authorizer,
            domains,
            invitations,
        }
    }

    /// Base schema over the in-memory stores.
    pub fn in_memory(config: &TesseraConfig, resolver: Arc<dyn TxtResolver>) -> Self {
        Self::new(SchemaRegistry::base(), Stores::in_memory(), config, resolver)
    }

    /// Base schema over Postgres. The pool is expected to be migrated.
    pub fn postgres(pool: PgPool, config: &TesseraConfig, resolver: Arc<dyn TxtResolver>) -> Self {
        Self::new(SchemaRegistry::base(), Stores::postgres(pool), config, resolver)
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn relations(&self) -> &RelationService {
        &self.relations
    }

    pub fn roles(&self) -> &RoleService {
        &self.roles
    }

    pub fn policies(&self) -> &PolicyService {
        &self.policies
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    pub fn domains(&self) -> &DomainService {
        &self.domains
    }

    pub fn invitations(&self) -> &InvitationService {
        &self.invitations
    }

    pub fn organizations(&self) -> &Arc<dyn OrganizationDirectory> {
        &self.stores.organizations
    }

    pub fn users(&self) -> &Arc<dyn UserDirectory> {
        &self.stores.users
    }

    pub async fn seed_roles(&self) -> AuthzResult<Vec<Role>> {
        tessera_infra::seed_roles(&self.roles).await
    }

    pub async fn register_user(&self, user: User) -> AuthzResult<User> {
        self.stores.users.insert(user).await
    }

    /// Create an organization attached to the platform and owned by `owner`.
    ///
    /// Both tuples are written together; if that write fails the organization record is
    /// removed again.
    #[instrument(skip(self, owner), fields(owner = %owner), err)]
    pub async fn create_organization(
        &self,
        id: &str,
        name: &str,
        owner: &Principal,
    ) -> AuthzResult<Organization> {
        if id.trim().is_empty() {
            return Err(AuthzError::invalid_detail("organization id is empty"));
        }
        let org = self
            .stores
            .organizations
            .insert(Organization::new(id, name))
            .await?;
        let object = org.object();
        let tuples = vec![
            RelationTuple::new(
                ObjectRef::platform().as_subject(),
                relations::PLATFORM,
                object.clone(),
            ),
            RelationTuple::new(owner.as_subject(), relations::OWNER, object),
        ];
        if let Err(err) = self.relations.ensure_all(tuples).await {
            if let Err(cleanup) = self.stores.organizations.delete(&org.id).await {
                tracing::warn!(org = %org.id, error = %cleanup, "organization cleanup failed");
            }
            return Err(err);
        }
        tracing::info!(org = %org.id, "organization created");
        Ok(org)
    }

    pub async fn create_project(
        &self,
        org_id: &str,
        project_id: &str,
        owner: &Principal,
    ) -> AuthzResult<ObjectRef> {
        self.create_child(org_id, ObjectRef::project(project_id), owner)
            .await
    }

    pub async fn create_group(
        &self,
        org_id: &str,
        group_id: &str,
        owner: &Principal,
    ) -> AuthzResult<ObjectRef> {
        self.create_child(org_id, ObjectRef::group(group_id), owner)
            .await
    }

    #[instrument(skip(self, owner), fields(owner = %owner), err)]
    async fn create_child(
        &self,
        org_id: &str,
        object: ObjectRef,
        owner: &Principal,
    ) -> AuthzResult<ObjectRef> {
        self.require_enabled(org_id).await?;
        let org_link = RelationTuple::new(
            ObjectRef::organization(org_id).as_subject(),
            relations::ORG,
            object.clone(),
        );
        if self
            .relations
            .list(&RelationFilter::default().object(&object).relation_name(relations::ORG))
            .await?
            .iter()
            .any(|r| r.subject.id != org_id)
        {
            return Err(AuthzError::conflict(format!(
                "{object} already belongs to another organization"
            )));
        }
        self.relations
            .ensure_all(vec![
                org_link,
                RelationTuple::new(owner.as_subject(), relations::OWNER, object.clone()),
            ])
            .await?;
        tracing::info!(org = org_id, %object, "resource created");
        Ok(object)
    }

    /// Returns `false` when the user was already a member.
    pub async fn add_group_member(&self, group_id: &str, user_id: &str) -> AuthzResult<bool> {
        members::add_group_member(&self.relations, group_id, user_id).await
    }

    pub async fn disable_organization(&self, org_id: &str) -> AuthzResult<Organization> {
        self.set_organization_state(org_id, OrganizationState::Disabled)
            .await
    }

    pub async fn enable_organization(&self, org_id: &str) -> AuthzResult<Organization> {
        self.set_organization_state(org_id, OrganizationState::Enabled)
            .await
    }

    async fn set_organization_state(
        &self,
        org_id: &str,
        state: OrganizationState,
    ) -> AuthzResult<Organization> {
        let org = self.stores.organizations.set_state(org_id, state).await?;
        tracing::info!(org = %org.id, state = state.as_str(), "organization state changed");
        Ok(org)
    }

    /// Remove a group together with every tuple and policy that references it.
    ///
    /// Returns the number of relations removed; `NotExist` when nothing referenced it.
    #[instrument(skip(self), err)]
    pub async fn delete_group(&self, group_id: &str) -> AuthzResult<usize> {
        let group = ObjectRef::group(group_id);
        let as_object = self
            .relations
            .delete_matching(&RelationFilter::default().object(&group))
            .await?;
        // includes subject sets (`group:G#member`) held on other resources
        let as_subject = self
            .relations
            .delete_matching(&RelationFilter::default().subject(&group.as_subject()))
            .await?;
        let policies = self
            .policies
            .delete_matching(&PolicyFilter::default().principal(Namespace::GROUP, group_id))
            .await?
            + self
                .policies
                .delete_matching(&PolicyFilter::default().resource(&group))
                .await?;

        let removed = as_object + as_subject;
        if removed == 0 && policies == 0 {
            return Err(AuthzError::not_exist(format!("group {group_id}")));
        }
        tracing::info!(group = group_id, relations = removed, policies, "group deleted");
        Ok(removed)
    }

    async fn require_enabled(&self, org_id: &str) -> AuthzResult<Organization> {
        let org = self
            .stores
            .organizations
            .get(org_id)
            .await?
            .ok_or_else(|| AuthzError::not_exist(format!("organization {org_id}")))?;
        if !org.is_enabled() {
            return Err(AuthzError::Disabled(org.id));
        }
        Ok(org)
    }
}
