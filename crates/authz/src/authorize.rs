//! The permission check engine.
//!
//! A check is a pure function of the stores: platform sudo short-circuits to allow,
//! otherwise the object's ownership chain is walked and the permission is looked up in
//! every role the principal holds at each level. A disabled owning organization denies
//! everyone but sudo. Denial is `Ok(false)`; errors only report malformed input or a
//! failing store.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use tessera_core::schema::relations;
use tessera_core::{AuthzError, AuthzResult, ObjectRef, Principal, SchemaRegistry};

use crate::hierarchy::{OrganizationState, ResourceHierarchy, ancestors, owning_organization};
use crate::relation::{RelationFilter, RelationService, RelationTuple};
use crate::resolve::RoleResolver;
use crate::role::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckSettings {
    /// Upper bound on concurrently evaluated pairs in one batch.
    pub max_workers: usize,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self { max_workers: 16 }
    }
}

impl CheckSettings {
    /// Fan-out for a batch of `pairs` items: a quarter of the input, within `1..=max_workers`.
    pub fn workers_for(&self, pairs: usize) -> usize {
        (pairs / 4).clamp(1, self.max_workers.max(1))
    }
}

/// One answered (subject, permission, object) question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckPair {
    /// `relation_name` carries the permission verb.
    pub relation: RelationTuple,
    pub allowed: bool,
}

#[derive(Clone)]
pub struct Authorizer {
    registry: Arc<SchemaRegistry>,
    relations: RelationService,
    resolver: Arc<RoleResolver>,
    hierarchy: Arc<dyn ResourceHierarchy>,
    settings: CheckSettings,
}

impl Authorizer {
    pub fn new(
        relations: RelationService,
        resolver: Arc<RoleResolver>,
        hierarchy: Arc<dyn ResourceHierarchy>,
        settings: CheckSettings,
    ) -> Self {
        Self {
            registry: relations.registry().clone(),
            relations,
            resolver,
            hierarchy,
            settings,
        }
    }

    pub fn settings(&self) -> CheckSettings {
        self.settings
    }

    /// `object` is the `"namespace:id"` encoding.
    pub async fn check(
        &self,
        principal: &Principal,
        permission: &str,
        object: &str,
    ) -> AuthzResult<bool> {
        let object = self.registry.parse_object(object)?;
        self.check_object(principal, permission, &object).await
    }

    pub async fn check_object(
        &self,
        principal: &Principal,
        permission: &str,
        object: &ObjectRef,
    ) -> AuthzResult<bool> {
        validate_permission(permission)?;
        let resolution = Resolution::new(self, principal);
        let allowed = resolution.evaluate(permission, object).await?;
        tracing::debug!(%principal, permission, %object, allowed, "check");
        Ok(allowed)
    }

    /// Evaluate many `(object, permission)` pairs for one principal.
    ///
    /// The result has one entry per input pair, in input order, each equal to what
    /// [`check`](Self::check) returns for the same arguments. Every pair is validated
    /// before anything is evaluated.
    pub async fn batch_check<I, O, P>(
        &self,
        principal: &Principal,
        pairs: I,
    ) -> AuthzResult<Vec<CheckPair>>
    where
        I: IntoIterator<Item = (O, P)>,
        O: AsRef<str>,
        P: AsRef<str>,
    {
        let parsed = pairs
            .into_iter()
            .map(|(object, permission)| {
                let object = self.registry.parse_object(object.as_ref())?;
                let permission = permission.as_ref().to_string();
                validate_permission(&permission)?;
                Ok((object, permission))
            })
            .collect::<AuthzResult<Vec<_>>>()?;

        let resolution = Resolution::new(self, principal);
        let workers = self.settings.workers_for(parsed.len());
        let mut out = Vec::with_capacity(parsed.len());

        for chunk in parsed.chunks(workers) {
            let results = join_all(
                chunk
                    .iter()
                    .map(|(object, permission)| resolution.evaluate(permission, object)),
            )
            .await;
            for ((object, permission), allowed) in chunk.iter().zip(results) {
                out.push(CheckPair {
                    relation: RelationTuple::new(
                        principal.as_subject(),
                        permission.clone(),
                        object.clone(),
                    ),
                    allowed: allowed?,
                });
            }
        }

        tracing::debug!(
            %principal,
            pairs = out.len(),
            allowed = out.iter().filter(|p| p.allowed).count(),
            workers,
            "batch check"
        );
        Ok(out)
    }

    /// Attach a principal to the platform as `sudo` or `member`. Idempotent.
    pub async fn add_platform_user(
        &self,
        principal: &Principal,
        relation: &str,
    ) -> AuthzResult<()> {
        if relation != relations::SUDO && relation != relations::MEMBER {
            return Err(AuthzError::invalid_detail(format!(
                "platform relation must be '{}' or '{}', got '{relation}'",
                relations::SUDO,
                relations::MEMBER
            )));
        }
        let tuple = RelationTuple::new(principal.as_subject(), relation, ObjectRef::platform());
        if self.relations.ensure(tuple).await? {
            tracing::info!(%principal, relation, "platform user added");
        }
        Ok(())
    }

    /// Detach a principal from the platform entirely; `NotExist` when it was not attached.
    pub async fn remove_platform_user(&self, principal: &Principal) -> AuthzResult<()> {
        let filter = RelationFilter::default()
            .object(&ObjectRef::platform())
            .subject(&principal.as_subject());
        let mut removed = 0;
        for relation in [relations::SUDO, relations::MEMBER] {
            removed += self
                .relations
                .delete_matching(&filter.clone().relation_name(relation))
                .await?;
        }
        if removed == 0 {
            return Err(AuthzError::not_exist(format!("platform user {principal}")));
        }
        tracing::info!(%principal, "platform user removed");
        Ok(())
    }

    pub async fn is_sudo(&self, principal: &Principal) -> AuthzResult<bool> {
        self.relations
            .exists(&RelationTuple::new(
                principal.as_subject(),
                relations::SUDO,
                ObjectRef::platform(),
            ))
            .await
    }
}

fn validate_permission(permission: &str) -> AuthzResult<()> {
    if permission.is_empty() {
        return Err(AuthzError::invalid_detail("permission is empty"));
    }
    Ok(())
}

/// Lookups shared by every pair of one call, each computed at most once.
struct Resolution<'a> {
    authorizer: &'a Authorizer,
    principal: &'a Principal,
    sudo: OnceCell<bool>,
    groups: OnceCell<Arc<Vec<String>>>,
    chains: Memo<ObjectRef, Arc<Vec<ObjectRef>>>,
    org_states: Memo<String, OrganizationState>,
    roles: Memo<ObjectRef, Arc<Vec<Role>>>,
}

impl<'a> Resolution<'a> {
    fn new(authorizer: &'a Authorizer, principal: &'a Principal) -> Self {
        Self {
            authorizer,
            principal,
            sudo: OnceCell::new(),
            groups: OnceCell::new(),
            chains: Memo::default(),
            org_states: Memo::default(),
            roles: Memo::default(),
        }
    }

    async fn evaluate(&self, permission: &str, object: &ObjectRef) -> AuthzResult<bool> {
        if self.is_sudo().await? {
            return Ok(true);
        }

        let chain = self.chain(object).await?;
        if let Some(org) = owning_organization(&chain) {
            if self.org_state(&org.id).await? == OrganizationState::Disabled {
                return Ok(false);
            }
        }

        for level in chain.iter() {
            if self.roles_at(level).await?.iter().any(|r| r.grants(permission)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn is_sudo(&self) -> AuthzResult<bool> {
        self.sudo
            .get_or_try_init(move || self.authorizer.is_sudo(self.principal))
            .await
            .copied()
    }

    async fn groups(&self) -> AuthzResult<Arc<Vec<String>>> {
        self.groups
            .get_or_try_init(move || async move {
                if self.principal.is_user() {
                    let groups = self.authorizer.resolver.groups_of(self.principal.id()).await?;
                    Ok(Arc::new(groups))
                } else {
                    Ok(Arc::new(Vec::new()))
                }
            })
            .await
            .cloned()
    }

    async fn chain(&self, object: &ObjectRef) -> AuthzResult<Arc<Vec<ObjectRef>>> {
        self.chains
            .get_or_try_init(object, move || async move {
                Ok(Arc::new(
                    ancestors(self.authorizer.hierarchy.as_ref(), object).await?,
                ))
            })
            .await
    }

    async fn org_state(&self, org_id: &str) -> AuthzResult<OrganizationState> {
        self.org_states
            .get_or_try_init(&org_id.to_string(), move || {
                self.authorizer.hierarchy.organization_state(org_id)
            })
            .await
    }

    async fn roles_at(&self, level: &ObjectRef) -> AuthzResult<Arc<Vec<Role>>> {
        self.roles
            .get_or_try_init(level, move || async move {
                let groups = self.groups().await?;
                let roles = self
                    .authorizer
                    .resolver
                    .list_roles_with_groups(
                        &self.principal.namespace(),
                        self.principal.id(),
                        &groups,
                        level,
                    )
                    .await?;
                Ok(Arc::new(roles))
            })
            .await
    }
}

/// Keyed set of once-initialized values.
struct Memo<K, V> {
    cells: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Memo<K, V> {
    async fn get_or_try_init<F, Fut>(&self, key: &K, init: F) -> AuthzResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AuthzResult<V>>,
    {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
            cells.entry(key.clone()).or_default().clone()
        };
        cell.get_or_try_init(init).await.cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workers_scale_with_input_and_stay_bounded() {
        let s = CheckSettings { max_workers: 16 };
        assert_eq!(s.workers_for(0), 1);
        assert_eq!(s.workers_for(3), 1);
        assert_eq!(s.workers_for(20), 5);
        assert_eq!(s.workers_for(1_000), 16);

        let zero = CheckSettings { max_workers: 0 };
        assert_eq!(zero.workers_for(100), 1);
    }

    #[tokio::test]
    async fn memo_runs_init_once_per_key() {
        let memo: Memo<&str, usize> = Memo::default();
        let counter = std::sync::atomic::AtomicUsize::new(0);
        let calls = &counter;
        let init = move || async move {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(7)
        };

        assert_eq!(memo.get_or_try_init(&"a", init).await.unwrap(), 7);
        assert_eq!(memo.get_or_try_init(&"a", init).await.unwrap(), 7);
        assert_eq!(memo.get_or_try_init(&"b", init).await.unwrap(), 7);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn memo_retries_after_error() {
        let memo: Memo<u8, u8> = Memo::default();
        let failed = memo
            .get_or_try_init(&1, || async { Err(AuthzError::storage("down")) })
            .await;
        assert!(failed.is_err());
        assert_eq!(memo.get_or_try_init(&1, || async { Ok(3) }).await.unwrap(), 3);
    }
}
