//! Resource ownership chains (`project → organization → platform`) and organization state.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tessera_core::{AuthzResult, Namespace, ObjectRef, SchemaRegistry};

use crate::relation::{RelationFilter, RelationRepository};

/// Longest ownership chain walked before giving up on a malformed hierarchy.
pub const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationState {
    Enabled,
    Disabled,
}

impl OrganizationState {
    pub fn as_str(self) -> &'static str {
        match self {
            OrganizationState::Enabled => "enabled",
            OrganizationState::Disabled => "disabled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "enabled" => Some(OrganizationState::Enabled),
            "disabled" => Some(OrganizationState::Disabled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub state: OrganizationState,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: OrganizationState::Enabled,
            created_at: Utc::now(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state == OrganizationState::Enabled
    }

    pub fn object(&self) -> ObjectRef {
        ObjectRef::organization(self.id.clone())
    }
}

#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    async fn get(&self, id: &str) -> AuthzResult<Option<Organization>>;

    /// `Conflict` when the id or name is taken.
    async fn insert(&self, organization: Organization) -> AuthzResult<Organization>;

    async fn list(&self) -> AuthzResult<Vec<Organization>>;

    /// `NotExist` when the id is unknown.
    async fn set_state(&self, id: &str, state: OrganizationState) -> AuthzResult<Organization>;

    async fn delete(&self, id: &str) -> AuthzResult<bool>;
}

/// Parent lookups consumed by the check engine.
#[async_trait]
pub trait ResourceHierarchy: Send + Sync {
    /// Immediate owner of `object`, if any.
    async fn parent(&self, object: &ObjectRef) -> AuthzResult<Option<ObjectRef>>;

    /// Organizations the directory does not know are treated as enabled.
    async fn organization_state(&self, org_id: &str) -> AuthzResult<OrganizationState>;
}

/// Hierarchy read straight from relation tuples: the parent of `ns:id` is the subject of
/// its `ns:id#<parent relation>` tuple.
pub struct RelationHierarchy {
    registry: Arc<SchemaRegistry>,
    relations: Arc<dyn RelationRepository>,
    organizations: Arc<dyn OrganizationDirectory>,
}

impl RelationHierarchy {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        relations: Arc<dyn RelationRepository>,
        organizations: Arc<dyn OrganizationDirectory>,
    ) -> Self {
        Self {
            registry,
            relations,
            organizations,
        }
    }
}

#[async_trait]
impl ResourceHierarchy for RelationHierarchy {
    async fn parent(&self, object: &ObjectRef) -> AuthzResult<Option<ObjectRef>> {
        let Some(parent_relation) = self.registry.parent_relation(&object.namespace) else {
            return Ok(None);
        };
        let filter = RelationFilter::default()
            .object(object)
            .relation_name(parent_relation);
        Ok(self
            .relations
            .list(&filter)
            .await?
            .into_iter()
            .next()
            .map(|r| r.subject.as_object()))
    }

    async fn organization_state(&self, org_id: &str) -> AuthzResult<OrganizationState> {
        Ok(self
            .organizations
            .get(org_id)
            .await?
            .map(|o| o.state)
            .unwrap_or(OrganizationState::Enabled))
    }
}

/// `object` followed by its owners, nearest first, always ending at `platform:platform`.
pub async fn ancestors(
    hierarchy: &dyn ResourceHierarchy,
    object: &ObjectRef,
) -> AuthzResult<Vec<ObjectRef>> {
    let platform = ObjectRef::platform();
    let mut chain = vec![object.clone()];
    let mut visited: HashSet<ObjectRef> = HashSet::from([object.clone()]);
    let mut current = object.clone();

    while current != platform && chain.len() < MAX_DEPTH {
        let Some(parent) = hierarchy.parent(&current).await? else {
            break;
        };
        if !visited.insert(parent.clone()) {
            tracing::warn!(object = %object, at = %parent, "cycle in resource hierarchy");
            break;
        }
        chain.push(parent.clone());
        current = parent;
    }

    if chain.last() != Some(&platform) {
        chain.retain(|o| *o != platform);
        chain.push(platform);
    }
    Ok(chain)
}

/// Owning organization of a chain built by [`ancestors`].
pub fn owning_organization(chain: &[ObjectRef]) -> Option<&ObjectRef> {
    chain.iter().find(|o| o.namespace == Namespace::ORGANIZATION)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct Fixed(HashMap<ObjectRef, ObjectRef>);

    #[async_trait]
    impl ResourceHierarchy for Fixed {
        async fn parent(&self, object: &ObjectRef) -> AuthzResult<Option<ObjectRef>> {
            Ok(self.0.get(object).cloned())
        }

        async fn organization_state(&self, _: &str) -> AuthzResult<OrganizationState> {
            Ok(OrganizationState::Enabled)
        }
    }

    #[tokio::test]
    async fn project_chain_ends_at_platform() {
        let h = Fixed(HashMap::from([(
            ObjectRef::project("p1"),
            ObjectRef::organization("o1"),
        )]));
        let chain = ancestors(&h, &ObjectRef::project("p1")).await.unwrap();
        assert_eq!(
            chain,
            vec![
                ObjectRef::project("p1"),
                ObjectRef::organization("o1"),
                ObjectRef::platform()
            ]
        );
        assert_eq!(owning_organization(&chain), Some(&ObjectRef::organization("o1")));
    }

    #[tokio::test]
    async fn platform_is_its_own_chain() {
        let h = Fixed(HashMap::new());
        let chain = ancestors(&h, &ObjectRef::platform()).await.unwrap();
        assert_eq!(chain, vec![ObjectRef::platform()]);
        assert!(owning_organization(&chain).is_none());
    }

    #[tokio::test]
    async fn cycles_stop_the_walk() {
        let h = Fixed(HashMap::from([
            (ObjectRef::group("a"), ObjectRef::group("b")),
            (ObjectRef::group("b"), ObjectRef::group("a")),
        ]));
        let chain = ancestors(&h, &ObjectRef::group("a")).await.unwrap();
        assert_eq!(
            chain,
            vec![ObjectRef::group("a"), ObjectRef::group("b"), ObjectRef::platform()]
        );
    }

    #[tokio::test]
    async fn depth_is_bounded() {
        let links = (0..100).map(|i| {
            (
                ObjectRef::group(i.to_string()),
                ObjectRef::group((i + 1).to_string()),
            )
        });
        let h = Fixed(links.collect());
        let chain = ancestors(&h, &ObjectRef::group("0")).await.unwrap();
        assert_eq!(chain.len(), MAX_DEPTH + 1);
        assert_eq!(chain.last(), Some(&ObjectRef::platform()));
    }

    #[test]
    fn state_round_trips_through_text() {
        for s in [OrganizationState::Enabled, OrganizationState::Disabled] {
            assert_eq!(OrganizationState::parse(s.as_str()), Some(s));
        }
        assert_eq!(OrganizationState::parse("archived"), None);
    }
}
