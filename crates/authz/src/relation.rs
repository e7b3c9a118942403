//! Relation tuples: the ground truth of "who is related to what, how".

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tessera_core::{
    AuthzError, AuthzResult, Entity, Namespace, ObjectRef, RelationId, SchemaRegistry, SubjectRef,
};

/// The identity of a relation: `subject` has `relation_name` to `object`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationTuple {
    pub subject: SubjectRef,
    pub relation_name: String,
    pub object: ObjectRef,
}

impl RelationTuple {
    pub fn new(subject: SubjectRef, relation_name: impl Into<String>, object: ObjectRef) -> Self {
        Self {
            subject,
            relation_name: relation_name.into(),
            object,
        }
    }
}

impl core::fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation_name, self.subject)
    }
}

/// A stored relation tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    pub object: ObjectRef,
    pub subject: SubjectRef,
    pub relation_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relation {
    pub fn from_tuple(tuple: RelationTuple) -> Self {
        let now = Utc::now();
        Self {
            id: RelationId::new(),
            object: tuple.object,
            subject: tuple.subject,
            relation_name: tuple.relation_name,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn tuple(&self) -> RelationTuple {
        RelationTuple::new(
            self.subject.clone(),
            self.relation_name.clone(),
            self.object.clone(),
        )
    }

    pub fn matches(&self, tuple: &RelationTuple) -> bool {
        self.subject == tuple.subject
            && self.relation_name == tuple.relation_name
            && self.object == tuple.object
    }
}

impl Entity for Relation {
    type Id = RelationId;

    fn id(&self) -> RelationId {
        self.id
    }
}

/// Object half of a [`RelationFilter`]; `id: None` matches any object of the namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFilter {
    pub namespace: Namespace,
    pub id: Option<String>,
}

/// Subject half of a [`RelationFilter`].
///
/// `sub_relation: None` matches any subject; `Some(rel)` only subject sets `ns:id#rel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectFilter {
    pub namespace: Namespace,
    pub id: Option<String>,
    pub sub_relation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationFilter {
    pub object: Option<ObjectFilter>,
    pub subject: Option<SubjectFilter>,
    pub relation_name: Option<String>,
}

impl RelationFilter {
    pub fn object(mut self, object: &ObjectRef) -> Self {
        self.object = Some(ObjectFilter {
            namespace: object.namespace.clone(),
            id: Some(object.id.clone()),
        });
        self
    }

    pub fn object_namespace(mut self, namespace: Namespace) -> Self {
        self.object = Some(ObjectFilter {
            namespace,
            id: None,
        });
        self
    }

    pub fn subject(mut self, subject: &SubjectRef) -> Self {
        self.subject = Some(SubjectFilter {
            namespace: subject.namespace.clone(),
            id: Some(subject.id.clone()),
            sub_relation: subject.sub_relation.clone(),
        });
        self
    }

    pub fn relation_name(mut self, name: impl Into<String>) -> Self {
        self.relation_name = Some(name.into());
        self
    }

    /// Exact-tuple filter.
    pub fn for_tuple(tuple: &RelationTuple) -> Self {
        Self::default()
            .object(&tuple.object)
            .subject(&tuple.subject)
            .relation_name(tuple.relation_name.clone())
    }

    pub fn matches(&self, relation: &Relation) -> bool {
        if let Some(o) = &self.object {
            if relation.object.namespace != o.namespace {
                return false;
            }
            if o.id.as_ref().is_some_and(|id| *id != relation.object.id) {
                return false;
            }
        }
        if let Some(s) = &self.subject {
            if relation.subject.namespace != s.namespace {
                return false;
            }
            if s.id.as_ref().is_some_and(|id| *id != relation.subject.id) {
                return false;
            }
            if s.sub_relation.is_some() && s.sub_relation != relation.subject.sub_relation {
                return false;
            }
        }
        if let Some(name) = &self.relation_name {
            if *name != relation.relation_name {
                return false;
            }
        }
        true
    }
}

/// Durable set of relation tuples.
///
/// Implementations must offer read-your-writes: a successful `insert`/`delete` is
/// visible to the next `list`/`exists` issued by any caller.
#[async_trait]
pub trait RelationRepository: Send + Sync {
    /// Persist a new tuple; `Conflict` when the same `(subject, relation, object)` exists.
    async fn insert(&self, relation: Relation) -> AuthzResult<Relation>;

    /// Insert every relation whose tuple is not stored yet, as one unit: either all
    /// missing tuples are written or none are. Returns how many were written.
    async fn insert_missing(&self, relations: Vec<Relation>) -> AuthzResult<usize>;

    async fn get(&self, id: RelationId) -> AuthzResult<Option<Relation>>;

    async fn list(&self, filter: &RelationFilter) -> AuthzResult<Vec<Relation>>;

    /// Delete by exact tuple match. Returns `false` when nothing matched.
    async fn delete(&self, tuple: &RelationTuple) -> AuthzResult<bool>;

    /// Delete every tuple matching the filter, returning how many were removed.
    async fn delete_matching(&self, filter: &RelationFilter) -> AuthzResult<usize>;

    async fn exists(&self, tuple: &RelationTuple) -> AuthzResult<bool> {
        Ok(!self.list(&RelationFilter::for_tuple(tuple)).await?.is_empty())
    }
}

/// Validated access to the relation store.
#[derive(Clone)]
pub struct RelationService {
    registry: Arc<SchemaRegistry>,
    repository: Arc<dyn RelationRepository>,
}

impl RelationService {
    pub fn new(registry: Arc<SchemaRegistry>, repository: Arc<dyn RelationRepository>) -> Self {
        Self {
            registry,
            repository,
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub async fn create(&self, tuple: RelationTuple) -> AuthzResult<Relation> {
        self.registry
            .validate_tuple(&tuple.subject, &tuple.relation_name, &tuple.object)?;
        let created = self.repository.insert(Relation::from_tuple(tuple)).await?;
        tracing::debug!(relation = %created.tuple(), id = %created.id, "relation created");
        Ok(created)
    }

    /// Create the tuple unless it already exists. Returns `true` when a write happened.
    pub async fn ensure(&self, tuple: RelationTuple) -> AuthzResult<bool> {
        if self.repository.exists(&tuple).await? {
            return Ok(false);
        }
        match self.create(tuple).await {
            Ok(_) => Ok(true),
            Err(AuthzError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Atomic `ensure` over several tuples. All are validated before anything is written.
    pub async fn ensure_all(&self, tuples: Vec<RelationTuple>) -> AuthzResult<usize> {
        for tuple in &tuples {
            self.registry
                .validate_tuple(&tuple.subject, &tuple.relation_name, &tuple.object)?;
        }
        let written = self
            .repository
            .insert_missing(tuples.into_iter().map(Relation::from_tuple).collect())
            .await?;
        tracing::debug!(written, "relations ensured");
        Ok(written)
    }

    pub async fn get(&self, id: &str) -> AuthzResult<Relation> {
        let id: RelationId = id.parse()?;
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| AuthzError::not_exist(format!("relation {id}")))
    }

    pub async fn list(&self, filter: &RelationFilter) -> AuthzResult<Vec<Relation>> {
        self.repository.list(filter).await
    }

    pub async fn exists(&self, tuple: &RelationTuple) -> AuthzResult<bool> {
        self.repository.exists(tuple).await
    }

    /// Delete by exact `(subject, relation, object)` match.
    pub async fn delete(&self, tuple: &RelationTuple) -> AuthzResult<()> {
        if self.repository.delete(tuple).await? {
            tracing::debug!(relation = %tuple, "relation deleted");
            Ok(())
        } else {
            Err(AuthzError::not_exist(format!("relation {tuple}")))
        }
    }

    pub async fn delete_matching(&self, filter: &RelationFilter) -> AuthzResult<usize> {
        let removed = self.repository.delete_matching(filter).await?;
        tracing::debug!(removed, "relations deleted by filter");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(subject: SubjectRef, name: &str, object: ObjectRef) -> Relation {
        Relation::from_tuple(RelationTuple::new(subject, name, object))
    }

    #[test]
    fn filter_matches_by_either_half() {
        let r = rel(
            SubjectRef::new(Namespace::USER, "u1"),
            "member",
            ObjectRef::group("g1"),
        );

        assert!(RelationFilter::default().matches(&r));
        assert!(RelationFilter::default().object(&ObjectRef::group("g1")).matches(&r));
        assert!(
            RelationFilter::default()
                .object_namespace(Namespace::GROUP)
                .subject(&SubjectRef::new(Namespace::USER, "u1"))
                .matches(&r)
        );
        assert!(!RelationFilter::default().object(&ObjectRef::group("g2")).matches(&r));
        assert!(!RelationFilter::default().relation_name("owner").matches(&r));
    }

    #[test]
    fn subject_set_filter_requires_sub_relation() {
        let set = SubjectRef::new(Namespace::GROUP, "g1").with_sub_relation("member");
        let r = rel(set.clone(), "member", ObjectRef::organization("o1"));
        let plain = rel(
            SubjectRef::new(Namespace::GROUP, "g1"),
            "member",
            ObjectRef::organization("o1"),
        );

        let f = RelationFilter::default().subject(&set);
        assert!(f.matches(&r));
        assert!(!f.matches(&plain));
    }

    #[test]
    fn tuple_display_reads_object_first() {
        let t = RelationTuple::new(
            SubjectRef::new(Namespace::USER, "u1"),
            "owner",
            ObjectRef::organization("o1"),
        );
        assert_eq!(t.to_string(), "organization:o1#owner@user:u1");
    }
}
