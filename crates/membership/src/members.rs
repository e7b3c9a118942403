//! Organization and group membership reads/writes shared by domains and invitations.

use tessera_authz::{RelationFilter, RelationService, RelationTuple};
use tessera_core::schema::relations;
use tessera_core::{AuthzResult, Namespace, ObjectRef, SubjectRef};

fn user_subject(user_id: &str) -> SubjectRef {
    SubjectRef::new(Namespace::USER, user_id)
}

/// `organization:O#member@user:U`
pub fn org_member(org_id: &str, user_id: &str) -> RelationTuple {
    RelationTuple::new(
        user_subject(user_id),
        relations::MEMBER,
        ObjectRef::organization(org_id),
    )
}

/// `group:G#member@user:U`
pub fn group_member(group_id: &str, user_id: &str) -> RelationTuple {
    RelationTuple::new(user_subject(user_id), relations::MEMBER, ObjectRef::group(group_id))
}

/// A user belongs to an organization as its `owner` or `member`.
pub async fn is_org_member(
    store: &RelationService,
    org_id: &str,
    user_id: &str,
) -> AuthzResult<bool> {
    let filter = RelationFilter::default()
        .object(&ObjectRef::organization(org_id))
        .subject(&user_subject(user_id));
    Ok(store
        .list(&filter)
        .await?
        .iter()
        .any(|r| {
            r.subject.sub_relation.is_none()
                && (r.relation_name == relations::MEMBER || r.relation_name == relations::OWNER)
        }))
}

/// Organization ids the user directly belongs to.
pub async fn organizations_of(store: &RelationService, user_id: &str) -> AuthzResult<Vec<String>> {
    let filter = RelationFilter::default()
        .object_namespace(Namespace::ORGANIZATION)
        .subject(&user_subject(user_id));
    let mut ids: Vec<String> = store
        .list(&filter)
        .await?
        .into_iter()
        .filter(|r| r.relation_name == relations::MEMBER || r.relation_name == relations::OWNER)
        .map(|r| r.object.id)
        .collect();
    ids.sort();
    ids.dedup();
    Ok(ids)
}

/// Add the user as an organization `member`; returns `false` when already present.
pub async fn add_org_member(
    store: &RelationService,
    org_id: &str,
    user_id: &str,
) -> AuthzResult<bool> {
    if is_org_member(store, org_id, user_id).await? {
        return Ok(false);
    }
    store.ensure(org_member(org_id, user_id)).await
}

/// Add the user as a group `member`; returns `false` when already present.
pub async fn add_group_member(
    store: &RelationService,
    group_id: &str,
    user_id: &str,
) -> AuthzResult<bool> {
    store.ensure(group_member(group_id, user_id)).await
}

/// The group is owned by the organization (`group:G#org@organization:O`).
pub async fn group_belongs_to(
    store: &RelationService,
    group_id: &str,
    org_id: &str,
) -> AuthzResult<bool> {
    store
        .exists(&RelationTuple::new(
            ObjectRef::organization(org_id).as_subject(),
            relations::ORG,
            ObjectRef::group(group_id),
        ))
        .await
}
