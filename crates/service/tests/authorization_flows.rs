//! End-to-end flows over the in-memory stores with a scripted DNS resolver.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use tessera_authz::{NewPolicy, RelationFilter, RelationTuple};
use tessera_core::schema::relations;
use tessera_core::{ErrorKind, Namespace, ObjectRef, Principal};
use tessera_infra::TesseraConfig;
use tessera_membership::{DomainState, LookupError, NewInvitation, TxtResolver, User};
use tessera_service::Tessera;

enum Answer {
    Records(Vec<String>),
    NoSuchHost,
    Slow,
}

#[derive(Default)]
struct ScriptedResolver {
    answers: Mutex<HashMap<String, Answer>>,
}

impl ScriptedResolver {
    fn answer(&self, host: &str, answer: Answer) {
        self.answers.lock().unwrap().insert(host.to_string(), answer);
    }
}

#[async_trait]
impl TxtResolver for ScriptedResolver {
    async fn lookup_txt(&self, host: &str) -> Result<Vec<String>, LookupError> {
        let scripted = {
            let answers = self.answers.lock().unwrap();
            match answers.get(host) {
                Some(Answer::Records(records)) => Ok(records.clone()),
                Some(Answer::NoSuchHost) => Err(LookupError::NoSuchHost(host.to_string())),
                Some(Answer::Slow) => Err(LookupError::Failed("slow".into())),
                None => Ok(Vec::new()),
            }
        };
        if matches!(&scripted, Err(LookupError::Failed(_))) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        scripted
    }
}

struct World {
    tessera: Tessera,
    dns: Arc<ScriptedResolver>,
}

async fn world() -> World {
    let config = TesseraConfig {
        dns_timeout_ms: 50,
        batch_max_workers: 4,
        ..TesseraConfig::default()
    };
    let dns = Arc::new(ScriptedResolver::default());
    let tessera = Tessera::in_memory(&config, dns.clone());
    tessera.seed_roles().await.unwrap();

    let alice = Principal::user("alice");
    tessera.create_organization("acme", "Acme", &alice).await.unwrap();
    tessera.create_project("acme", "rocket", &alice).await.unwrap();
    tessera.create_group("acme", "eng", &alice).await.unwrap();
    tessera.create_group("acme", "ops", &alice).await.unwrap();

    World { tessera, dns }
}

async fn relation_count(tessera: &Tessera) -> usize {
    tessera
        .relations()
        .list(&RelationFilter::default())
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn grant_then_revoke_through_a_relation() {
    let w = world().await;
    let authz = w.tessera.authorizer();
    let bob = Principal::user("bob");
    let owner_role = w.tessera.roles().get_by_name("project_owner").await.unwrap();

    for permission in &owner_role.permissions {
        assert!(!authz.check(&bob, permission, "project:rocket").await.unwrap());
    }

    let tuple =
        RelationTuple::new(bob.as_subject(), relations::OWNER, ObjectRef::project("rocket"));
    w.tessera.relations().create(tuple.clone()).await.unwrap();
    for permission in &owner_role.permissions {
        assert!(
            authz.check(&bob, permission, "project:rocket").await.unwrap(),
            "{permission}"
        );
    }

    w.tessera.relations().delete(&tuple).await.unwrap();
    for permission in &owner_role.permissions {
        assert!(!authz.check(&bob, permission, "project:rocket").await.unwrap());
    }
}

#[tokio::test]
async fn duplicate_relation_is_a_conflict() {
    let w = world().await;
    let tuple = RelationTuple::new(
        Principal::user("alice").as_subject(),
        relations::OWNER,
        ObjectRef::organization("acme"),
    );
    let err = w.tessera.relations().create(tuple).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn organization_role_is_inherited_by_projects() {
    let w = world().await;
    let dave = Principal::user("dave");
    let manager = w
        .tessera
        .roles()
        .get_by_name("organization_manager")
        .await
        .unwrap();
    assert!(!w.tessera.authorizer().check(&dave, "get", "project:rocket").await.unwrap());

    w.tessera
        .policies()
        .create(NewPolicy::new(
            Namespace::USER,
            "dave",
            ObjectRef::organization("acme"),
            manager.id,
        ))
        .await
        .unwrap();

    assert!(w.tessera.authorizer().check(&dave, "get", "project:rocket").await.unwrap());
    assert!(
        w.tessera
            .relations()
            .list(
                &RelationFilter::default()
                    .object(&ObjectRef::project("rocket"))
                    .subject(&dave.as_subject())
            )
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn sudo_overrides_a_disabled_organization() {
    let w = world().await;
    let root = Principal::user("root");
    w.tessera
        .authorizer()
        .add_platform_user(&root, relations::SUDO)
        .await
        .unwrap();
    w.tessera.disable_organization("acme").await.unwrap();

    for (permission, object) in [
        ("get", "project:rocket"),
        ("delete", "organization:acme"),
        ("whatever", "group:eng"),
    ] {
        assert!(w.tessera.authorizer().check(&root, permission, object).await.unwrap());
    }
}

#[tokio::test]
async fn disabled_organization_denies_non_sudo() {
    let w = world().await;
    let alice = Principal::user("alice");
    assert!(w.tessera.authorizer().check(&alice, "get", "project:rocket").await.unwrap());

    w.tessera.disable_organization("acme").await.unwrap();
    assert!(!w.tessera.authorizer().check(&alice, "get", "project:rocket").await.unwrap());
    let err = w
        .tessera
        .create_project("acme", "satellite", &alice)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Disabled);

    w.tessera.enable_organization("acme").await.unwrap();
    assert!(w.tessera.authorizer().check(&alice, "get", "project:rocket").await.unwrap());
}

#[tokio::test]
async fn batch_check_preserves_input_order() {
    let w = world().await;
    let alice = Principal::user("alice");
    let mut pairs = Vec::new();
    for i in 0..23 {
        let object = if i % 3 == 0 { "project:rocket" } else { "group:eng" };
        let permission = if i % 2 == 0 { "get" } else { "launch" };
        pairs.push((object.to_string(), permission.to_string()));
    }

    let out = w
        .tessera
        .authorizer()
        .batch_check(&alice, pairs.clone())
        .await
        .unwrap();
    assert_eq!(out.len(), pairs.len());
    for ((object, permission), pair) in pairs.iter().zip(&out) {
        assert_eq!(pair.relation.object.to_string(), *object);
        assert_eq!(pair.relation.relation_name, *permission);
        assert_eq!(pair.relation.subject, alice.as_subject());
        let single = w
            .tessera
            .authorizer()
            .check(&alice, permission, object)
            .await
            .unwrap();
        assert_eq!(pair.allowed, single);
    }
}

#[tokio::test]
async fn join_without_verified_domain_is_rejected_without_writes() {
    let w = world().await;
    w.tessera
        .register_user(User::new("erin", "erin@acme.io"))
        .await
        .unwrap();
    // pending domains do not count
    w.tessera.domains().create("acme", "acme.io").await.unwrap();

    let before = relation_count(&w.tessera).await;
    let err = w.tessera.domains().join("acme", "erin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DomainsMisMatch);
    assert_eq!(relation_count(&w.tessera).await, before);
}

#[tokio::test]
async fn verified_domain_allows_joining() {
    let w = world().await;
    w.tessera
        .register_user(User::new("erin", "Erin@Acme.io"))
        .await
        .unwrap();
    let domain = w.tessera.domains().create("acme", "ACME.io").await.unwrap();
    assert_eq!(domain.name, "acme.io");
    assert_eq!(domain.state, DomainState::Pending);

    let id = domain.id.to_string();
    let err = w.tessera.domains().verify_domain(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TxtRecordNotFound);

    w.dns.answer(
        "acme.io",
        Answer::Records(vec!["v=spf1 -all".into(), domain.token.clone()]),
    );
    let verified = w.tessera.domains().verify_domain(&id).await.unwrap();
    assert_eq!(verified.state, DomainState::Verified);

    assert_eq!(
        w.tessera.domains().list_joinable_orgs("erin@acme.io").await.unwrap(),
        vec!["acme".to_string()]
    );
    w.tessera.domains().join("acme", "erin").await.unwrap();
    assert!(
        w.tessera
            .authorizer()
            .check(&Principal::user("erin"), "membership", "organization:acme")
            .await
            .unwrap()
    );
    assert!(w.tessera.domains().list_joinable_orgs("erin@acme.io").await.unwrap().is_empty());

    // joining again writes nothing
    let before = relation_count(&w.tessera).await;
    w.tessera.domains().join("acme", "erin").await.unwrap();
    assert_eq!(relation_count(&w.tessera).await, before);
}

#[tokio::test]
async fn dns_failures_map_to_distinct_errors() {
    let w = world().await;
    let missing = w.tessera.domains().create("acme", "gone.example").await.unwrap();
    let slow = w.tessera.domains().create("acme", "slow.example").await.unwrap();
    w.dns.answer("gone.example", Answer::NoSuchHost);
    w.dns.answer("slow.example", Answer::Slow);

    let err = w
        .tessera
        .domains()
        .verify_domain(&missing.id.to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidDomain);

    let err = w
        .tessera
        .domains()
        .verify_domain(&slow.id.to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}

#[tokio::test]
async fn accepted_invitation_grants_org_and_group_membership() {
    let w = world().await;
    w.tessera
        .register_user(User::new("frank", "frank@elsewhere.org"))
        .await
        .unwrap();
    let invitation = w
        .tessera
        .invitations()
        .create(NewInvitation::new("acme", "frank@elsewhere.org").with_groups(["eng", "ops"]))
        .await
        .unwrap();
    let frank = Principal::user("frank");
    assert!(!w.tessera.authorizer().check(&frank, "membership", "group:eng").await.unwrap());

    let id = invitation.id.to_string();
    w.tessera.invitations().accept(&id).await.unwrap();

    let roles = w
        .tessera
        .policies()
        .list_roles("user", "frank", "organization", "acme")
        .await
        .unwrap();
    assert!(roles.iter().any(|r| r.name == "organization_member"));
    for group in ["group:eng", "group:ops"] {
        assert!(w.tessera.authorizer().check(&frank, "membership", group).await.unwrap());
    }
    assert!(w.tessera.invitations().get(&id).await.unwrap().accepted_at.is_some());

    // accepting twice and deleting afterwards leave relations untouched
    let before = relation_count(&w.tessera).await;
    w.tessera.invitations().accept(&id).await.unwrap();
    w.tessera.invitations().delete(&id).await.unwrap();
    assert_eq!(relation_count(&w.tessera).await, before);
    assert!(w.tessera.authorizer().check(&frank, "membership", "group:ops").await.unwrap());

    let err = w.tessera.invitations().get(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotExist);
}

#[tokio::test]
async fn invitation_to_a_foreign_group_is_rejected() {
    let w = world().await;
    let bob = Principal::user("bob");
    w.tessera.create_organization("other", "Other", &bob).await.unwrap();
    w.tessera.create_group("other", "sales", &bob).await.unwrap();

    let err = w
        .tessera
        .invitations()
        .create(NewInvitation::new("acme", "gina@acme.io").with_groups(["sales"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidDetail);
}

#[tokio::test]
async fn invitation_to_a_deleted_group_cannot_be_accepted() {
    let w = world().await;
    w.tessera
        .register_user(User::new("frank", "frank@elsewhere.org"))
        .await
        .unwrap();
    let invitation = w
        .tessera
        .invitations()
        .create(NewInvitation::new("acme", "frank@elsewhere.org").with_groups(["eng"]))
        .await
        .unwrap();
    w.tessera.delete_group("eng").await.unwrap();
    let before = relation_count(&w.tessera).await;

    let id = invitation.id.to_string();
    let err = w.tessera.invitations().accept(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidDetail);

    assert_eq!(relation_count(&w.tessera).await, before);
    let on_group = w
        .tessera
        .relations()
        .list(&RelationFilter::default().object(&ObjectRef::group("eng")))
        .await
        .unwrap();
    assert!(on_group.is_empty());
    let frank = Principal::user("frank");
    let member = w.tessera.authorizer().check(&frank, "membership", "organization:acme");
    assert!(!member.await.unwrap());
    assert!(w.tessera.invitations().get(&id).await.unwrap().accepted_at.is_none());
}

#[tokio::test]
async fn deleting_a_group_removes_everything_it_held() {
    let w = world().await;
    let harry = Principal::user("harry");
    w.tessera.add_group_member("eng", "harry").await.unwrap();
    w.tessera
        .relations()
        .create(RelationTuple::new(
            ObjectRef::group("eng").as_subject().with_sub_relation(relations::MEMBER),
            relations::MEMBER,
            ObjectRef::project("rocket"),
        ))
        .await
        .unwrap();
    assert!(w.tessera.authorizer().check(&harry, "get", "project:rocket").await.unwrap());

    let removed = w.tessera.delete_group("eng").await.unwrap();
    assert!(removed >= 3);
    assert!(!w.tessera.authorizer().check(&harry, "get", "project:rocket").await.unwrap());
    assert!(!w.tessera.authorizer().check(&harry, "membership", "group:eng").await.unwrap());

    let err = w.tessera.delete_group("eng").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotExist);
}

#[tokio::test]
async fn domain_lifecycle_and_purge() {
    let w = world().await;
    let domains = w.tessera.domains();
    let first = domains.create("acme", "acme.io").await.unwrap();
    let err = domains.create("acme", " Acme.IO ").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    domains.create("acme", "acme.dev").await.unwrap();

    let listed = domains
        .list(&tessera_membership::DomainFilter::default().org("acme"))
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);

    domains.delete(&first.id.to_string()).await.unwrap();
    let err = domains.get(&first.id.to_string()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotExist);

    // nothing is old enough yet
    assert_eq!(domains.delete_expired_requests(chrono::Utc::now()).await.unwrap(), 0);
    let later = chrono::Utc::now() + chrono::Duration::days(8);
    assert_eq!(domains.delete_expired_requests(later).await.unwrap(), 1);
}

#[tokio::test]
async fn pending_invitation_is_refreshed_not_duplicated() {
    let w = world().await;
    let invitations = w.tessera.invitations();
    let first = invitations
        .create(NewInvitation::new("acme", "ivy@acme.io"))
        .await
        .unwrap();
    let second = invitations
        .create(NewInvitation::new("acme", "IVY@acme.io").with_groups(["ops"]))
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.group_ids, vec!["ops".to_string()]);

    let mine = invitations.list_by_user("ivy@acme.io").await.unwrap();
    assert_eq!(mine.len(), 1);
}

#[tokio::test]
async fn expired_invitation_cannot_be_accepted() {
    let w = world().await;
    w.tessera
        .register_user(User::new("jack", "jack@acme.io"))
        .await
        .unwrap();
    let invitation = w
        .tessera
        .invitations()
        .create(
            NewInvitation::new("acme", "jack@acme.io")
                .expiring_at(chrono::Utc::now() - chrono::Duration::minutes(1)),
        )
        .await
        .unwrap();

    let before = relation_count(&w.tessera).await;
    let err = w
        .tessera
        .invitations()
        .accept(&invitation.id.to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InviteExpired);
    assert_eq!(relation_count(&w.tessera).await, before);
}

#[tokio::test]
async fn inviting_an_existing_member_is_a_conflict() {
    let w = world().await;
    w.tessera
        .register_user(User::new("alice", "alice@acme.io"))
        .await
        .unwrap();
    let err = w
        .tessera
        .invitations()
        .create(NewInvitation::new("acme", "alice@acme.io"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}
