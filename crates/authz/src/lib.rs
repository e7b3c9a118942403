//! `tessera-authz`: relation tuples, roles, policies and the permission check engine.
//!
//! Storage is abstracted behind the `*Repository` traits; `tessera-infra` provides the
//! in-memory and Postgres implementations.

pub mod authorize;
pub mod catalog;
pub mod hierarchy;
pub mod permissions;
pub mod policy;
pub mod relation;
pub mod resolve;
pub mod role;

pub use authorize::{Authorizer, CheckPair, CheckSettings};
pub use catalog::predefined_roles;
pub use hierarchy::{
    Organization, OrganizationDirectory, OrganizationState, RelationHierarchy, ResourceHierarchy,
};
pub use policy::{NewPolicy, Policy, PolicyFilter, PolicyRepository, PolicyService};
pub use relation::{
    ObjectFilter, Relation, RelationFilter, RelationRepository, RelationService, RelationTuple,
    SubjectFilter,
};
pub use resolve::RoleResolver;
pub use role::{NewRole, Role, RoleRepository, RoleService};
