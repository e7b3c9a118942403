//! `tessera-core`: shared building blocks for the authorization core.
//!
//! This crate contains the namespace registry, the `"namespace:id"` codec, typed ids
//! and the error model. No IO.

pub mod entity;
pub mod error;
pub mod id;
pub mod namespace;
pub mod principal;
pub mod schema;

pub use entity::Entity;
pub use error::{AuthzError, AuthzResult, ErrorKind};
pub use id::{DomainId, Id, IdKind, InvitationId, PolicyId, RelationId, RoleId};
pub use namespace::{Namespace, ObjectRef, PLATFORM_ID, SubjectRef, join, split};
pub use principal::Principal;
pub use schema::{NamespaceDefinition, NamespaceKind, RelationDefinition, SchemaRegistry};
