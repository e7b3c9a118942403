//! Surrogate identifiers for stored records.
//!
//! Every record kind shares one uuid-backed [`Id`], kept apart at the type level by a
//! zero-sized kind marker.

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthzError;

/// Names the record kind an [`Id`] belongs to.
pub trait IdKind {
    const NAME: &'static str;
}

/// Time-ordered (UUIDv7) identifier of a `K` record.
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Id<K: IdKind> {
    uuid: Uuid,
    #[serde(skip)]
    kind: PhantomData<fn() -> K>,
}

impl<K: IdKind> Id<K> {
    /// Fresh identifier; ids sort in creation order.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            kind: PhantomData,
        }
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.uuid
    }
}

// Derives would bound the marker type.

impl<K: IdKind> Clone for Id<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: IdKind> Copy for Id<K> {}

impl<K: IdKind> PartialEq for Id<K> {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl<K: IdKind> Eq for Id<K> {}

impl<K: IdKind> PartialOrd for Id<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: IdKind> Ord for Id<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uuid.cmp(&other.uuid)
    }
}

impl<K: IdKind> Hash for Id<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl<K: IdKind> Default for Id<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: IdKind> fmt::Debug for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", K::NAME, self.uuid)
    }
}

impl<K: IdKind> fmt::Display for Id<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.uuid, f)
    }
}

impl<K: IdKind> From<Uuid> for Id<K> {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl<K: IdKind> From<Id<K>> for Uuid {
    fn from(id: Id<K>) -> Self {
        id.uuid
    }
}

impl<K: IdKind> FromStr for Id<K> {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s.trim())
            .map(Self::from_uuid)
            .map_err(|e| AuthzError::invalid_id(format!("{}: {e}", K::NAME)))
    }
}

macro_rules! id_kinds {
    ($($(#[$doc:meta])* $alias:ident => $kind:ident;)*) => {
        $(
            #[doc(hidden)]
            #[derive(Debug)]
            pub enum $kind {}

            impl IdKind for $kind {
                const NAME: &'static str = stringify!($alias);
            }

            $(#[$doc])*
            pub type $alias = Id<$kind>;
        )*
    };
}

id_kinds! {
    /// A stored relation tuple.
    RelationId => RelationKind;
    /// A policy binding a principal to a role on a resource.
    PolicyId => PolicyKind;
    RoleId => RoleKind;
    /// An organization domain record.
    DomainId => DomainKind;
    InvitationId => InvitationKind;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn malformed_uuid_names_the_kind() {
        let err = "not-a-uuid".parse::<RelationId>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidId);
        assert!(err.to_string().contains("RelationId"));
    }

    #[test]
    fn display_parses_back() {
        let id = PolicyId::new();
        let parsed: PolicyId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(format!("{id:?}"), format!("PolicyId({id})"));
    }

    #[test]
    fn serializes_as_a_bare_uuid() {
        let id = DomainId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: DomainId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
