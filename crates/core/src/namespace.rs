//! Namespace identifiers and the `"namespace:id"` wire encoding.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::{AuthzError, AuthzResult};

/// Separator between namespace and id in the wire encoding.
pub const SEPARATOR: char = ':';

/// Separator between a subject and its sub-relation (`group:g1#member`).
pub const SUB_RELATION_SEPARATOR: char = '#';

/// Id of the single platform object every organization hangs off.
pub const PLATFORM_ID: &str = "platform";

/// Kind of a principal or resource (e.g. `organization`, `user`).
///
/// Namespaces are opaque lower-case strings; the reserved ones are exposed as constants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(Cow<'static, str>);

impl Namespace {
    pub const PLATFORM: Namespace = Namespace(Cow::Borrowed("platform"));
    pub const ORGANIZATION: Namespace = Namespace(Cow::Borrowed("organization"));
    pub const PROJECT: Namespace = Namespace(Cow::Borrowed("project"));
    pub const GROUP: Namespace = Namespace(Cow::Borrowed("group"));
    pub const USER: Namespace = Namespace(Cow::Borrowed("user"));
    pub const SERVICE_USER: Namespace = Namespace(Cow::Borrowed("serviceuser"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Normalize an alias (`org`, `app/user`, ...) into its canonical namespace.
    pub fn canonical(raw: &str) -> Self {
        let trimmed = raw.trim();
        let name = trimmed.strip_prefix("app/").unwrap_or(trimmed);
        match name {
            "platform" => Self::PLATFORM,
            "org" | "organization" => Self::ORGANIZATION,
            "project" => Self::PROJECT,
            "group" => Self::GROUP,
            "user" => Self::USER,
            "serviceuser" | "service_user" => Self::SERVICE_USER,
            other => Self(Cow::Owned(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Namespace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encode a namespace and id as `"namespace:id"`.
pub fn join(namespace: &str, id: &str) -> String {
    format!("{namespace}{SEPARATOR}{id}")
}

/// Split `"namespace:id"` into its halves.
///
/// Only the first separator splits, so ids may themselves contain `:`.
pub fn split(encoded: &str) -> AuthzResult<(&str, &str)> {
    match encoded.split_once(SEPARATOR) {
        Some((ns, id)) if !ns.is_empty() && !id.is_empty() => Ok((ns, id)),
        _ => Err(AuthzError::NamespaceSplitNotation(encoded.to_string())),
    }
}

/// Resource side of a tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: Namespace,
    pub id: String,
}

impl ObjectRef {
    pub fn new(namespace: Namespace, id: impl Into<String>) -> Self {
        Self {
            namespace,
            id: id.into(),
        }
    }

    pub fn platform() -> Self {
        Self::new(Namespace::PLATFORM, PLATFORM_ID)
    }

    pub fn organization(id: impl Into<String>) -> Self {
        Self::new(Namespace::ORGANIZATION, id)
    }

    pub fn project(id: impl Into<String>) -> Self {
        Self::new(Namespace::PROJECT, id)
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self::new(Namespace::GROUP, id)
    }

    /// Parse `"namespace:id"`, normalizing namespace aliases.
    ///
    /// Does not check the namespace against a registry; see
    /// [`SchemaRegistry::parse_object`](crate::schema::SchemaRegistry::parse_object).
    pub fn parse(encoded: &str) -> AuthzResult<Self> {
        let (ns, id) = split(encoded)?;
        Ok(Self::new(Namespace::canonical(ns), id))
    }

    /// The same object viewed as a subject (e.g. an organization as a tuple subject).
    pub fn as_subject(&self) -> SubjectRef {
        SubjectRef::new(self.namespace.clone(), self.id.clone())
    }
}

impl core::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.namespace, self.id)
    }
}

/// Subject side of a tuple, optionally a subject set (`group:g1#member`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectRef {
    pub namespace: Namespace,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_relation: Option<String>,
}

impl SubjectRef {
    pub fn new(namespace: Namespace, id: impl Into<String>) -> Self {
        Self {
            namespace,
            id: id.into(),
            sub_relation: None,
        }
    }

    pub fn with_sub_relation(mut self, relation: impl Into<String>) -> Self {
        self.sub_relation = Some(relation.into());
        self
    }

    /// Parse `"namespace:id"` or `"namespace:id#relation"`.
    pub fn parse(encoded: &str) -> AuthzResult<Self> {
        let (head, sub_relation) = match encoded.split_once(SUB_RELATION_SEPARATOR) {
            Some((_, rel)) if rel.is_empty() => {
                return Err(AuthzError::NamespaceSplitNotation(encoded.to_string()));
            }
            Some((head, rel)) => (head, Some(rel.to_string())),
            None => (encoded, None),
        };
        let (ns, id) = split(head)?;
        Ok(Self {
            namespace: Namespace::canonical(ns),
            id: id.to_string(),
            sub_relation,
        })
    }

    pub fn as_object(&self) -> ObjectRef {
        ObjectRef::new(self.namespace.clone(), self.id.clone())
    }
}

impl core::fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.namespace, self.id)?;
        if let Some(rel) = &self.sub_relation {
            write!(f, "{SUB_RELATION_SEPARATOR}{rel}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn split_rejects_missing_halves() {
        for bad in ["", "organization", "organization:", ":abc", ":"] {
            let err = split(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NamespaceSplitNotation, "{bad}");
        }
    }

    #[test]
    fn split_keeps_colons_in_id() {
        assert_eq!(split("project:a:b").unwrap(), ("project", "a:b"));
    }

    #[test]
    fn aliases_are_normalized() {
        assert_eq!(Namespace::canonical("org"), Namespace::ORGANIZATION);
        assert_eq!(Namespace::canonical("app/user"), Namespace::USER);
        assert_eq!(Namespace::canonical("app/serviceuser"), Namespace::SERVICE_USER);
        assert_eq!(Namespace::canonical("compute/instance").as_str(), "compute/instance");
    }

    #[test]
    fn subject_set_round_trips_through_display() {
        let s = SubjectRef::new(Namespace::GROUP, "g1").with_sub_relation("member");
        assert_eq!(s.to_string(), "group:g1#member");
        assert_eq!(SubjectRef::parse("group:g1#member").unwrap(), s);
        assert!(SubjectRef::parse("group:g1#").is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: split is the inverse of join for non-empty halves.
            #[test]
            fn split_inverts_join(
                ns in "[a-z][a-z/]{0,15}",
                id in "[A-Za-z0-9:_-]{1,40}"
            ) {
                let encoded = join(&ns, &id);
                let (n, i) = split(&encoded).unwrap();
                prop_assert_eq!(n, ns.as_str());
                prop_assert_eq!(i, id.as_str());
            }

            /// Property: strings without a separator never parse.
            #[test]
            fn no_separator_fails_closed(raw in "[a-z0-9_-]{0,30}") {
                prop_assert!(split(&raw).is_err());
                prop_assert!(ObjectRef::parse(&raw).is_err());
            }
        }
    }
}
