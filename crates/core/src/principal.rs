use serde::{Deserialize, Serialize};

use crate::error::{AuthzError, AuthzResult};
use crate::namespace::{Namespace, SubjectRef};

/// The subject of an authorization check.
///
/// A closed variant with an explicit discriminator; callers never dispatch on the
/// namespace string themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Principal {
    User(String),
    ServiceUser(String),
}

impl Principal {
    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }

    pub fn service_user(id: impl Into<String>) -> Self {
        Self::ServiceUser(id.into())
    }

    /// Build a principal from a namespace string and id.
    pub fn from_parts(namespace: &str, id: impl Into<String>) -> AuthzResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(AuthzError::invalid_detail("principal id is empty"));
        }
        match Namespace::canonical(namespace) {
            ns if ns == Namespace::USER => Ok(Self::User(id)),
            ns if ns == Namespace::SERVICE_USER => Ok(Self::ServiceUser(id)),
            other => Err(AuthzError::invalid_detail(format!(
                "namespace '{other}' is not a principal type"
            ))),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Principal::User(id) | Principal::ServiceUser(id) => id,
        }
    }

    pub fn namespace(&self) -> Namespace {
        match self {
            Principal::User(_) => Namespace::USER,
            Principal::ServiceUser(_) => Namespace::SERVICE_USER,
        }
    }

    pub fn as_subject(&self) -> SubjectRef {
        SubjectRef::new(self.namespace(), self.id())
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Principal::User(_))
    }
}

impl core::fmt::Display for Principal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.namespace(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_accepts_aliases_and_rejects_resources() {
        assert_eq!(
            Principal::from_parts("app/user", "u1").unwrap(),
            Principal::user("u1")
        );
        assert_eq!(
            Principal::from_parts("serviceuser", "s1").unwrap(),
            Principal::service_user("s1")
        );
        assert!(Principal::from_parts("organization", "o1").is_err());
        assert!(Principal::from_parts("user", "").is_err());
    }

    #[test]
    fn serializes_with_discriminator() {
        let json = serde_json::to_value(Principal::service_user("s1")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "service_user", "id": "s1"}));
    }
}
