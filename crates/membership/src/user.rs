use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tessera_core::{AuthzResult, Principal};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
}

impl User {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
        }
    }

    pub fn principal(&self) -> Principal {
        Principal::user(self.id.clone())
    }
}

/// Read access to the identity store owned elsewhere.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_by_id(&self, id: &str) -> AuthzResult<Option<User>>;

    /// Emails compare case-insensitively.
    async fn get_by_email(&self, email: &str) -> AuthzResult<Option<User>>;

    /// `Conflict` when the id or email is taken.
    async fn insert(&self, user: User) -> AuthzResult<User>;
}
