use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    /// The name does not resolve at all (NXDOMAIN).
    #[error("no such host: {0}")]
    NoSuchHost(String),

    #[error("lookup failed: {0}")]
    Failed(String),
}

/// DNS TXT lookups used for domain ownership challenges.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    /// Every TXT string published for `host`. A host with no TXT records yields an
    /// empty list, not an error.
    async fn lookup_txt(&self, host: &str) -> Result<Vec<String>, LookupError>;
}
