//! Authorization error model.

use thiserror::Error;

/// Result type used across the authorization core.
pub type AuthzResult<T> = Result<T, AuthzError>;

/// Closed set of failures the core can report.
///
/// "Access denied" is never an error: checks return `Ok(false)`. Everything here is
/// either malformed input, a missing/duplicate record, or a collaborator failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// Malformed tuple, policy, or role (unknown namespace, empty relation name, ...).
    #[error("invalid detail: {0}")]
    InvalidDetail(String),

    /// An identifier was malformed (e.g. UUID parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A `"namespace:id"` string was missing its separator or one of its halves.
    #[error("bad namespace notation '{0}', expected namespace:id")]
    NamespaceSplitNotation(String),

    #[error("{0} does not exist")]
    NotExist(String),

    /// Uniqueness violation on create.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Join attempted with an email domain the organization has not verified.
    #[error("user email domain does not match any verified organization domain")]
    DomainsMisMatch,

    /// The hostname being verified does not resolve.
    #[error("invalid domain: {0}")]
    InvalidDomain(String),

    /// The host resolves but the expected TXT value is absent.
    #[error("verification TXT record not found for {0}")]
    TxtRecordNotFound(String),

    /// The owning organization is disabled.
    #[error("organization {0} is disabled")]
    Disabled(String),

    #[error("invitation has expired")]
    InviteExpired,

    #[error("invalid email: {0}")]
    InvalidEmail(String),

    /// An external collaborator (DNS resolver, ...) failed or timed out.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Persistence layer failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Fieldless discriminant of [`AuthzError`] for exhaustive matching at the boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidDetail,
    InvalidId,
    NamespaceSplitNotation,
    NotExist,
    Conflict,
    DomainsMisMatch,
    InvalidDomain,
    TxtRecordNotFound,
    Disabled,
    InviteExpired,
    InvalidEmail,
    Unavailable,
    Storage,
}

impl AuthzError {
    pub fn invalid_detail(msg: impl Into<String>) -> Self {
        Self::InvalidDetail(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_exist(what: impl Into<String>) -> Self {
        Self::NotExist(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthzError::InvalidDetail(_) => ErrorKind::InvalidDetail,
            AuthzError::InvalidId(_) => ErrorKind::InvalidId,
            AuthzError::NamespaceSplitNotation(_) => ErrorKind::NamespaceSplitNotation,
            AuthzError::NotExist(_) => ErrorKind::NotExist,
            AuthzError::Conflict(_) => ErrorKind::Conflict,
            AuthzError::DomainsMisMatch => ErrorKind::DomainsMisMatch,
            AuthzError::InvalidDomain(_) => ErrorKind::InvalidDomain,
            AuthzError::TxtRecordNotFound(_) => ErrorKind::TxtRecordNotFound,
            AuthzError::Disabled(_) => ErrorKind::Disabled,
            AuthzError::InviteExpired => ErrorKind::InviteExpired,
            AuthzError::InvalidEmail(_) => ErrorKind::InvalidEmail,
            AuthzError::Unavailable(_) => ErrorKind::Unavailable,
            AuthzError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// True for errors caused by the caller's input rather than system state.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidDetail
                | ErrorKind::InvalidId
                | ErrorKind::NamespaceSplitNotation
                | ErrorKind::InvalidEmail
        )
    }
}
