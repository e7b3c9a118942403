use std::time::Duration;

/// Tunables for domain verification and invitations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipSettings {
    /// Horizon applied to invitations created without an explicit expiry.
    pub invitation_ttl: chrono::Duration,
    /// Bound on a single TXT lookup.
    pub dns_timeout: Duration,
    /// Whether role ids on invitations are kept and granted on acceptance.
    pub invite_with_roles: bool,
    /// Age after which pending domain requests may be purged.
    pub domain_request_ttl: chrono::Duration,
}

impl Default for MembershipSettings {
    fn default() -> Self {
        Self {
            invitation_ttl: chrono::Duration::days(7),
            dns_timeout: Duration::from_secs(5),
            invite_with_roles: false,
            domain_request_ttl: chrono::Duration::days(7),
        }
    }
}
