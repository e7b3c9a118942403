//! Environment-driven configuration.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use tessera_authz::CheckSettings;
use tessera_membership::MembershipSettings;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const DATABASE_MAX_CONNECTIONS: &str = "TESSERA_DATABASE_MAX_CONNECTIONS";
pub const INVITATION_TTL_HOURS: &str = "TESSERA_INVITATION_TTL_HOURS";
pub const DNS_TIMEOUT_MS: &str = "TESSERA_DNS_TIMEOUT_MS";
pub const BATCH_MAX_WORKERS: &str = "TESSERA_BATCH_MAX_WORKERS";
pub const INVITE_WITH_ROLES: &str = "TESSERA_INVITE_WITH_ROLES";
pub const DOMAIN_REQUEST_TTL_HOURS: &str = "TESSERA_DOMAIN_REQUEST_TTL_HOURS";
pub const BOOTSTRAP_SUDO: &str = "TESSERA_BOOTSTRAP_SUDO";

/// Upper bound for every `*_TTL_HOURS` setting (one hundred years).
pub const MAX_TTL_HOURS: i64 = 24 * 365 * 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TesseraConfig {
    /// Postgres DSN; `None` selects the in-memory stores.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub invitation_ttl_hours: i64,
    pub dns_timeout_ms: u64,
    pub batch_max_workers: usize,
    pub invite_with_roles: bool,
    pub domain_request_ttl_hours: i64,
    /// `"namespace:id"` of a principal attached to the platform as sudo at bootstrap.
    pub bootstrap_sudo: Option<String>,
}

impl Default for TesseraConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            invitation_ttl_hours: 24 * 7,
            dns_timeout_ms: 5_000,
            batch_max_workers: 16,
            invite_with_roles: false,
            domain_request_ttl_hours: 24 * 7,
            bootstrap_sudo: None,
        }
    }
}

impl TesseraConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an explicit variable map (missing keys fall back to defaults).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            database_url: get(DATABASE_URL).filter(|v| !v.trim().is_empty()),
            database_max_connections: parse_or(
                &get,
                DATABASE_MAX_CONNECTIONS,
                d.database_max_connections,
            )?,
            invitation_ttl_hours: ttl_hours(&get, INVITATION_TTL_HOURS, d.invitation_ttl_hours)?,
            dns_timeout_ms: positive(&get, DNS_TIMEOUT_MS, d.dns_timeout_ms)?,
            batch_max_workers: positive(&get, BATCH_MAX_WORKERS, d.batch_max_workers)?,
            invite_with_roles: parse_bool(&get, INVITE_WITH_ROLES, d.invite_with_roles)?,
            domain_request_ttl_hours: ttl_hours(
                &get,
                DOMAIN_REQUEST_TTL_HOURS,
                d.domain_request_ttl_hours,
            )?,
            bootstrap_sudo: get(BOOTSTRAP_SUDO).filter(|v| !v.trim().is_empty()),
        })
    }

    pub fn check_settings(&self) -> CheckSettings {
        CheckSettings {
            max_workers: self.batch_max_workers,
        }
    }

    pub fn membership_settings(&self) -> MembershipSettings {
        MembershipSettings {
            invitation_ttl: chrono::Duration::hours(self.invitation_ttl_hours),
            dns_timeout: Duration::from_millis(self.dns_timeout_ms),
            invite_with_roles: self.invite_with_roles,
            domain_request_ttl: chrono::Duration::hours(self.domain_request_ttl_hours),
        }
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn positive<T: FromStr + PartialOrd + Default + Copy>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    let value = parse_or(get, key, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: get(key).unwrap_or_default(),
        });
    }
    Ok(value)
}

fn ttl_hours(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: i64,
) -> Result<i64, ConfigError> {
    let hours = positive(get, key, default)?;
    if hours > MAX_TTL_HOURS {
        return Err(ConfigError::Invalid {
            key,
            value: get(key).unwrap_or_default(),
        });
    }
    Ok(hours)
}

fn parse_bool(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value: raw }),
        },
    }
}

impl From<&TesseraConfig> for CheckSettings {
    fn from(config: &TesseraConfig) -> Self {
        config.check_settings()
    }
}

impl From<&TesseraConfig> for MembershipSettings {
    fn from(config: &TesseraConfig) -> Self {
        config.membership_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = TesseraConfig::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config, TesseraConfig::default());
        assert_eq!(config.check_settings().max_workers, 16);
        let membership = config.membership_settings();
        assert_eq!(membership.invitation_ttl, chrono::Duration::days(7));
        assert_eq!(membership.dns_timeout, Duration::from_secs(5));
        assert!(!membership.invite_with_roles);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = TesseraConfig::from_vars(&vars(&[
            (DATABASE_URL, "postgres://localhost/tessera"),
            (DNS_TIMEOUT_MS, "250"),
            (BATCH_MAX_WORKERS, "4"),
            (INVITE_WITH_ROLES, "TRUE"),
            (INVITATION_TTL_HOURS, "1"),
        ]))
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/tessera"));
        assert_eq!(config.dns_timeout_ms, 250);
        assert_eq!(config.batch_max_workers, 4);
        assert!(config.invite_with_roles);
        assert_eq!(config.invitation_ttl_hours, 1);
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        let config = TesseraConfig::from_vars(&vars(&[(DATABASE_URL, "  ")])).unwrap();
        assert!(config.database_url.is_none());
    }

    #[test]
    fn malformed_values_name_the_key() {
        let err = TesseraConfig::from_vars(&vars(&[(DNS_TIMEOUT_MS, "soon")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: DNS_TIMEOUT_MS,
                value: "soon".into()
            }
        );
        assert!(TesseraConfig::from_vars(&vars(&[(BATCH_MAX_WORKERS, "0")])).is_err());
        assert!(TesseraConfig::from_vars(&vars(&[(INVITE_WITH_ROLES, "maybe")])).is_err());
    }

    #[test]
    fn ttl_hours_are_bounded() {
        let err = TesseraConfig::from_vars(&vars(&[(INVITATION_TTL_HOURS, "9223372036854775807")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: INVITATION_TTL_HOURS,
                value: "9223372036854775807".into()
            }
        );
        let too_long = (MAX_TTL_HOURS + 1).to_string();
        assert!(
            TesseraConfig::from_vars(&vars(&[(DOMAIN_REQUEST_TTL_HOURS, too_long.as_str())]))
                .is_err()
        );

        let longest = MAX_TTL_HOURS.to_string();
        let config = TesseraConfig::from_vars(&vars(&[
            (INVITATION_TTL_HOURS, longest.as_str()),
            (DOMAIN_REQUEST_TTL_HOURS, longest.as_str()),
        ]))
        .unwrap();
        let membership = config.membership_settings();
        assert_eq!(membership.invitation_ttl, chrono::Duration::hours(MAX_TTL_HOURS));
        assert!(chrono::Utc::now().checked_add_signed(membership.invitation_ttl).is_some());
    }
}
