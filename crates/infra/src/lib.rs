//! Infrastructure layer: storage adapters, DNS, configuration and bootstrap.

pub mod bootstrap;
pub mod config;
pub mod dns;
pub mod memory;
pub mod postgres;


pub use bootstrap::seed_roles;
pub use config::{ConfigError, TesseraConfig};
pub use dns::HickoryTxtResolver;
pub use memory::{
    InMemoryDomainStore, InMemoryInvitationStore, InMemoryOrganizationStore, InMemoryPolicyStore,
    InMemoryRelationStore, InMemoryRoleStore, InMemoryUserStore,
};
pub use postgres::{
    PostgresDomainStore, PostgresInvitationStore, PostgresOrganizationStore, PostgresPolicyStore,
    PostgresRelationStore, PostgresRoleStore, PostgresUserStore,
};
