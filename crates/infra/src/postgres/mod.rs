//! Postgres-backed repositories.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `AuthzError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | AuthzError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate tuple, binding, role, domain |
//! | Database (foreign key violation) | `23503` | `InvalidDetail` | Unknown role or organization |
//! | Database (check constraint violation) | `23514` | `InvalidDetail` | Unknown state value |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | PoolClosed / Other | N/A | `Storage` | Network errors, connection failures, etc. |
//!
//! Every repository call commits before returning, so a write is visible to the next
//! check. Batched relation writes (`insert_missing`) share one transaction.

mod membership;
mod organizations;
mod relations;
mod roles;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

use tessera_core::AuthzError;

pub use membership::{PostgresDomainStore, PostgresInvitationStore};
pub use organizations::{PostgresOrganizationStore, PostgresUserStore};
pub use relations::PostgresRelationStore;
pub use roles::{PostgresPolicyStore, PostgresRoleStore};

/// Create a PostgreSQL connection pool.
pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    tracing::info!("connecting to PostgreSQL");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(url)
        .await?;
    tracing::info!("connected to PostgreSQL");
    Ok(pool)
}

/// Apply the bundled schema migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("database migrations completed");
    Ok(())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> AuthzError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => AuthzError::Conflict(msg),
                Some("23503") | Some("23514") => AuthzError::InvalidDetail(msg),
                _ => AuthzError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            AuthzError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => AuthzError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Decode failures on a fetched row.
fn map_row_error(operation: &str, err: sqlx::Error) -> AuthzError {
    AuthzError::Storage(format!("failed to decode row in {}: {}", operation, err))
}
