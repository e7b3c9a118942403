use std::sync::Arc;

use anyhow::Context;

use tessera_core::schema::relations;
use tessera_core::{Principal, split};
use tessera_infra::{HickoryTxtResolver, TesseraConfig, postgres};
use tessera_service::Tessera;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tessera_observability::init();

    let config = TesseraConfig::from_env().context("loading configuration")?;
    let resolver = Arc::new(
        HickoryTxtResolver::from_system_conf().context("reading system resolver configuration")?,
    );

    let tessera = match &config.database_url {
        Some(url) => {
            let pool = postgres::connect(url, config.database_max_connections)
                .await
                .context("connecting to postgres")?;
            postgres::migrate(&pool).await.context("running migrations")?;
            tracing::info!("migrations applied");
            Tessera::postgres(pool, &config, resolver)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; bootstrapping in-memory stores only");
            Tessera::in_memory(&config, resolver)
        }
    };

    let roles = tessera.seed_roles().await.context("seeding predefined roles")?;

    if let Some(encoded) = &config.bootstrap_sudo {
        let (namespace, id) = split(encoded).context("parsing bootstrap sudo principal")?;
        let principal = Principal::from_parts(namespace, id)?;
        tessera
            .authorizer()
            .add_platform_user(&principal, relations::SUDO)
            .await
            .context("attaching bootstrap sudo")?;
        tracing::info!(%principal, "bootstrap sudo attached");
    }

    tracing::info!(roles = roles.len(), "bootstrap complete");
    Ok(())
}
