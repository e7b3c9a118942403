use tracing::instrument;

use tessera_authz::{Role, RoleService, predefined_roles};
use tessera_core::AuthzResult;

/// Create or refresh every predefined role. Safe to run on every start.
#[instrument(skip(roles), err)]
pub async fn seed_roles(roles: &RoleService) -> AuthzResult<Vec<Role>> {
    let mut seeded = Vec::new();
    for role in predefined_roles() {
        seeded.push(roles.ensure(role).await?);
    }
    tracing::info!(roles = seeded.len(), "predefined roles seeded");
    Ok(seeded)
}
