//! `dv user add`: register or update a principal.

use anyhow::{bail, Result};

use docvault_core::models::{Principal, Role};
use docvault_core::store::PrincipalDirectory;

use crate::config::Config;
use crate::vault::Vault;

pub async fn run_user_add(
    config: &Config,
    id: &str,
    role: &str,
    manager: Option<String>,
) -> Result<()> {
    if id.trim().is_empty() {
        bail!("user id must not be empty");
    }
    let role: Role = role.parse()?;
    if manager.as_deref() == Some(id) {
        bail!("a user cannot be their own manager");
    }

    let vault = Vault::open(config).await?;
    if let Some(m) = &manager {
        if vault.store.get_principal(m).await?.is_none() {
            bail!("Unknown manager: {}. Add them first.", m);
        }
    }
    vault
        .store
        .upsert_principal(&Principal {
            id: id.to_string(),
            role,
            manager_id: manager.clone(),
        })
        .await?;
    vault.close().await;

    match manager {
        Some(m) => println!("user {} ({}) reports to {}", id, role, m),
        None => println!("user {} ({})", id, role),
    }
    Ok(())
}
