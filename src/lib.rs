pub mod admin;
pub mod config;
pub mod error;
pub mod logger;
pub mod registry;
pub mod util;

use std::sync::Arc;

use crate::admin::lifecycle::LocalDataStore;
use crate::admin::SluiceAdmin;
use crate::error::Result;
use crate::registry::SledRegistry;
use crate::util::Shutdown;

#[macro_use]
extern crate serde_derive;

/// Runs one admin replica until `shutdown` fires.
pub async fn sluice<P: AsRef<std::path::Path>>(config_path: P, shutdown: Shutdown) -> Result<()> {
    let config = config::config(config_path)?;
    let registry = SledRegistry::open(&config.registry)?;
    tracing::info!(address = %config.admin.address(), registry = ?config.registry.file, "opening registry");
    SluiceAdmin::with_config(config.admin)
        .run(Arc::new(registry), Arc::new(LocalDataStore), shutdown)
        .await
}
