//! The admin service: one replica of the broker control plane.

use std::sync::Arc;

use crate::admin::config::AdminConfig;
use crate::admin::controller::SysController;
use crate::admin::lifecycle::DataStore;
use crate::admin::server::Server;
use crate::error::Result;
use crate::registry::Registry;
use crate::util::Shutdown;

pub mod client;
pub mod config;
pub mod controller;
pub mod lifecycle;
pub mod master;
pub mod module;
pub mod reshard;
pub mod rpc;
pub mod scheduler;
pub mod server;
pub mod state;
mod tcp;
pub mod topic_table;
pub mod worker_table;

#[cfg(test)]
pub(crate) mod test;

pub struct SluiceAdmin {
    config: AdminConfig,
}

impl SluiceAdmin {
    pub fn with_config(config: AdminConfig) -> Self {
        SluiceAdmin { config }
    }

    pub async fn run(
        self,
        registry: Arc<dyn Registry>,
        store: Arc<dyn DataStore>,
        shutdown: Shutdown,
    ) -> Result<()> {
        let server = Server::bind(self.config.clone()).await?;
        self.serve(server, registry, store, shutdown).await
    }

    /// Like [`SluiceAdmin::run`] on an already bound server, so callers can
    /// learn the port first.
    pub async fn serve(
        self,
        server: Server,
        registry: Arc<dyn Registry>,
        store: Arc<dyn DataStore>,
        shutdown: Shutdown,
    ) -> Result<()> {
        let controller = Arc::new(SysController::new(self.config, registry, store)?);
        server.run(controller, shutdown).await
    }
}
