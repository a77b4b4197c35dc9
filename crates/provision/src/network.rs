//! Per-site virtual network management.

use std::sync::Arc;

use tracing::{debug, info};

use pressforge_core::error::ProvisionError;

use crate::docker::DockerClient;

/// Idempotent inspect-or-create for per-site bridge networks.
pub struct NetworkManager<D> {
    client: Arc<D>,
}

impl<D: DockerClient> NetworkManager<D> {
    pub fn new(client: Arc<D>) -> Self {
        Self { client }
    }

    /// Ensures a network with `name` exists.
    pub async fn ensure_network(&self, name: &str) -> Result<(), ProvisionError> {
        if self.client.network_exists(name).await? {
            debug!(network = name, "network already exists");
            return Ok(());
        }
        self.client.create_network(name).await?;
        info!(network = name, "network created");
        Ok(())
    }
}
