//! Backing database provisioning.
//!
//! Idempotent inspect-or-create for the per-site database container,
//! plus the bounded readiness probe provisioning gates on before any
//! runtime configuration touches the database.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use pressforge_core::error::ProvisionError;
use pressforge_core::retry::wait_until_ready;

use crate::docker::{ContainerSpec, DockerClient};

/// Credentials for one site's database.
#[derive(Debug, Clone)]
pub struct DbCredentials {
    pub database: String,
    pub user: String,
    pub password: String,
    pub root_password: String,
}

impl DbCredentials {
    /// Derives per-site credentials from the slug.
    pub fn for_slug(slug: &str, password: impl Into<String>) -> Self {
        let safe = slug.replace('-', "_");
        Self {
            database: format!("wp_{safe}"),
            user: format!("wp_{safe}"),
            password: password.into(),
            root_password: uuid_password(),
        }
    }
}

fn uuid_password() -> String {
    // Hyphens stripped so the value is safe in every shell context.
    uuid::Uuid::new_v4().simple().to_string()
}

/// Provisions and readiness-probes database containers.
pub struct DatabaseProvisioner<D> {
    client: Arc<D>,
    image: String,
    wait_max_attempts: u32,
    wait_backoff: Duration,
}

impl<D: DockerClient> DatabaseProvisioner<D> {
    pub fn new(
        client: Arc<D>,
        image: impl Into<String>,
        wait_max_attempts: u32,
        wait_backoff: Duration,
    ) -> Self {
        Self {
            client,
            image: image.into(),
            wait_max_attempts,
            wait_backoff,
        }
    }

    /// Ensures the database container exists and is running.
    pub async fn ensure_database(
        &self,
        db_ref: &str,
        network: &str,
        creds: &DbCredentials,
    ) -> Result<(), ProvisionError> {
        match self.client.inspect_container(db_ref).await {
            Ok(summary) if summary.running => {
                debug!(container = db_ref, "database already running");
                return Ok(());
            }
            Ok(_) => {
                debug!(container = db_ref, "database exists but is stopped, starting");
            }
            Err(ProvisionError::NotFound(_)) => {
                let spec = ContainerSpec {
                    name: db_ref.to_owned(),
                    image: self.image.clone(),
                    network: network.to_owned(),
                    env: vec![
                        format!("MYSQL_ROOT_PASSWORD={}", creds.root_password),
                        format!("MYSQL_DATABASE={}", creds.database),
                        format!("MYSQL_USER={}", creds.user),
                        format!("MYSQL_PASSWORD={}", creds.password),
                    ],
                    host_port: None,
                    container_port: 3306,
                };
                self.client
                    .create_container(&spec)
                    .await
                    .map_err(|e| ProvisionError::Database(e.to_string()))?;
                info!(container = db_ref, "database container created");
            }
            Err(e) => return Err(ProvisionError::Database(e.to_string())),
        }

        self.client
            .start_container(db_ref)
            .await
            .map_err(|e| ProvisionError::Database(e.to_string()))
    }

    /// Waits for the database to accept privileged pings, with linear
    /// backoff and a bounded attempt budget. Exhaustion is fatal.
    pub async fn wait_ready(
        &self,
        db_ref: &str,
        creds: &DbCredentials,
    ) -> Result<(), ProvisionError> {
        let ping = vec![
            "mysqladmin".to_owned(),
            "ping".to_owned(),
            "-h".to_owned(),
            "localhost".to_owned(),
            format!("-p{}", creds.root_password),
            "--silent".to_owned(),
        ];
        wait_until_ready(db_ref, self.wait_max_attempts, self.wait_backoff, || {
            let ping = ping.clone();
            async move {
                let out = self.client.exec(db_ref, &ping).await?;
                Ok::<_, ProvisionError>(out.success())
            }
        })
        .await
    }
}
