//! Site container lifecycle.
//!
//! [`SiteContainerManager`] sequences one site's full provisioning:
//! network, database, host port, application container, CLI toolchain,
//! and runtime bootstrap. It also prepares existing containers for the
//! reuse path, where the only mutations are a restart and a credential
//! rotation.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pressforge_core::command::CommandRunner;
use pressforge_core::config::ProvisionConfig;
use pressforge_core::error::ProvisionError;
use pressforge_core::event::{ProvisionEvent, ProvisionStep};
use pressforge_core::metrics::PROVISION_TOOLCHAIN_RETRIES_TOTAL;
use pressforge_core::store::PortRegistry;
use pressforge_content::applier::wp_args;

use crate::bootstrap::BootstrapAutomator;
use crate::database::{DatabaseProvisioner, DbCredentials};
use crate::docker::{
    ContainerSpec, ContainerSummary, DockerClient, DockerCommandRunner, parse_host_port,
};
use crate::network::NetworkManager;
use crate::port::PortAllocator;

const TOOLCHAIN_URL: &str =
    "https://raw.githubusercontent.com/wp-cli/builds/gh-pages/phar/wp-cli.phar";
const TOOLCHAIN_PATH: &str = "/usr/local/bin/wp";

/// Inputs for creating one site's containers.
#[derive(Debug, Clone)]
pub struct SiteSpec {
    pub slug: String,
    pub site_name: String,
    pub locale: String,
    pub admin_password: String,
    /// Trace ID linking the lifecycle events of this request.
    pub trace_id: String,
}

/// What the reuse path learned about an existing container.
#[derive(Debug, Clone, Copy)]
pub struct ReuseInfo {
    /// Host port recovered from the container's port mapping.
    pub port: u16,
    /// Whether the runtime install has completed.
    pub installed: bool,
}

/// Owns every per-site Docker-facing concern.
pub struct SiteContainerManager<D, P> {
    client: Arc<D>,
    runner: Arc<DockerCommandRunner<D>>,
    network: NetworkManager<D>,
    database: DatabaseProvisioner<D>,
    ports: PortAllocator<P>,
    bootstrap: BootstrapAutomator<DockerCommandRunner<D>>,
    image: String,
    startup_grace: Duration,
    command_timeout: Duration,
    events: Option<mpsc::Sender<ProvisionEvent>>,
}

impl<D: DockerClient, P: PortRegistry> SiteContainerManager<D, P> {
    pub fn new(client: Arc<D>, registry: Arc<P>, config: &ProvisionConfig) -> Self {
        let runner = Arc::new(DockerCommandRunner::new(Arc::clone(&client)));
        let command_timeout = Duration::from_secs(config.command_timeout_secs);
        Self {
            network: NetworkManager::new(Arc::clone(&client)),
            database: DatabaseProvisioner::new(
                Arc::clone(&client),
                config.db_image.clone(),
                config.db_wait_max_attempts,
                Duration::from_millis(config.db_wait_backoff_ms),
            ),
            ports: PortAllocator::new(registry),
            bootstrap: BootstrapAutomator::new(
                Arc::clone(&runner),
                command_timeout,
                config.admin_user.clone(),
                config.admin_email.clone(),
            ),
            image: config.wordpress_image.clone(),
            startup_grace: Duration::from_secs(config.startup_grace_secs),
            command_timeout,
            client,
            runner,
            events: None,
        }
    }

    /// Attaches a lifecycle event channel. Sends are fire-and-forget.
    pub fn with_events(mut self, sender: mpsc::Sender<ProvisionEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Shared command runner, for components layered on top.
    pub fn runner(&self) -> Arc<DockerCommandRunner<D>> {
        Arc::clone(&self.runner)
    }

    /// Bootstrap automator, for reuse-path credential and option work.
    pub fn bootstrap(&self) -> &BootstrapAutomator<DockerCommandRunner<D>> {
        &self.bootstrap
    }

    /// Provisions everything for a new site and returns its host port.
    ///
    /// Every step is idempotent, so a re-run after a partial failure
    /// resumes rather than duplicating resources.
    pub async fn create(&self, spec: &SiteSpec) -> Result<u16, ProvisionError> {
        let network = format!("net-{}", spec.slug);
        let db_ref = format!("db-{}", spec.slug);
        let app_ref = format!("wp-{}", spec.slug);

        self.network.ensure_network(&network).await?;
        self.emit(spec, ProvisionStep::NetworkReady, None);

        let creds = DbCredentials::for_slug(&spec.slug, generated_secret());
        self.database.ensure_database(&db_ref, &network, &creds).await?;

        let port = self.ports.allocate(&spec.slug).await?;
        self.emit(spec, ProvisionStep::PortAllocated, Some(port.to_string()));

        let app_spec = self.app_spec(&app_ref, &network, &db_ref, &creds, port);
        self.ensure_app_container(&app_spec).await?;
        self.emit(spec, ProvisionStep::ContainerStarted, None);

        // The database boots in parallel with the app's grace period;
        // configuration must not start until it accepts connections.
        self.database.wait_ready(&db_ref, &creds).await?;
        self.emit(spec, ProvisionStep::DatabaseReady, None);

        self.ensure_toolchain_with_retry(&app_spec).await?;

        self.bootstrap
            .configure(
                &app_ref,
                &db_ref,
                &creds,
                &spec.site_name,
                &spec.locale,
                port,
                &spec.admin_password,
            )
            .await?;
        self.bootstrap.relax_preview_headers(&app_ref).await?;
        self.bootstrap.install_health_endpoint(&app_ref).await?;
        self.emit(spec, ProvisionStep::Installed, None);

        info!(slug = %spec.slug, port, "site containers provisioned");
        Ok(port)
    }

    fn emit(&self, spec: &SiteSpec, step: ProvisionStep, detail: Option<String>) {
        let Some(sender) = &self.events else { return };
        let mut event = ProvisionEvent::with_trace(&spec.slug, step, &spec.trace_id);
        if let Some(detail) = detail {
            event = event.with_detail(detail);
        }
        if let Err(e) = sender.try_send(event) {
            debug!(slug = %spec.slug, error = %e, "dropping provision event");
        }
    }

    /// Confirms a container exists. A missing container surfaces as
    /// [`ProvisionError::NotFound`]; the caller decides create vs reuse.
    pub async fn ensure_exists(&self, name: &str) -> Result<ContainerSummary, ProvisionError> {
        self.client.inspect_container(name).await
    }

    /// Starts a container if it is stopped, waiting the grace period
    /// after the start. Returns whether the container ended up running.
    pub async fn ensure_running(&self, name: &str) -> Result<bool, ProvisionError> {
        let summary = self.ensure_exists(name).await?;
        if summary.running {
            return Ok(true);
        }
        debug!(container = %name, "restarting stopped container");
        self.client.start_container(name).await?;
        tokio::time::sleep(self.startup_grace).await;
        Ok(self.ensure_exists(name).await?.running)
    }

    /// Restarts an existing site container if needed and reports what
    /// the reuse path has to work with.
    ///
    /// The host port is recovered from the container's own port
    /// mapping, never assumed.
    pub async fn prepare_for_reuse(&self, slug: &str) -> Result<ReuseInfo, ProvisionError> {
        let app_ref = format!("wp-{slug}");
        let summary = self.ensure_exists(&app_ref).await?;
        if !summary.running {
            self.ensure_running(&app_ref).await?;
        }
        let port = parse_host_port(&summary.port_text).map_err(|e| {
            ProvisionError::Container {
                name: app_ref.clone(),
                reason: e.to_string(),
            }
        })?;
        let installed = self.bootstrap.is_installed(&app_ref).await?;
        Ok(ReuseInfo { port, installed })
    }

    /// Stops and removes both of a site's containers and releases its
    /// port binding.
    pub async fn destroy(&self, slug: &str) -> Result<(), ProvisionError> {
        for name in [format!("wp-{slug}"), format!("db-{slug}")] {
            match self.client.inspect_container(&name).await {
                Ok(summary) => {
                    if summary.running {
                        self.client.stop_container(&name).await?;
                    }
                    self.client.remove_container(&name).await?;
                }
                Err(ProvisionError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.ports.release(slug).await;
        info!(slug, "site containers removed");
        Ok(())
    }

    fn app_spec(
        &self,
        app_ref: &str,
        network: &str,
        db_ref: &str,
        creds: &DbCredentials,
        port: u16,
    ) -> ContainerSpec {
        ContainerSpec {
            name: app_ref.to_owned(),
            image: self.image.clone(),
            network: network.to_owned(),
            env: vec![
                format!("WORDPRESS_DB_HOST={db_ref}"),
                format!("WORDPRESS_DB_NAME={}", creds.database),
                format!("WORDPRESS_DB_USER={}", creds.user),
                format!("WORDPRESS_DB_PASSWORD={}", creds.password),
            ],
            host_port: Some(port),
            container_port: 80,
        }
    }

    async fn ensure_app_container(&self, spec: &ContainerSpec) -> Result<(), ProvisionError> {
        match self.client.inspect_container(&spec.name).await {
            Ok(summary) if summary.running => {
                debug!(container = %spec.name, "app container already running");
                return Ok(());
            }
            Ok(_) => {}
            Err(ProvisionError::NotFound(_)) => {
                self.client.create_container(spec).await?;
            }
            Err(e) => return Err(e),
        }
        self.client.start_container(&spec.name).await?;
        tokio::time::sleep(self.startup_grace).await;
        Ok(())
    }

    /// Installs the CLI toolchain, replacing the container and retrying
    /// exactly once if the first install fails.
    async fn ensure_toolchain_with_retry(&self, spec: &ContainerSpec) -> Result<(), ProvisionError> {
        match self.ensure_toolchain(&spec.name).await {
            Ok(()) => Ok(()),
            Err(first) => {
                counter!(PROVISION_TOOLCHAIN_RETRIES_TOTAL).increment(1);
                warn!(
                    container = %spec.name,
                    error = %first,
                    "toolchain install failed, replacing container"
                );
                self.client.remove_container(&spec.name).await?;
                self.client.create_container(spec).await?;
                self.client.start_container(&spec.name).await?;
                tokio::time::sleep(self.startup_grace).await;
                self.ensure_toolchain(&spec.name).await
            }
        }
    }

    async fn ensure_toolchain(&self, container: &str) -> Result<(), ProvisionError> {
        if self.toolchain_ready(container).await? {
            debug!(container, "toolchain already present");
            return Ok(());
        }

        let script = format!(
            "curl -fsSL -o {TOOLCHAIN_PATH} {TOOLCHAIN_URL} && chmod +x {TOOLCHAIN_PATH}"
        );
        let args = vec!["bash".to_owned(), "-c".to_owned(), script];
        let out = self.runner.run(container, &args, self.command_timeout).await?;
        if !out.success() {
            return Err(ProvisionError::ToolchainInstall {
                container: container.to_owned(),
                reason: format!("download failed: {}", out.stderr.trim()),
            });
        }

        if !self.toolchain_ready(container).await? {
            return Err(ProvisionError::ToolchainInstall {
                container: container.to_owned(),
                reason: "toolchain unusable after install".to_owned(),
            });
        }
        debug!(container, "toolchain installed");
        Ok(())
    }

    async fn toolchain_ready(&self, container: &str) -> Result<bool, ProvisionError> {
        let probe = wp_args(&["--info"]);
        let out = self.runner.run(container, &probe, self.command_timeout).await?;
        Ok(out.success())
    }
}

fn generated_secret() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::MockDockerClient;
    use pressforge_core::store::InMemoryPortRegistry;

    fn test_config() -> ProvisionConfig {
        ProvisionConfig {
            db_wait_max_attempts: 2,
            db_wait_backoff_ms: 1,
            startup_grace_secs: 0,
            command_timeout_secs: 5,
            ..ProvisionConfig::default()
        }
    }

    fn spec() -> SiteSpec {
        SiteSpec {
            slug: "acme-cafe".to_owned(),
            site_name: "Acme Cafe".to_owned(),
            locale: "en_US".to_owned(),
            admin_password: "secret".to_owned(),
            trace_id: "trace-test".to_owned(),
        }
    }

    fn manager(
        client: Arc<MockDockerClient>,
        config: ProvisionConfig,
    ) -> SiteContainerManager<MockDockerClient, InMemoryPortRegistry> {
        SiteContainerManager::new(client, Arc::new(InMemoryPortRegistry::new()), &config)
    }

    fn healthy_mock() -> MockDockerClient {
        MockDockerClient::new()
            .with_exec_rule("mysqladmin ping", "mysqld is alive\n", 0)
            .with_exec_rule("--info", "WP-CLI 2.10.0\n", 0)
            .with_exec_rule("core is-installed", "", 1)
    }

    #[tokio::test]
    async fn create_provisions_network_db_and_app() {
        let client = Arc::new(healthy_mock());
        let port = manager(Arc::clone(&client), test_config())
            .create(&spec())
            .await
            .unwrap();
        assert!(port >= 1024);

        assert!(client.networks.lock().unwrap().contains("net-acme-cafe"));
        let db = client.inspect_container("db-acme-cafe").await.unwrap();
        assert!(db.running);
        let app = client.inspect_container("wp-acme-cafe").await.unwrap();
        assert!(app.running);
        assert_eq!(parse_host_port(&app.port_text).unwrap(), port);

        let calls = client.exec_calls();
        assert!(calls.iter().any(|c| c.contains("core install")));
        assert!(calls.iter().any(|c| c.contains("pressforge-health.php")));
    }

    #[tokio::test]
    async fn create_skips_toolchain_download_when_present() {
        let client = Arc::new(healthy_mock());
        manager(Arc::clone(&client), test_config())
            .create(&spec())
            .await
            .unwrap();
        let calls = client.exec_calls();
        assert!(!calls.iter().any(|c| c.contains("curl")));
    }

    #[tokio::test]
    async fn toolchain_failure_replaces_container_then_gives_up() {
        let client = Arc::new(
            MockDockerClient::new()
                .with_exec_rule("mysqladmin ping", "mysqld is alive\n", 0)
                .with_exec_rule("--info", "", 1)
                .with_exec_rule("curl", "", 1),
        );
        let err = manager(Arc::clone(&client), test_config())
            .create(&spec())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ToolchainInstall { .. }));
        // One install attempt per container generation.
        let downloads = client
            .exec_calls()
            .iter()
            .filter(|c| c.contains("curl"))
            .count();
        assert_eq!(downloads, 2);
    }

    #[tokio::test]
    async fn create_is_idempotent_for_running_site() {
        let client = Arc::new(healthy_mock());
        let mgr = manager(Arc::clone(&client), test_config());
        let first = mgr.create(&spec()).await.unwrap();
        let second = mgr.create(&spec()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(client.containers.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn prepare_for_reuse_restarts_and_reads_port() {
        let client = Arc::new(
            MockDockerClient::new()
                .with_container("wp-acme-cafe", false, Some(8101))
                .with_exec_rule("core is-installed", "", 0),
        );
        let info = manager(Arc::clone(&client), test_config())
            .prepare_for_reuse("acme-cafe")
            .await
            .unwrap();
        assert_eq!(info.port, 8101);
        assert!(info.installed);
        assert!(client.inspect_container("wp-acme-cafe").await.unwrap().running);
    }

    #[tokio::test]
    async fn prepare_for_reuse_missing_mapping_is_an_error() {
        let client = Arc::new(MockDockerClient::new().with_container("wp-acme-cafe", true, None));
        let err = manager(client, test_config())
            .prepare_for_reuse("acme-cafe")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Container { .. }));
    }

    #[tokio::test]
    async fn ensure_running_is_idempotent() {
        let client =
            Arc::new(MockDockerClient::new().with_container("wp-acme-cafe", true, Some(8101)));
        let mgr = manager(Arc::clone(&client), test_config());
        assert!(mgr.ensure_running("wp-acme-cafe").await.unwrap());
        assert!(mgr.ensure_running("wp-acme-cafe").await.unwrap());
        assert_eq!(client.containers.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ensure_exists_reports_missing_container() {
        let client = Arc::new(MockDockerClient::new());
        let err = manager(client, test_config())
            .ensure_exists("wp-acme-cafe")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound(_)));
    }

    #[tokio::test]
    async fn prepare_for_reuse_missing_container_is_not_found() {
        let client = Arc::new(MockDockerClient::new());
        let err = manager(client, test_config())
            .prepare_for_reuse("acme-cafe")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_emits_lifecycle_events_in_order() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let client = Arc::new(healthy_mock());
        let mgr = manager(Arc::clone(&client), test_config()).with_events(tx);
        mgr.create(&spec()).await.unwrap();

        let mut steps = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.metadata.trace_id, "trace-test");
            steps.push(event.step);
        }
        assert_eq!(
            steps,
            vec![
                ProvisionStep::NetworkReady,
                ProvisionStep::PortAllocated,
                ProvisionStep::ContainerStarted,
                ProvisionStep::DatabaseReady,
                ProvisionStep::Installed,
            ]
        );
    }

    #[tokio::test]
    async fn destroy_removes_containers() {
        let client = Arc::new(healthy_mock());
        let mgr = manager(Arc::clone(&client), test_config());
        mgr.create(&spec()).await.unwrap();
        mgr.destroy("acme-cafe").await.unwrap();
        assert!(client.containers.lock().unwrap().is_empty());
    }
}
