//! Provisioning coordination and container reuse.
//!
//! [`PreviewReuseCoordinator`] is the entry point for one provisioning
//! request. It decides between the cheap reuse path (an existing
//! container is restarted and its credentials rotated) and the full
//! create path (network, database, container, theme, content), keeps the
//! site store in sync with reality, and reports lifecycle events.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use pressforge_content::applier::{ApplyReport, StructureApplier};
use pressforge_content::enrich::ContentEnricher;
use pressforge_core::config::ProvisionConfig;
use pressforge_core::error::{PressforgeError, ProvisionError, StorageError};
use pressforge_core::event::{ProvisionEvent, ProvisionStep};
use pressforge_core::metrics::{
    LABEL_RESULT, PROVISION_CREATE_DURATION_SECONDS, PROVISION_SITES_CREATED_TOTAL,
};
use pressforge_core::store::{PortRegistry, SiteStore};
use pressforge_core::types::{SiteInstance, SiteStatus, StructureSpec};

use crate::container::{ReuseInfo, SiteContainerManager, SiteSpec};
use crate::docker::{DockerClient, DockerCommandRunner};
use crate::theme::{ThemeCatalog, ThemeInstaller};

/// One provisioning request.
#[derive(Debug, Clone)]
pub struct SiteRequest {
    pub slug: String,
    pub site_name: String,
    pub owner_id: String,
    pub locale: String,
    /// Theme to install and activate, when requested.
    pub theme_slug: Option<String>,
    /// Site structure to apply after install, when requested.
    pub structure: Option<StructureSpec>,
    /// Business description passed through to content enrichment.
    pub business_context: String,
    pub admin_password: String,
    /// Editor modifications saved in the preview sandbox, replayed on
    /// the reuse path as option writes.
    pub sandbox_options: Vec<(String, String)>,
}

/// What one provisioning request produced.
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub site: SiteInstance,
    /// Whether an existing container was reused instead of created.
    pub reused: bool,
    /// Content application report, on the create path with a structure.
    pub apply_report: Option<ApplyReport>,
}

/// Coordinates provisioning requests across the container manager, the
/// theme installer, the content applier, and the site store.
pub struct PreviewReuseCoordinator<D, P, S, E, C> {
    containers: SiteContainerManager<D, P>,
    themes: ThemeInstaller<DockerCommandRunner<D>, C>,
    applier: StructureApplier<DockerCommandRunner<D>, E>,
    store: Arc<S>,
    events: Option<mpsc::Sender<ProvisionEvent>>,
}

impl<D, P, S, E, C> PreviewReuseCoordinator<D, P, S, E, C>
where
    D: DockerClient,
    P: PortRegistry,
    S: SiteStore,
    E: ContentEnricher,
    C: ThemeCatalog,
{
    pub fn new(
        client: Arc<D>,
        registry: Arc<P>,
        store: Arc<S>,
        catalog: Arc<C>,
        enricher: E,
        config: &ProvisionConfig,
    ) -> Self {
        let command_timeout = std::time::Duration::from_secs(config.command_timeout_secs);
        Self {
            containers: SiteContainerManager::new(Arc::clone(&client), registry, config),
            themes: ThemeInstaller::new(
                Arc::new(DockerCommandRunner::new(Arc::clone(&client))),
                catalog,
                command_timeout,
            ),
            applier: StructureApplier::new(
                DockerCommandRunner::new(client),
                enricher,
                command_timeout,
            ),
            store,
            events: None,
        }
    }

    /// Attaches a lifecycle event channel. Sends are fire-and-forget.
    pub fn with_events(mut self, sender: mpsc::Sender<ProvisionEvent>) -> Self {
        self.containers = self.containers.with_events(sender.clone());
        self.events = Some(sender);
        self
    }

    /// Handles one provisioning request end to end.
    ///
    /// An active site with a completed install takes the reuse path; a
    /// missing container or incomplete install falls back to the create
    /// path, whose steps are all idempotent.
    pub async fn provision(
        &self,
        request: SiteRequest,
    ) -> Result<ProvisionOutcome, PressforgeError> {
        let start = Instant::now();
        let trace_id = uuid::Uuid::new_v4().to_string();

        match self.store.get(&request.slug).await {
            Ok(existing) if existing.active && existing.installed => {
                match self.containers.prepare_for_reuse(&request.slug).await {
                    Ok(info) if info.installed => {
                        return self.reuse(&request, existing, info, &trace_id).await;
                    }
                    Ok(_) => {
                        debug!(slug = %request.slug, "install incomplete, provisioning from scratch");
                    }
                    Err(ProvisionError::NotFound(_)) => {
                        debug!(slug = %request.slug, "container missing, provisioning from scratch");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(_) | Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        match self.create(&request, &trace_id).await {
            Ok(outcome) => {
                counter!(PROVISION_SITES_CREATED_TOTAL, LABEL_RESULT => "success").increment(1);
                histogram!(PROVISION_CREATE_DURATION_SECONDS)
                    .record(start.elapsed().as_secs_f64());
                Ok(outcome)
            }
            Err(e) => {
                counter!(PROVISION_SITES_CREATED_TOTAL, LABEL_RESULT => "failure").increment(1);
                self.emit(
                    ProvisionEvent::with_trace(&request.slug, ProvisionStep::Failed, &trace_id)
                        .with_detail(e.to_string()),
                );
                // Best effort: no record exists when provisioning died early.
                if let Err(store_err) =
                    self.store.set_status(&request.slug, SiteStatus::Failed).await
                {
                    debug!(slug = %request.slug, error = %store_err, "no record to mark failed");
                }
                Err(e)
            }
        }
    }

    /// Removes a site's containers and deactivates its record. The
    /// record survives for history; the port binding is freed.
    pub async fn teardown(&self, slug: &str) -> Result<(), PressforgeError> {
        self.containers.destroy(slug).await?;
        self.store.deactivate(slug).await?;
        info!(slug, "site torn down");
        Ok(())
    }

    async fn create(
        &self,
        request: &SiteRequest,
        trace_id: &str,
    ) -> Result<ProvisionOutcome, PressforgeError> {
        let spec = SiteSpec {
            slug: request.slug.clone(),
            site_name: request.site_name.clone(),
            locale: request.locale.clone(),
            admin_password: request.admin_password.clone(),
            trace_id: trace_id.to_owned(),
        };
        let port = self.containers.create(&spec).await?;

        let mut site = SiteInstance::new(&request.slug, &request.site_name, port);
        site.owner_id = request.owner_id.clone();
        site.theme_slug = request.theme_slug.clone();
        site.installed = true;
        self.store.upsert(site.clone()).await?;

        if let Some(theme) = &request.theme_slug {
            self.themes.ensure_theme(&site.app_ref, theme).await?;
            self.emit(
                ProvisionEvent::with_trace(&request.slug, ProvisionStep::ThemeApplied, trace_id)
                    .with_detail(theme),
            );
        }

        let mut apply_report = None;
        if let Some(structure) = &request.structure {
            let report = self
                .applier
                .apply(&site.app_ref, structure, &request.business_context)
                .await?;
            self.emit(
                ProvisionEvent::with_trace(&request.slug, ProvisionStep::ContentApplied, trace_id)
                    .with_detail(format!("{} pages", report.pages_created())),
            );
            site.content_applied = true;
            apply_report = Some(report);
        }

        site.status = SiteStatus::Ready;
        self.store.upsert(site.clone()).await?;

        info!(slug = %request.slug, port, "site provisioned");
        Ok(ProvisionOutcome {
            site,
            reused: false,
            apply_report,
        })
    }

    async fn reuse(
        &self,
        request: &SiteRequest,
        mut site: SiteInstance,
        info: ReuseInfo,
        trace_id: &str,
    ) -> Result<ProvisionOutcome, PressforgeError> {
        let bootstrap = self.containers.bootstrap();
        bootstrap
            .update_admin_credentials(&site.app_ref, &request.admin_password)
            .await?;
        bootstrap
            .replay_sandbox_options(&site.app_ref, &request.sandbox_options)
            .await?;
        bootstrap.clear_preview_artifacts(&site.app_ref).await?;

        if site.port != info.port {
            // The container's own mapping is authoritative.
            warn!(
                slug = %site.slug,
                recorded = site.port,
                actual = info.port,
                "stored port disagrees with container mapping"
            );
            site.port = info.port;
        }
        site.status = SiteStatus::Ready;
        self.store.upsert(site.clone()).await?;

        self.emit(
            ProvisionEvent::with_trace(&site.slug, ProvisionStep::Installed, trace_id)
                .with_detail("reused"),
        );
        info!(slug = %site.slug, port = site.port, "existing site reused");
        Ok(ProvisionOutcome {
            site,
            reused: true,
            apply_report: None,
        })
    }

    fn emit(&self, event: ProvisionEvent) {
        let Some(sender) = &self.events else { return };
        if let Err(e) = sender.try_send(event) {
            debug!(error = %e, "dropping provision event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::MockDockerClient;
    use crate::theme::InMemoryThemeCatalog;
    use pressforge_content::enrich::FallbackEnricher;
    use pressforge_core::store::{InMemoryPortRegistry, InMemorySiteStore};
    use pressforge_core::types::PageSpec;

    fn test_config() -> ProvisionConfig {
        ProvisionConfig {
            db_wait_max_attempts: 2,
            db_wait_backoff_ms: 1,
            startup_grace_secs: 0,
            command_timeout_secs: 5,
            ..ProvisionConfig::default()
        }
    }

    fn coordinator(
        client: Arc<MockDockerClient>,
        store: Arc<InMemorySiteStore>,
        config: ProvisionConfig,
    ) -> PreviewReuseCoordinator<
        MockDockerClient,
        InMemoryPortRegistry,
        InMemorySiteStore,
        FallbackEnricher,
        InMemoryThemeCatalog,
    > {
        PreviewReuseCoordinator::new(
            client,
            Arc::new(InMemoryPortRegistry::new()),
            store,
            Arc::new(InMemoryThemeCatalog::new()),
            FallbackEnricher,
            &config,
        )
    }

    fn healthy_mock() -> MockDockerClient {
        MockDockerClient::new()
            .with_exec_rule("mysqladmin ping", "mysqld is alive\n", 0)
            .with_exec_rule("--info", "WP-CLI 2.10.0\n", 0)
            .with_exec_rule("core is-installed", "", 1)
            .with_exec_rule("theme is-installed", "", 1)
            .with_exec_rule("post create", "10\n", 0)
            .with_exec_rule("menu create", "5\n", 0)
    }

    fn structure() -> StructureSpec {
        StructureSpec {
            pages: vec![
                PageSpec {
                    title: "Home".to_owned(),
                    slug: "home".to_owned(),
                    blocks: vec![],
                },
                PageSpec {
                    title: "About".to_owned(),
                    slug: "about".to_owned(),
                    blocks: vec![],
                },
            ],
            menu: vec![],
            theme_suggestions: vec![],
        }
    }

    fn request() -> SiteRequest {
        SiteRequest {
            slug: "acme-cafe".to_owned(),
            site_name: "Acme Cafe".to_owned(),
            owner_id: "owner-1".to_owned(),
            locale: "en_US".to_owned(),
            theme_slug: Some("bistro".to_owned()),
            structure: Some(structure()),
            business_context: "a cozy cafe".to_owned(),
            admin_password: "secret".to_owned(),
            sandbox_options: vec![],
        }
    }

    #[tokio::test]
    async fn provision_creates_ready_site() {
        let client = Arc::new(healthy_mock());
        let store = Arc::new(InMemorySiteStore::new());
        let (tx, mut rx) = mpsc::channel(32);
        let coord =
            coordinator(Arc::clone(&client), Arc::clone(&store), test_config())
                .with_events(tx);

        let outcome = coord.provision(request()).await.unwrap();
        assert!(!outcome.reused);
        assert_eq!(outcome.site.status, SiteStatus::Ready);
        assert!(outcome.site.content_applied);
        let report = outcome.apply_report.unwrap();
        assert_eq!(report.pages_created(), 2);

        let stored = store.get("acme-cafe").await.unwrap();
        assert_eq!(stored.status, SiteStatus::Ready);
        assert_eq!(stored.owner_id, "owner-1");
        assert_eq!(stored.theme_slug.as_deref(), Some("bistro"));

        let mut steps = Vec::new();
        while let Ok(event) = rx.try_recv() {
            steps.push(event.step);
        }
        assert!(steps.contains(&ProvisionStep::Installed));
        assert!(steps.contains(&ProvisionStep::ThemeApplied));
        assert!(steps.contains(&ProvisionStep::ContentApplied));
        assert!(!steps.contains(&ProvisionStep::Failed));
    }

    #[tokio::test]
    async fn active_installed_site_takes_reuse_path() {
        let client = Arc::new(
            MockDockerClient::new()
                .with_container("wp-acme-cafe", true, Some(8101))
                .with_exec_rule("core is-installed", "", 0),
        );
        let store = Arc::new(InMemorySiteStore::new());
        let mut site = SiteInstance::new("acme-cafe", "Acme Cafe", 8101);
        site.installed = true;
        site.status = SiteStatus::Ready;
        store.upsert(site).await.unwrap();

        let coord = coordinator(Arc::clone(&client), Arc::clone(&store), test_config());
        let outcome = coord.provision(request()).await.unwrap();
        assert!(outcome.reused);
        assert_eq!(outcome.site.port, 8101);
        assert!(outcome.apply_report.is_none());

        let calls = client.exec_calls();
        assert!(calls.iter().any(|c| c.contains("user update admin")));
        assert!(calls.iter().any(|c| c.contains("option delete")));
        // The reuse path never touches content or theme.
        assert!(!calls.iter().any(|c| c.contains("post create")));
        assert!(!calls.iter().any(|c| c.contains("theme install")));
    }

    #[tokio::test]
    async fn missing_container_falls_back_to_create() {
        let client = Arc::new(healthy_mock());
        let store = Arc::new(InMemorySiteStore::new());
        let mut site = SiteInstance::new("acme-cafe", "Acme Cafe", 8101);
        site.installed = true;
        store.upsert(site).await.unwrap();

        let coord = coordinator(Arc::clone(&client), Arc::clone(&store), test_config());
        let outcome = coord.provision(request()).await.unwrap();
        assert!(!outcome.reused);
        assert!(client.containers.lock().unwrap().contains_key("wp-acme-cafe"));
    }

    #[tokio::test]
    async fn theme_failure_marks_site_failed() {
        let client = Arc::new(
            MockDockerClient::new()
                .with_exec_rule("mysqladmin ping", "mysqld is alive\n", 0)
                .with_exec_rule("--info", "WP-CLI 2.10.0\n", 0)
                .with_exec_rule("core is-installed", "", 1)
                .with_exec_rule("theme is-installed", "", 1)
                .with_exec_rule("theme install", "", 1),
        );
        let store = Arc::new(InMemorySiteStore::new());
        let (tx, mut rx) = mpsc::channel(32);
        let coord =
            coordinator(Arc::clone(&client), Arc::clone(&store), test_config())
                .with_events(tx);

        let err = coord.provision(request()).await.unwrap_err();
        assert!(matches!(
            err,
            PressforgeError::Provision(ProvisionError::ThemeResolution { .. })
        ));
        assert_eq!(store.get("acme-cafe").await.unwrap().status, SiteStatus::Failed);

        let mut steps = Vec::new();
        while let Ok(event) = rx.try_recv() {
            steps.push(event.step);
        }
        assert!(steps.contains(&ProvisionStep::Failed));
    }

    #[tokio::test]
    async fn invalid_structure_is_rejected() {
        let client = Arc::new(healthy_mock());
        let store = Arc::new(InMemorySiteStore::new());
        let coord = coordinator(client, Arc::clone(&store), test_config());

        let mut req = request();
        req.structure = Some(StructureSpec {
            pages: vec![],
            menu: vec![],
            theme_suggestions: vec![],
        });
        let err = coord.provision(req).await.unwrap_err();
        assert!(matches!(err, PressforgeError::Content(_)));
        assert_eq!(store.get("acme-cafe").await.unwrap().status, SiteStatus::Failed);
    }

    #[tokio::test]
    async fn teardown_destroys_and_deactivates() {
        let client = Arc::new(healthy_mock());
        let store = Arc::new(InMemorySiteStore::new());
        let coord = coordinator(Arc::clone(&client), Arc::clone(&store), test_config());
        coord.provision(request()).await.unwrap();

        coord.teardown("acme-cafe").await.unwrap();
        assert!(client.containers.lock().unwrap().is_empty());
        assert!(!store.get("acme-cafe").await.unwrap().active);
    }
}
