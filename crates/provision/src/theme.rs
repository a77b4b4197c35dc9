//! Theme resolution and installation.
//!
//! Themes resolve through a catalog first, so curated sources win over
//! the public repository, with the public repository as fallback when a
//! curated source fails to install. Activation only happens after one of
//! the install paths succeeded.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use pressforge_content::applier::wp_args;
use pressforge_core::command::CommandRunner;
use pressforge_core::error::ProvisionError;

/// A resolvable theme: slug plus an optional curated source archive.
#[derive(Debug, Clone)]
pub struct ThemeDescriptor {
    pub slug: String,
    pub source_url: Option<String>,
}

/// Catalog of known themes with usage accounting.
pub trait ThemeCatalog: Send + Sync {
    /// Looks up a theme by slug. `None` means the slug is not curated
    /// and should install from the public repository.
    fn resolve(&self, slug: &str) -> impl Future<Output = Option<ThemeDescriptor>> + Send;

    /// Records one successful activation of `slug`.
    fn record_usage(&self, slug: &str) -> impl Future<Output = ()> + Send;
}

/// Catalog backed by an in-process map.
#[derive(Default)]
pub struct InMemoryThemeCatalog {
    themes: RwLock<HashMap<String, ThemeDescriptor>>,
    usage: RwLock<HashMap<String, u64>>,
}

impl InMemoryThemeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, descriptor: ThemeDescriptor) {
        self.themes
            .write()
            .await
            .insert(descriptor.slug.clone(), descriptor);
    }

    pub async fn usage_count(&self, slug: &str) -> u64 {
        self.usage.read().await.get(slug).copied().unwrap_or(0)
    }
}

impl ThemeCatalog for InMemoryThemeCatalog {
    async fn resolve(&self, slug: &str) -> Option<ThemeDescriptor> {
        self.themes.read().await.get(slug).cloned()
    }

    async fn record_usage(&self, slug: &str) {
        *self.usage.write().await.entry(slug.to_owned()).or_insert(0) += 1;
    }
}

/// Installs and activates themes inside site containers.
pub struct ThemeInstaller<R, C> {
    runner: Arc<R>,
    catalog: Arc<C>,
    command_timeout: Duration,
}

impl<R: CommandRunner, C: ThemeCatalog> ThemeInstaller<R, C> {
    pub fn new(runner: Arc<R>, catalog: Arc<C>, command_timeout: Duration) -> Self {
        Self {
            runner,
            catalog,
            command_timeout,
        }
    }

    /// Ensures `slug` is installed and active in `container`.
    ///
    /// Install order: skip if already installed, else the curated
    /// source URL, else the public repository. When the curated path
    /// failed and the fallback also fails, the curated-path error is
    /// the one reported.
    pub async fn ensure_theme(&self, container: &str, slug: &str) -> Result<(), ProvisionError> {
        let descriptor = self
            .catalog
            .resolve(slug)
            .await
            .unwrap_or_else(|| ThemeDescriptor {
                slug: slug.to_owned(),
                source_url: None,
            });

        if self.is_installed(container, slug).await? {
            debug!(container, theme = slug, "theme already installed");
        } else {
            self.install(container, &descriptor).await?;
        }

        let activate = wp_args(&["theme", "activate", slug]);
        let out = self.runner.run(container, &activate, self.command_timeout).await?;
        if !out.success() {
            return Err(ProvisionError::ThemeResolution {
                slug: slug.to_owned(),
                reason: format!("activation failed: {}", out.stderr.trim()),
            });
        }

        self.catalog.record_usage(slug).await;
        info!(container, theme = slug, "theme activated");
        Ok(())
    }

    async fn is_installed(&self, container: &str, slug: &str) -> Result<bool, ProvisionError> {
        let probe = wp_args(&["theme", "is-installed", slug]);
        let out = self.runner.run(container, &probe, self.command_timeout).await?;
        Ok(out.success())
    }

    async fn install(
        &self,
        container: &str,
        descriptor: &ThemeDescriptor,
    ) -> Result<(), ProvisionError> {
        let curated_failure = match &descriptor.source_url {
            Some(url) => {
                let args = wp_args(&["theme", "install", url]);
                let out = self.runner.run(container, &args, self.command_timeout).await?;
                if out.success() {
                    debug!(container, theme = %descriptor.slug, "installed from curated source");
                    return Ok(());
                }
                let reason = format!("curated source install failed: {}", out.stderr.trim());
                warn!(container, theme = %descriptor.slug, %reason, "falling back to public repository");
                Some(reason)
            }
            None => None,
        };

        let args = wp_args(&["theme", "install", &descriptor.slug]);
        let out = self.runner.run(container, &args, self.command_timeout).await?;
        if out.success() {
            debug!(container, theme = %descriptor.slug, "installed from public repository");
            return Ok(());
        }

        Err(ProvisionError::ThemeResolution {
            slug: descriptor.slug.clone(),
            reason: curated_failure
                .unwrap_or_else(|| format!("repository install failed: {}", out.stderr.trim())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::{DockerCommandRunner, MockDockerClient};

    fn installer(
        client: Arc<MockDockerClient>,
        catalog: Arc<InMemoryThemeCatalog>,
    ) -> ThemeInstaller<DockerCommandRunner<MockDockerClient>, InMemoryThemeCatalog> {
        ThemeInstaller::new(
            Arc::new(DockerCommandRunner::new(client)),
            catalog,
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn installs_from_curated_source() {
        let client = Arc::new(
            MockDockerClient::new()
                .with_container("wp-acme-cafe", true, None)
                .with_exec_rule("theme is-installed", "", 1),
        );
        let catalog = Arc::new(InMemoryThemeCatalog::new());
        catalog
            .insert(ThemeDescriptor {
                slug: "bistro".to_owned(),
                source_url: Some("https://themes.example.com/bistro.zip".to_owned()),
            })
            .await;
        installer(Arc::clone(&client), Arc::clone(&catalog))
            .ensure_theme("wp-acme-cafe", "bistro")
            .await
            .unwrap();
        let calls = client.exec_calls();
        assert!(calls.iter().any(|c| c.contains("theme install https://themes.example.com/bistro.zip")));
        assert!(calls.iter().any(|c| c.contains("theme activate bistro")));
        assert_eq!(catalog.usage_count("bistro").await, 1);
    }

    #[tokio::test]
    async fn uncurated_slug_installs_from_public_repository() {
        let client = Arc::new(
            MockDockerClient::new()
                .with_container("wp-acme-cafe", true, None)
                .with_exec_rule("theme is-installed", "", 1),
        );
        let catalog = Arc::new(InMemoryThemeCatalog::new());
        installer(Arc::clone(&client), catalog)
            .ensure_theme("wp-acme-cafe", "twentytwentyfour")
            .await
            .unwrap();
        let calls = client.exec_calls();
        assert!(calls.iter().any(|c| c.contains("theme install twentytwentyfour")));
    }

    #[tokio::test]
    async fn curated_failure_falls_back_to_repository() {
        let client = Arc::new(
            MockDockerClient::new()
                .with_container("wp-acme-cafe", true, None)
                .with_exec_rule("theme is-installed", "", 1)
                .with_exec_rule("theme install https://", "", 1),
        );
        let catalog = Arc::new(InMemoryThemeCatalog::new());
        catalog
            .insert(ThemeDescriptor {
                slug: "bistro".to_owned(),
                source_url: Some("https://themes.example.com/bistro.zip".to_owned()),
            })
            .await;
        installer(Arc::clone(&client), Arc::clone(&catalog))
            .ensure_theme("wp-acme-cafe", "bistro")
            .await
            .unwrap();
        let calls = client.exec_calls();
        assert!(calls.iter().any(|c| c.contains("theme install bistro")));
        assert_eq!(catalog.usage_count("bistro").await, 1);
    }

    #[tokio::test]
    async fn double_failure_reports_curated_error() {
        let client = Arc::new(
            MockDockerClient::new()
                .with_container("wp-acme-cafe", true, None)
                .with_exec_rule("theme is-installed", "", 1)
                .with_exec_rule("theme install", "", 1),
        );
        let catalog = Arc::new(InMemoryThemeCatalog::new());
        catalog
            .insert(ThemeDescriptor {
                slug: "bistro".to_owned(),
                source_url: Some("https://themes.example.com/bistro.zip".to_owned()),
            })
            .await;
        let err = installer(client, Arc::clone(&catalog))
            .ensure_theme("wp-acme-cafe", "bistro")
            .await
            .unwrap_err();
        match err {
            ProvisionError::ThemeResolution { slug, reason } => {
                assert_eq!(slug, "bistro");
                assert!(reason.contains("curated source"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(catalog.usage_count("bistro").await, 0);
    }

    #[tokio::test]
    async fn installed_theme_is_only_activated() {
        let client = Arc::new(
            MockDockerClient::new()
                .with_container("wp-acme-cafe", true, None)
                .with_exec_rule("theme is-installed", "", 0),
        );
        let catalog = Arc::new(InMemoryThemeCatalog::new());
        installer(Arc::clone(&client), catalog)
            .ensure_theme("wp-acme-cafe", "bistro")
            .await
            .unwrap();
        let calls = client.exec_calls();
        assert!(!calls.iter().any(|c| c.contains("theme install")));
        assert!(calls.iter().any(|c| c.contains("theme activate bistro")));
    }
}
