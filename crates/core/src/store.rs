//! Storage traits for site records and port bindings.
//!
//! Persistence is injected at the seams: pipeline code only sees
//! [`SiteStore`] and [`PortRegistry`], so a deployment can back them with
//! whatever durable store it has. The in-memory implementations here are
//! the defaults and carry the uniqueness invariants (one record per
//! slug, one active site per host port).

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::types::{HealthRecord, HealthStatus, SiteInstance, SiteStatus};

/// Site record storage.
pub trait SiteStore: Send + Sync {
    /// Inserts or replaces the record for `site.slug`.
    ///
    /// Fails with [`StorageError::Conflict`] when another active site
    /// already holds `site.port`.
    fn upsert(
        &self,
        site: SiteInstance,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Fetches one record by slug.
    fn get(&self, slug: &str) -> impl Future<Output = Result<SiteInstance, StorageError>> + Send;

    /// Lists every active record.
    fn list_active(&self) -> impl Future<Output = Vec<SiteInstance>> + Send;

    /// Updates the provisioning status of one record.
    fn set_status(
        &self,
        slug: &str,
        status: SiteStatus,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Updates the persisted health state of one record.
    fn set_health(
        &self,
        slug: &str,
        health: HealthStatus,
        failed_checks: u32,
        checked_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Marks one record inactive. Inactive sites keep their record but
    /// are skipped by sweeps and free their port binding.
    fn deactivate(&self, slug: &str) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Appends one health observation.
    fn append_record(
        &self,
        record: HealthRecord,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Health observations for one site, oldest first.
    fn records(&self, slug: &str) -> impl Future<Output = Vec<HealthRecord>> + Send;
}

/// Host-port binding storage.
pub trait PortRegistry: Send + Sync {
    /// Binds `port` to `slug`.
    ///
    /// Fails with [`StorageError::Conflict`] when the port is already
    /// bound to a different slug.
    fn bind(&self, slug: &str, port: u16) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// The port bound to `slug`, if any.
    fn resolve(&self, slug: &str) -> impl Future<Output = Option<u16>> + Send;

    /// Releases the binding for `slug`. Releasing an unbound slug is a
    /// no-op.
    fn release(&self, slug: &str) -> impl Future<Output = ()> + Send;

    /// Every currently bound port.
    fn bound_ports(&self) -> impl Future<Output = Vec<u16>> + Send;
}

/// Default in-memory site store.
#[derive(Debug, Default)]
pub struct InMemorySiteStore {
    sites: RwLock<HashMap<String, SiteInstance>>,
    records: RwLock<HashMap<String, Vec<HealthRecord>>>,
}

impl InMemorySiteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SiteStore for InMemorySiteStore {
    async fn upsert(&self, site: SiteInstance) -> Result<(), StorageError> {
        let mut sites = self.sites.write().await;
        if site.active {
            let clash = sites
                .values()
                .any(|s| s.active && s.slug != site.slug && s.port == site.port);
            if clash {
                return Err(StorageError::Conflict(format!(
                    "port {} already bound to an active site",
                    site.port
                )));
            }
        }
        sites.insert(site.slug.clone(), site);
        Ok(())
    }

    async fn get(&self, slug: &str) -> Result<SiteInstance, StorageError> {
        self.sites
            .read()
            .await
            .get(slug)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(slug.to_owned()))
    }

    async fn list_active(&self) -> Vec<SiteInstance> {
        self.sites
            .read()
            .await
            .values()
            .filter(|s| s.active)
            .cloned()
            .collect()
    }

    async fn set_status(&self, slug: &str, status: SiteStatus) -> Result<(), StorageError> {
        let mut sites = self.sites.write().await;
        let site = sites
            .get_mut(slug)
            .ok_or_else(|| StorageError::NotFound(slug.to_owned()))?;
        site.status = status;
        Ok(())
    }

    async fn set_health(
        &self,
        slug: &str,
        health: HealthStatus,
        failed_checks: u32,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut sites = self.sites.write().await;
        let site = sites
            .get_mut(slug)
            .ok_or_else(|| StorageError::NotFound(slug.to_owned()))?;
        site.health = health;
        site.failed_checks = failed_checks;
        site.last_checked_at = Some(checked_at);
        Ok(())
    }

    async fn deactivate(&self, slug: &str) -> Result<(), StorageError> {
        let mut sites = self.sites.write().await;
        let site = sites
            .get_mut(slug)
            .ok_or_else(|| StorageError::NotFound(slug.to_owned()))?;
        site.active = false;
        Ok(())
    }

    async fn append_record(&self, record: HealthRecord) -> Result<(), StorageError> {
        self.records
            .write()
            .await
            .entry(record.site_slug.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn records(&self, slug: &str) -> Vec<HealthRecord> {
        self.records
            .read()
            .await
            .get(slug)
            .cloned()
            .unwrap_or_default()
    }
}

/// Default in-memory port registry.
#[derive(Debug, Default)]
pub struct InMemoryPortRegistry {
    bindings: RwLock<HashMap<String, u16>>,
}

impl InMemoryPortRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PortRegistry for InMemoryPortRegistry {
    async fn bind(&self, slug: &str, port: u16) -> Result<(), StorageError> {
        let mut bindings = self.bindings.write().await;
        let clash = bindings
            .iter()
            .any(|(bound_slug, bound_port)| *bound_port == port && bound_slug != slug);
        if clash {
            return Err(StorageError::Conflict(format!(
                "port {port} already bound"
            )));
        }
        bindings.insert(slug.to_owned(), port);
        Ok(())
    }

    async fn resolve(&self, slug: &str) -> Option<u16> {
        self.bindings.read().await.get(slug).copied()
    }

    async fn release(&self, slug: &str) {
        self.bindings.write().await.remove(slug);
    }

    async fn bound_ports(&self) -> Vec<u16> {
        self.bindings.read().await.values().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceMetrics, SoftwareVersions};

    #[tokio::test]
    async fn upsert_then_get_roundtrip() {
        let store = InMemorySiteStore::new();
        let site = SiteInstance::new("acme-cafe", "Acme Cafe", 8101);
        store.upsert(site.clone()).await.unwrap();
        let fetched = store.get("acme-cafe").await.unwrap();
        assert_eq!(fetched.slug, "acme-cafe");
        assert_eq!(fetched.port, 8101);
    }

    #[tokio::test]
    async fn get_missing_returns_not_found() {
        let store = InMemorySiteStore::new();
        let err = store.get("ghost").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn upsert_rejects_duplicate_active_port() {
        let store = InMemorySiteStore::new();
        store
            .upsert(SiteInstance::new("site-a", "Site A", 8101))
            .await
            .unwrap();
        let err = store
            .upsert(SiteInstance::new("site-b", "Site B", 8101))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn inactive_site_frees_its_port() {
        let store = InMemorySiteStore::new();
        store
            .upsert(SiteInstance::new("site-a", "Site A", 8101))
            .await
            .unwrap();
        store.deactivate("site-a").await.unwrap();
        // Same port is now usable by a new active site.
        store
            .upsert(SiteInstance::new("site-b", "Site B", 8101))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upsert_same_slug_replaces() {
        let store = InMemorySiteStore::new();
        let mut site = SiteInstance::new("acme-cafe", "Acme Cafe", 8101);
        store.upsert(site.clone()).await.unwrap();
        site.installed = true;
        store.upsert(site).await.unwrap();
        assert!(store.get("acme-cafe").await.unwrap().installed);
    }

    #[tokio::test]
    async fn list_active_skips_deactivated() {
        let store = InMemorySiteStore::new();
        store
            .upsert(SiteInstance::new("site-a", "Site A", 8101))
            .await
            .unwrap();
        store
            .upsert(SiteInstance::new("site-b", "Site B", 8102))
            .await
            .unwrap();
        store.deactivate("site-a").await.unwrap();
        let active = store.list_active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].slug, "site-b");
    }

    #[tokio::test]
    async fn set_health_updates_fields() {
        let store = InMemorySiteStore::new();
        store
            .upsert(SiteInstance::new("acme-cafe", "Acme Cafe", 8101))
            .await
            .unwrap();
        let now = Utc::now();
        store
            .set_health("acme-cafe", HealthStatus::Down, 3, now)
            .await
            .unwrap();
        let site = store.get("acme-cafe").await.unwrap();
        assert_eq!(site.health, HealthStatus::Down);
        assert_eq!(site.failed_checks, 3);
        assert_eq!(site.last_checked_at, Some(now));
    }

    #[tokio::test]
    async fn records_append_in_order() {
        let store = InMemorySiteStore::new();
        for status in [HealthStatus::Healthy, HealthStatus::Down] {
            store
                .append_record(HealthRecord {
                    site_slug: "acme-cafe".to_owned(),
                    status,
                    checked_at: Utc::now(),
                    response_time_ms: 10.0,
                    resources: ResourceMetrics::default(),
                    versions: SoftwareVersions::default(),
                })
                .await
                .unwrap();
        }
        let records = store.records("acme-cafe").await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, HealthStatus::Healthy);
        assert_eq!(records[1].status, HealthStatus::Down);
    }

    #[tokio::test]
    async fn registry_bind_resolve_release() {
        let registry = InMemoryPortRegistry::new();
        registry.bind("acme-cafe", 8101).await.unwrap();
        assert_eq!(registry.resolve("acme-cafe").await, Some(8101));
        registry.release("acme-cafe").await;
        assert_eq!(registry.resolve("acme-cafe").await, None);
    }

    #[tokio::test]
    async fn registry_rejects_double_bind() {
        let registry = InMemoryPortRegistry::new();
        registry.bind("site-a", 8101).await.unwrap();
        let err = registry.bind("site-b", 8101).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn registry_rebind_same_slug_is_allowed() {
        let registry = InMemoryPortRegistry::new();
        registry.bind("site-a", 8101).await.unwrap();
        registry.bind("site-a", 8101).await.unwrap();
        assert_eq!(registry.resolve("site-a").await, Some(8101));
    }

    #[tokio::test]
    async fn registry_bound_ports_lists_all() {
        let registry = InMemoryPortRegistry::new();
        registry.bind("site-a", 8101).await.unwrap();
        registry.bind("site-b", 8102).await.unwrap();
        let mut ports = registry.bound_ports().await;
        ports.sort_unstable();
        assert_eq!(ports, vec![8101, 8102]);
    }
}
