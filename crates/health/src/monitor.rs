//! Health monitoring over provisioned sites.
//!
//! A check probes the site's health endpoint and folds the observation
//! into persisted state. Transport failures and self-reported `down`
//! both count as failures, but a site is only persisted as down after
//! `failure_threshold` consecutive ones; below the threshold it is
//! persisted as warning. Any non-down observation resets the counter.
//! Sweeps run the check across every active site with bounded
//! concurrency; a probe failure never aborts the sweep.

use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use pressforge_core::config::HealthConfig;
use pressforge_core::error::PressforgeError;
use pressforge_core::event::HealthAlertEvent;
use pressforge_core::metrics::{
    HEALTH_ALERTS_SENT_TOTAL, HEALTH_CHECKS_TOTAL, HEALTH_PROBE_DURATION_SECONDS,
    HEALTH_SITES_DOWN, LABEL_STATUS,
};
use pressforge_core::service::{Service, ServiceHealth};
use pressforge_core::store::SiteStore;
use pressforge_core::types::{
    HealthRecord, HealthStatus, ResourceMetrics, SiteInstance, SiteStatus, SoftwareVersions,
};

use crate::probe::HealthProbe;

/// Periodic and on-demand health checking over the site store.
pub struct HealthMonitor<S, Pr> {
    store: Arc<S>,
    probe: Arc<Pr>,
    config: HealthConfig,
    alerts: Option<mpsc::Sender<HealthAlertEvent>>,
    sweep_task: Option<JoinHandle<()>>,
}

impl<S: SiteStore + 'static, Pr: HealthProbe> HealthMonitor<S, Pr> {
    pub fn new(store: Arc<S>, probe: Arc<Pr>, config: HealthConfig) -> Self {
        Self {
            store,
            probe,
            config,
            alerts: None,
            sweep_task: None,
        }
    }

    /// Attaches an alert channel and returns its receiver. Alert sends
    /// are fire-and-forget.
    pub fn with_alert_channel(mut self, capacity: usize) -> (Self, mpsc::Receiver<HealthAlertEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        self.alerts = Some(tx);
        (self, rx)
    }

    /// Checks one site and persists the outcome.
    pub async fn check_site(&self, site: &SiteInstance) {
        run_check(
            self.store.as_ref(),
            self.probe.as_ref(),
            self.config.failure_threshold,
            self.alerts.as_ref(),
            site,
        )
        .await;
    }

    /// On-demand check with a per-site rate limit: a check within
    /// `on_demand_min_interval_secs` of the last one returns the cached
    /// state instead of probing.
    pub async fn check_on_demand(&self, slug: &str) -> Result<SiteInstance, PressforgeError> {
        let site = self.store.get(slug).await?;
        if let Some(last) = site.last_checked_at {
            let min_interval =
                chrono::Duration::seconds(self.config.on_demand_min_interval_secs as i64);
            if Utc::now() - last < min_interval {
                debug!(slug, "within check interval, returning cached state");
                return Ok(site);
            }
        }
        self.check_site(&site).await;
        Ok(self.store.get(slug).await?)
    }

    /// Runs one sweep across every active, ready site.
    pub async fn sweep(&self) {
        sweep_once(
            Arc::clone(&self.store),
            Arc::clone(&self.probe),
            self.config.clone(),
            self.alerts.clone(),
        )
        .await;
    }
}

impl<S: SiteStore + 'static, Pr: HealthProbe> Service for HealthMonitor<S, Pr> {
    fn name(&self) -> &str {
        "health-monitor"
    }

    async fn start(&mut self) -> Result<(), PressforgeError> {
        if self.sweep_task.is_some() {
            return Ok(());
        }
        let store = Arc::clone(&self.store);
        let probe = Arc::clone(&self.probe);
        let config = self.config.clone();
        let alerts = self.alerts.clone();
        let period = std::time::Duration::from_secs(config.sweep_interval_secs);

        self.sweep_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sweep_once(
                    Arc::clone(&store),
                    Arc::clone(&probe),
                    config.clone(),
                    alerts.clone(),
                )
                .await;
            }
        }));
        info!(interval_secs = self.config.sweep_interval_secs, "health monitor started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PressforgeError> {
        if let Some(task) = self.sweep_task.take() {
            task.abort();
            info!("health monitor stopped");
        }
        Ok(())
    }

    async fn health_check(&self) -> ServiceHealth {
        match &self.sweep_task {
            Some(task) if !task.is_finished() => ServiceHealth::Healthy,
            Some(_) => ServiceHealth::Unhealthy("sweep task exited".to_owned()),
            None => ServiceHealth::Degraded("not started".to_owned()),
        }
    }
}

async fn sweep_once<S: SiteStore + 'static, Pr: HealthProbe>(
    store: Arc<S>,
    probe: Arc<Pr>,
    config: HealthConfig,
    alerts: Option<mpsc::Sender<HealthAlertEvent>>,
) {
    let sites: Vec<SiteInstance> = store
        .list_active()
        .await
        .into_iter()
        .filter(|s| s.status == SiteStatus::Ready || s.status == SiteStatus::Updating)
        .collect();
    if sites.is_empty() {
        return;
    }
    debug!(sites = sites.len(), "sweep starting");

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_checks));
    let mut tasks = JoinSet::new();
    for site in sites {
        let semaphore = Arc::clone(&semaphore);
        let store = Arc::clone(&store);
        let probe = Arc::clone(&probe);
        let alerts = alerts.clone();
        let threshold = config.failure_threshold;
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire().await else {
                return;
            };
            run_check(store.as_ref(), probe.as_ref(), threshold, alerts.as_ref(), &site).await;
        });
    }
    while tasks.join_next().await.is_some() {}

    let down = store
        .list_active()
        .await
        .iter()
        .filter(|s| s.health == HealthStatus::Down)
        .count();
    gauge!(HEALTH_SITES_DOWN).set(down as f64);
}

async fn run_check<S: SiteStore, Pr: HealthProbe>(
    store: &S,
    probe: &Pr,
    threshold: u32,
    alerts: Option<&mpsc::Sender<HealthAlertEvent>>,
    site: &SiteInstance,
) {
    let checked_at = Utc::now();
    let report = match probe.probe(&site.url()).await {
        Ok(report) => Some(report),
        Err(e) => {
            debug!(slug = %site.slug, error = %e, "probe failed");
            None
        }
    };

    // An unparseable status string is treated as a degraded site, not a
    // dead one.
    let observed = match &report {
        Some(r) => {
            HealthStatus::from_str_loose(&r.payload.status).unwrap_or(HealthStatus::Warning)
        }
        None => HealthStatus::Down,
    };

    let (persisted, failed_checks) = if observed == HealthStatus::Down {
        let failed = site.failed_checks + 1;
        if failed >= threshold {
            (HealthStatus::Down, failed)
        } else {
            (HealthStatus::Warning, failed)
        }
    } else {
        (observed, 0)
    };

    counter!(HEALTH_CHECKS_TOTAL, LABEL_STATUS => status_label(persisted)).increment(1);
    if let Some(r) = &report {
        histogram!(HEALTH_PROBE_DURATION_SECONDS).record(r.response_time_ms / 1000.0);
    }

    if let Err(e) = store
        .set_health(&site.slug, persisted, failed_checks, checked_at)
        .await
    {
        warn!(slug = %site.slug, error = %e, "persisting health state failed");
        return;
    }

    let record = HealthRecord {
        site_slug: site.slug.clone(),
        status: persisted,
        checked_at,
        response_time_ms: report.as_ref().map(|r| r.response_time_ms).unwrap_or(0.0),
        resources: report
            .as_ref()
            .map(|r| ResourceMetrics {
                cpu: r.payload.server.cpu_load,
                mem_mb: r.payload.server.memory_current,
                disk_mb: r.payload.server.disk_used,
            })
            .unwrap_or_default(),
        versions: report
            .as_ref()
            .map(|r| SoftwareVersions {
                app: r.payload.wp_version.clone().unwrap_or_default(),
                lang: r.payload.php_version.clone().unwrap_or_default(),
                db: r.payload.db_version.clone(),
            })
            .unwrap_or_default(),
    };
    if let Err(e) = store.append_record(record).await {
        warn!(slug = %site.slug, error = %e, "appending health record failed");
    }

    let state_changed = persisted != site.health;
    let notable = persisted != HealthStatus::Healthy || site.health == HealthStatus::Down;
    if state_changed && notable {
        if let Some(sender) = alerts {
            let event = HealthAlertEvent::new(
                &site.slug,
                &site.site_name,
                &site.owner_id,
                persisted,
                failed_checks,
            );
            counter!(HEALTH_ALERTS_SENT_TOTAL).increment(1);
            if let Err(e) = sender.try_send(event) {
                debug!(slug = %site.slug, error = %e, "dropping health alert");
            }
        }
    }
}

fn status_label(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Warning => "warning",
        HealthStatus::Down => "down",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{HealthPayload, PluginMetrics, ProbeReport, ServerMetrics};
    use pressforge_core::error::HealthError;
    use pressforge_core::store::InMemorySiteStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// One scripted probe outcome.
    #[derive(Clone)]
    enum Step {
        Report(ProbeReport),
        Fail(String),
    }

    /// Probe returning a scripted sequence of outcomes; repeats the
    /// last one when the script runs out.
    struct ScriptedProbe {
        script: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(outcomes: Vec<Step>) -> Self {
            Self {
                script: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, _url: &str) -> Result<ProbeReport, HealthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().cloned()
                }
            };
            match step {
                Some(Step::Report(report)) => Ok(report),
                Some(Step::Fail(reason)) => Err(HealthError::Probe(reason)),
                None => Err(HealthError::Probe("script exhausted".to_owned())),
            }
        }
    }

    fn ok_report(status: &str) -> Step {
        Step::Report(ProbeReport {
            payload: HealthPayload {
                status: status.to_owned(),
                response_time: Some(10.0),
                wp_version: Some("6.5.2".to_owned()),
                php_version: Some("8.2.18".to_owned()),
                db_version: Some("8.0.36".to_owned()),
                server: ServerMetrics {
                    cpu_load: Some(0.3),
                    memory_current: Some(42.0),
                    memory_limit: Some(256.0),
                    disk_used: Some(1200.0),
                },
                plugins: PluginMetrics {
                    updates_available: Some(1),
                },
            },
            response_time_ms: 12.0,
        })
    }

    fn probe_err() -> Step {
        Step::Fail("connection refused".to_owned())
    }

    fn config() -> HealthConfig {
        HealthConfig {
            sweep_interval_secs: 300,
            probe_timeout_secs: 10,
            failure_threshold: 3,
            max_concurrent_checks: 4,
            on_demand_min_interval_secs: 60,
        }
    }

    async fn ready_site(store: &InMemorySiteStore, slug: &str, port: u16) -> SiteInstance {
        let mut site = SiteInstance::new(slug, "Test Site", port);
        site.status = SiteStatus::Ready;
        site.installed = true;
        store.upsert(site.clone()).await.unwrap();
        site
    }

    #[tokio::test]
    async fn failures_count_up_and_reset_on_success() {
        let store = Arc::new(InMemorySiteStore::new());
        ready_site(&store, "acme-cafe", 8101).await;
        let probe = Arc::new(ScriptedProbe::new(vec![
            probe_err(),
            probe_err(),
            ok_report("healthy"),
            ok_report("healthy"),
            ok_report("healthy"),
        ]));
        let monitor = HealthMonitor::new(Arc::clone(&store), probe, config());

        let mut observed_counts = Vec::new();
        for _ in 0..5 {
            let site = store.get("acme-cafe").await.unwrap();
            monitor.check_site(&site).await;
            observed_counts.push(store.get("acme-cafe").await.unwrap().failed_checks);
        }
        assert_eq!(observed_counts, vec![1, 2, 0, 0, 0]);
        assert_eq!(store.get("acme-cafe").await.unwrap().health, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn down_is_persisted_only_at_threshold() {
        let store = Arc::new(InMemorySiteStore::new());
        ready_site(&store, "acme-cafe", 8101).await;
        let probe = Arc::new(ScriptedProbe::new(vec![probe_err()]));
        let monitor = HealthMonitor::new(Arc::clone(&store), probe, config());

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let site = store.get("acme-cafe").await.unwrap();
            monitor.check_site(&site).await;
            statuses.push(store.get("acme-cafe").await.unwrap().health);
        }
        assert_eq!(
            statuses,
            vec![HealthStatus::Warning, HealthStatus::Warning, HealthStatus::Down]
        );
    }

    #[tokio::test]
    async fn remote_down_below_threshold_is_clamped_to_warning() {
        let store = Arc::new(InMemorySiteStore::new());
        ready_site(&store, "acme-cafe", 8101).await;
        let probe = Arc::new(ScriptedProbe::new(vec![ok_report("down")]));
        let monitor = HealthMonitor::new(Arc::clone(&store), probe, config());

        let site = store.get("acme-cafe").await.unwrap();
        monitor.check_site(&site).await;
        let after = store.get("acme-cafe").await.unwrap();
        assert_eq!(after.health, HealthStatus::Warning);
        assert_eq!(after.failed_checks, 1);
    }

    #[tokio::test]
    async fn remote_warning_passes_through_and_resets_counter() {
        let store = Arc::new(InMemorySiteStore::new());
        let mut site = ready_site(&store, "acme-cafe", 8101).await;
        site.failed_checks = 2;
        store.upsert(site.clone()).await.unwrap();
        let probe = Arc::new(ScriptedProbe::new(vec![ok_report("warning")]));
        let monitor = HealthMonitor::new(Arc::clone(&store), probe, config());

        monitor.check_site(&store.get("acme-cafe").await.unwrap()).await;
        let after = store.get("acme-cafe").await.unwrap();
        assert_eq!(after.health, HealthStatus::Warning);
        assert_eq!(after.failed_checks, 0);
    }

    #[tokio::test]
    async fn confirmed_down_and_recovery_emit_alerts() {
        let store = Arc::new(InMemorySiteStore::new());
        let mut site = ready_site(&store, "acme-cafe", 8101).await;
        site.owner_id = "owner-1".to_owned();
        store.upsert(site).await.unwrap();
        let probe = Arc::new(ScriptedProbe::new(vec![
            probe_err(),
            probe_err(),
            probe_err(),
            ok_report("healthy"),
        ]));
        let (monitor, mut alerts) =
            HealthMonitor::new(Arc::clone(&store), probe, config()).with_alert_channel(16);

        for _ in 0..4 {
            let site = store.get("acme-cafe").await.unwrap();
            monitor.check_site(&site).await;
        }

        let mut received = Vec::new();
        while let Ok(event) = alerts.try_recv() {
            received.push(event);
        }
        // Healthy -> warning, warning -> confirmed down, down -> recovered.
        let statuses: Vec<HealthStatus> = received.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![HealthStatus::Warning, HealthStatus::Down, HealthStatus::Healthy]
        );
        let down_alert = &received[1];
        assert_eq!(down_alert.failed_checks, 3);
        assert_eq!(down_alert.owner_id, "owner-1");
    }

    #[tokio::test]
    async fn probe_records_observation_history() {
        let store = Arc::new(InMemorySiteStore::new());
        ready_site(&store, "acme-cafe", 8101).await;
        let probe = Arc::new(ScriptedProbe::new(vec![ok_report("healthy")]));
        let monitor = HealthMonitor::new(Arc::clone(&store), probe, config());

        monitor.check_site(&store.get("acme-cafe").await.unwrap()).await;
        let records = store.records("acme-cafe").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].versions.app, "6.5.2");
        assert_eq!(records[0].resources.cpu, Some(0.3));
        assert_eq!(records[0].response_time_ms, 12.0);
    }

    #[tokio::test]
    async fn sweep_checks_every_ready_site() {
        let store = Arc::new(InMemorySiteStore::new());
        ready_site(&store, "site-a", 8101).await;
        ready_site(&store, "site-b", 8102).await;
        // Still provisioning: the sweep must skip it.
        store
            .upsert(SiteInstance::new("site-c", "Site C", 8103))
            .await
            .unwrap();
        let probe = Arc::new(ScriptedProbe::new(vec![ok_report("healthy")]));
        let monitor = HealthMonitor::new(Arc::clone(&store), Arc::clone(&probe), config());

        monitor.sweep().await;
        assert_eq!(probe.calls(), 2);
        assert!(store.get("site-c").await.unwrap().last_checked_at.is_none());
    }

    #[tokio::test]
    async fn one_sites_failure_does_not_block_the_other() {
        let store = Arc::new(InMemorySiteStore::new());
        ready_site(&store, "site-a", 8101).await;
        ready_site(&store, "site-b", 8102).await;
        // Both sites see the same scripted outcome stream; one errs.
        let probe = Arc::new(ScriptedProbe::new(vec![probe_err()]));
        let monitor = HealthMonitor::new(Arc::clone(&store), probe, config());

        monitor.sweep().await;
        assert!(store.get("site-a").await.unwrap().last_checked_at.is_some());
        assert!(store.get("site-b").await.unwrap().last_checked_at.is_some());
    }

    #[tokio::test]
    async fn on_demand_check_is_rate_limited() {
        let store = Arc::new(InMemorySiteStore::new());
        ready_site(&store, "acme-cafe", 8101).await;
        let probe = Arc::new(ScriptedProbe::new(vec![ok_report("healthy")]));
        let monitor = HealthMonitor::new(Arc::clone(&store), Arc::clone(&probe), config());

        monitor.check_on_demand("acme-cafe").await.unwrap();
        monitor.check_on_demand("acme-cafe").await.unwrap();
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn service_lifecycle() {
        let store = Arc::new(InMemorySiteStore::new());
        let probe = Arc::new(ScriptedProbe::new(vec![ok_report("healthy")]));
        let mut monitor = HealthMonitor::new(store, probe, config());

        assert_eq!(
            monitor.health_check().await,
            ServiceHealth::Degraded("not started".to_owned())
        );
        monitor.start().await.unwrap();
        assert_eq!(monitor.health_check().await, ServiceHealth::Healthy);
        monitor.stop().await.unwrap();
        assert_eq!(
            monitor.health_check().await,
            ServiceHealth::Degraded("not started".to_owned())
        );
    }
}
