//! Daemon assembly, channel wiring, and lifecycle management.
//!
//! The [`Orchestrator`] loads configuration, connects to the container
//! daemon, wires the provisioning coordinator and the health monitor to
//! their event channels, and runs the main loop until a shutdown signal
//! arrives.
//!
//! # Event flow
//!
//! ```text
//! PreviewReuseCoordinator --ProvisionEvent--> audit logger task
//! HealthMonitor ----------HealthAlertEvent--> alert logger task
//! ```
//!
//! Both channels are drained by logger tasks so senders never block;
//! a deployment plugs a real notification sink in their place.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};

use pressforge_content::enrich::FallbackEnricher;
use pressforge_core::config::PressforgeConfig;
use pressforge_core::event::{HealthAlertEvent, ProvisionEvent};
use pressforge_core::metrics as m;
use pressforge_core::service::{Service, ServiceHealth};
use pressforge_core::store::{InMemoryPortRegistry, InMemorySiteStore, SiteStore};
use pressforge_health::{HealthMonitor, HttpHealthProbe};
use pressforge_provision::{BollardDockerClient, InMemoryThemeCatalog, PreviewReuseCoordinator};

use crate::metrics_server;

const PROVISION_EVENT_CAPACITY: usize = 256;
const ALERT_CHANNEL_CAPACITY: usize = 256;
const UPTIME_UPDATE_SECS: u64 = 10;

type Coordinator = PreviewReuseCoordinator<
    BollardDockerClient,
    InMemoryPortRegistry,
    InMemorySiteStore,
    FallbackEnricher,
    InMemoryThemeCatalog,
>;

/// The main daemon orchestrator.
pub struct Orchestrator {
    config: PressforgeConfig,
    coordinator: Arc<Coordinator>,
    monitor: HealthMonitor<InMemorySiteStore, HttpHealthProbe>,
    store: Arc<InMemorySiteStore>,
    shutdown_tx: broadcast::Sender<()>,
    start_time: Instant,
    provision_rx: Option<mpsc::Receiver<ProvisionEvent>>,
    alert_rx: Option<mpsc::Receiver<HealthAlertEvent>>,
}

impl Orchestrator {
    /// Load configuration from a file and build the orchestrator.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = PressforgeConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    pub async fn build_from_config(config: PressforgeConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        // Install the metrics recorder before anything records.
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
        }

        let docker = Arc::new(
            BollardDockerClient::connect_with_socket(&config.docker.socket_path)
                .map_err(|e| anyhow::anyhow!("failed to connect to docker: {}", e))?,
        );

        let store = Arc::new(InMemorySiteStore::new());
        let registry = Arc::new(InMemoryPortRegistry::new());
        let catalog = Arc::new(InMemoryThemeCatalog::new());

        tracing::debug!("creating inter-module channels");
        let (provision_tx, provision_rx) = mpsc::channel(PROVISION_EVENT_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(16);

        let coordinator = Arc::new(
            PreviewReuseCoordinator::new(
                docker,
                registry,
                Arc::clone(&store),
                catalog,
                FallbackEnricher,
                &config.provision,
            )
            .with_events(provision_tx),
        );

        let probe = HttpHealthProbe::new(Duration::from_secs(config.health.probe_timeout_secs))
            .map_err(|e| anyhow::anyhow!("failed to build health probe: {}", e))?;
        let (monitor, alert_rx) =
            HealthMonitor::new(Arc::clone(&store), Arc::new(probe), config.health.clone())
                .with_alert_channel(ALERT_CHANNEL_CAPACITY);

        tracing::info!("orchestrator initialized");
        Ok(Self {
            config,
            coordinator,
            monitor,
            store,
            shutdown_tx,
            start_time: Instant::now(),
            provision_rx: Some(provision_rx),
            alert_rx: Some(alert_rx),
        })
    }

    /// The provisioning entry point, for embedding callers.
    pub fn coordinator(&self) -> Arc<Coordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Current daemon health: the monitor's own state plus uptime.
    pub async fn health(&self) -> ServiceHealth {
        if self.config.metrics.enabled {
            metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                .set(self.start_time.elapsed().as_secs() as f64);
        }
        self.monitor.health_check().await
    }

    /// Start the health monitor and run until a shutdown signal.
    pub async fn run(&mut self) -> Result<()> {
        let pid_path = (!self.config.general.pid_file.is_empty())
            .then(|| Path::new(&self.config.general.pid_file).to_path_buf());
        if let Some(path) = &pid_path {
            write_pid_file(path)?;
        }

        if let Err(e) = self.monitor.start().await {
            if let Some(path) = &pid_path {
                remove_pid_file(path);
            }
            return Err(anyhow::anyhow!("failed to start health monitor: {}", e));
        }

        let mut event_logger = self.provision_rx.take().map(|rx| {
            spawn_provision_event_logger(rx, self.shutdown_tx.subscribe())
        });
        let mut alert_logger = self
            .alert_rx
            .take()
            .map(|rx| spawn_alert_logger(rx, self.shutdown_tx.subscribe()));
        let mut uptime_updater = self.config.metrics.enabled.then(|| {
            spawn_uptime_updater(
                self.start_time,
                Arc::clone(&self.store),
                self.shutdown_tx.subscribe(),
            )
        });

        tracing::info!("entering main event loop");
        let signal = wait_for_shutdown_signal().await?;
        tracing::info!(signal, "shutdown signal received");

        let _ = self.shutdown_tx.send(());
        if let Some(task) = event_logger.take() {
            let _ = task.await;
        }
        if let Some(task) = alert_logger.take() {
            let _ = task.await;
        }
        if let Some(task) = uptime_updater.take() {
            let _ = task.await;
        }

        if let Err(e) = self.monitor.stop().await {
            tracing::error!(error = %e, "failed to stop health monitor");
        }

        if let Some(path) = &pid_path {
            remove_pid_file(path);
        }
        Ok(())
    }
}

/// Wait for SIGTERM or SIGINT; returns the signal name.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Logs provisioning lifecycle events for audit.
fn spawn_provision_event_logger(
    mut rx: mpsc::Receiver<ProvisionEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            tracing::info!(
                                event_id = %event.id,
                                site = %event.site_slug,
                                step = %event.step,
                                detail = event.detail.as_deref().unwrap_or(""),
                                trace = %event.metadata.trace_id,
                                "provisioning step"
                            );
                        }
                        None => {
                            tracing::debug!("provision event channel closed, exiting logger");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("provision event logger shutting down");
                    break;
                }
            }
        }
    })
}

/// Logs health alerts. A deployment replaces this with a notification
/// sink keyed on `owner_id`.
fn spawn_alert_logger(
    mut rx: mpsc::Receiver<HealthAlertEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                alert = rx.recv() => {
                    match alert {
                        Some(alert) => {
                            tracing::warn!(
                                alert_id = %alert.id,
                                site = %alert.site_slug,
                                site_name = %alert.site_name,
                                owner = %alert.owner_id,
                                status = %alert.status,
                                failed_checks = alert.failed_checks,
                                "site health changed"
                            );
                        }
                        None => {
                            tracing::debug!("alert channel closed, exiting logger");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("alert logger shutting down");
                    break;
                }
            }
        }
    })
}

/// Keeps uptime and active-site gauges fresh between scrapes.
fn spawn_uptime_updater(
    start_time: Instant,
    store: Arc<InMemorySiteStore>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(UPTIME_UPDATE_SECS));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                        .set(start_time.elapsed().as_secs() as f64);
                    let active = store.list_active().await.len();
                    metrics::gauge!(m::DAEMON_ACTIVE_SITES).set(active as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}

/// Write the current process PID to a file.
///
/// `create_new` makes creation atomic, so a second daemon instance
/// fails here instead of racing; the regular-file check rejects a
/// symlink planted at the path.
fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{pid}")?;
    tracing::info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on shutdown. Logs but never fails.
fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}
