//! HTTP health probing.
//!
//! Talks to the health endpoint every site carries as a must-use
//! extension. The payload shape below is the contract that extension
//! emits; unknown fields are ignored, missing optional fields degrade to
//! `None` rather than failing the probe.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::debug;

use pressforge_core::error::HealthError;

/// Query string appended to the site URL to reach the health endpoint.
const HEALTH_QUERY: &str = "?pressforge_health=1";

/// JSON payload returned by a site's health endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthPayload {
    /// Self-reported status: `healthy`, `warning`, or `down`
    pub status: String,
    /// Server-side handling time (ms)
    pub response_time: Option<f64>,
    pub wp_version: Option<String>,
    pub php_version: Option<String>,
    pub db_version: Option<String>,
    #[serde(default)]
    pub server: ServerMetrics,
    #[serde(default)]
    pub plugins: PluginMetrics,
}

/// Server resource block of the health payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerMetrics {
    /// One-minute load average
    pub cpu_load: Option<f64>,
    /// Current memory usage (MB)
    pub memory_current: Option<f64>,
    /// Configured memory limit (MB)
    pub memory_limit: Option<f64>,
    /// Disk used (MB)
    pub disk_used: Option<f64>,
}

/// Plugin block of the health payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginMetrics {
    pub updates_available: Option<u32>,
}

/// One successful probe: the payload plus the round-trip time measured
/// on this side of the connection.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub payload: HealthPayload,
    pub response_time_ms: f64,
}

/// Probe transport abstraction, mocked in monitor tests.
pub trait HealthProbe: Send + Sync + 'static {
    /// Probes the health endpoint of the site at `url`.
    ///
    /// Transport failures, timeouts, non-success statuses, and
    /// malformed payloads are all errors; interpreting them is the
    /// monitor's job.
    fn probe(&self, url: &str) -> impl Future<Output = Result<ProbeReport, HealthError>> + Send;
}

/// Production probe over HTTP.
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self, HealthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HealthError::Probe(format!("http client build failed: {e}")))?;
        Ok(Self { client })
    }
}

impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &str) -> Result<ProbeReport, HealthError> {
        let endpoint = format!("{url}/{HEALTH_QUERY}");
        let start = Instant::now();

        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(|e| HealthError::Probe(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(HealthError::Probe(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let payload: HealthPayload = response
            .json()
            .await
            .map_err(|e| HealthError::InvalidPayload(e.to_string()))?;
        let response_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        debug!(url, status = %payload.status, response_time_ms, "probe completed");
        Ok(ProbeReport {
            payload,
            response_time_ms,
        })
    }
}
