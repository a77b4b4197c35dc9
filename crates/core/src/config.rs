//! Configuration loading and validation for `pressforge.toml`.
//!
//! [`PressforgeConfig`] is the top-level structure holding every module's
//! settings; each module reads only its own section.
//!
//! # Loading precedence
//! 1. CLI arguments (highest)
//! 2. Environment variables (`PRESSFORGE_HEALTH_SWEEP_INTERVAL_SECS=60` style)
//! 3. Config file (`pressforge.toml`)
//! 4. Defaults (`Default` impls)
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), pressforge_core::PressforgeError> {
//! use pressforge_core::config::PressforgeConfig;
//!
//! // Load from file with env overrides applied
//! let config = PressforgeConfig::load("pressforge.toml").await?;
//!
//! // Parse a TOML string directly
//! let config = PressforgeConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, PressforgeError};

/// Upper bound for the health sweep interval (one day).
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 86_400;
/// Upper bound for concurrent health checks in one sweep.
pub const MAX_CONCURRENT_CHECKS: usize = 256;
/// Upper bound for readiness-probe attempts.
pub const MAX_WAIT_ATTEMPTS: u32 = 600;
/// Upper bound for a single in-container command timeout.
pub const MAX_COMMAND_TIMEOUT_SECS: u64 = 1_800;

/// Unified Pressforge configuration.
///
/// Mirrors the top-level structure of `pressforge.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PressforgeConfig {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,
    /// Docker daemon settings
    #[serde(default)]
    pub docker: DockerConfig,
    /// Provisioning pipeline settings
    #[serde(default)]
    pub provision: ProvisionConfig,
    /// Health monitoring settings
    #[serde(default)]
    pub health: HealthConfig,
    /// Metrics exporter settings
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl PressforgeConfig {
    /// Loads config from a TOML file and applies env overrides.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PressforgeError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads config from a TOML file (no env overrides).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, PressforgeError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PressforgeError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                PressforgeError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses config from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, PressforgeError> {
        toml::from_str(toml_str).map_err(|e| {
            PressforgeError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// Applies environment-variable overrides.
    ///
    /// Naming scheme: `PRESSFORGE_{SECTION}_{FIELD}`,
    /// e.g. `PRESSFORGE_DOCKER_SOCKET_PATH=/run/docker.sock`.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "PRESSFORGE_GENERAL_LOG_LEVEL");
        override_string(
            &mut self.general.log_format,
            "PRESSFORGE_GENERAL_LOG_FORMAT",
        );
        override_string(&mut self.general.pid_file, "PRESSFORGE_GENERAL_PID_FILE");

        // Docker
        override_string(&mut self.docker.socket_path, "PRESSFORGE_DOCKER_SOCKET_PATH");

        // Provision
        override_string(
            &mut self.provision.wordpress_image,
            "PRESSFORGE_PROVISION_WORDPRESS_IMAGE",
        );
        override_string(
            &mut self.provision.db_image,
            "PRESSFORGE_PROVISION_DB_IMAGE",
        );
        override_u32(
            &mut self.provision.db_wait_max_attempts,
            "PRESSFORGE_PROVISION_DB_WAIT_MAX_ATTEMPTS",
        );
        override_u64(
            &mut self.provision.db_wait_backoff_ms,
            "PRESSFORGE_PROVISION_DB_WAIT_BACKOFF_MS",
        );
        override_u64(
            &mut self.provision.startup_grace_secs,
            "PRESSFORGE_PROVISION_STARTUP_GRACE_SECS",
        );
        override_u64(
            &mut self.provision.command_timeout_secs,
            "PRESSFORGE_PROVISION_COMMAND_TIMEOUT_SECS",
        );
        override_string(
            &mut self.provision.admin_user,
            "PRESSFORGE_PROVISION_ADMIN_USER",
        );
        override_string(
            &mut self.provision.admin_email,
            "PRESSFORGE_PROVISION_ADMIN_EMAIL",
        );

        // Health
        override_u64(
            &mut self.health.sweep_interval_secs,
            "PRESSFORGE_HEALTH_SWEEP_INTERVAL_SECS",
        );
        override_u64(
            &mut self.health.probe_timeout_secs,
            "PRESSFORGE_HEALTH_PROBE_TIMEOUT_SECS",
        );
        override_u32(
            &mut self.health.failure_threshold,
            "PRESSFORGE_HEALTH_FAILURE_THRESHOLD",
        );
        override_usize(
            &mut self.health.max_concurrent_checks,
            "PRESSFORGE_HEALTH_MAX_CONCURRENT_CHECKS",
        );
        override_u64(
            &mut self.health.on_demand_min_interval_secs,
            "PRESSFORGE_HEALTH_ON_DEMAND_MIN_INTERVAL_SECS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "PRESSFORGE_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "PRESSFORGE_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "PRESSFORGE_METRICS_PORT");
    }

    /// Validates configuration values.
    pub fn validate(&self) -> Result<(), PressforgeError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.provision.db_wait_max_attempts == 0
            || self.provision.db_wait_max_attempts > MAX_WAIT_ATTEMPTS
        {
            return Err(ConfigError::InvalidValue {
                field: "provision.db_wait_max_attempts".to_owned(),
                reason: format!("must be between 1 and {MAX_WAIT_ATTEMPTS}"),
            }
            .into());
        }

        if self.provision.command_timeout_secs == 0
            || self.provision.command_timeout_secs > MAX_COMMAND_TIMEOUT_SECS
        {
            return Err(ConfigError::InvalidValue {
                field: "provision.command_timeout_secs".to_owned(),
                reason: format!("must be between 1 and {MAX_COMMAND_TIMEOUT_SECS}"),
            }
            .into());
        }

        if self.health.sweep_interval_secs == 0
            || self.health.sweep_interval_secs > MAX_SWEEP_INTERVAL_SECS
        {
            return Err(ConfigError::InvalidValue {
                field: "health.sweep_interval_secs".to_owned(),
                reason: format!("must be between 1 and {MAX_SWEEP_INTERVAL_SECS}"),
            }
            .into());
        }

        if self.health.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health.failure_threshold".to_owned(),
                reason: "must be at least 1".to_owned(),
            }
            .into());
        }

        if self.health.max_concurrent_checks == 0
            || self.health.max_concurrent_checks > MAX_CONCURRENT_CHECKS
        {
            return Err(ConfigError::InvalidValue {
                field: "health.max_concurrent_checks".to_owned(),
                reason: format!("must be between 1 and {MAX_CONCURRENT_CHECKS}"),
            }
            .into());
        }

        Ok(())
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log format (json, pretty)
    pub log_format: String,
    /// PID file path
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: "/var/run/pressforge.pid".to_owned(),
        }
    }
}

/// Docker daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Docker socket path
    pub socket_path: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket_path: "/var/run/docker.sock".to_owned(),
        }
    }
}

/// Provisioning pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// WordPress application image
    pub wordpress_image: String,
    /// Database image
    pub db_image: String,
    /// Database readiness probe attempt budget
    pub db_wait_max_attempts: u32,
    /// Base backoff between readiness probes (ms), grows linearly
    pub db_wait_backoff_ms: u64,
    /// Grace period after container start before install begins (secs)
    pub startup_grace_secs: u64,
    /// Per-command execution timeout inside a container (secs)
    pub command_timeout_secs: u64,
    /// Admin account user name for runtime install
    pub admin_user: String,
    /// Admin account email for runtime install
    pub admin_email: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            wordpress_image: "wordpress:latest".to_owned(),
            db_image: "mysql:8.0".to_owned(),
            db_wait_max_attempts: 30,
            db_wait_backoff_ms: 1_000,
            startup_grace_secs: 10,
            command_timeout_secs: 300,
            admin_user: "admin".to_owned(),
            admin_email: "admin@example.com".to_owned(),
        }
    }
}

/// Health monitoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between periodic sweeps (secs)
    pub sweep_interval_secs: u64,
    /// Per-site probe timeout (secs)
    pub probe_timeout_secs: u64,
    /// Consecutive failures before a site is persisted as down
    pub failure_threshold: u32,
    /// Bounded concurrency of one sweep
    pub max_concurrent_checks: usize,
    /// On-demand checks within this window return the cached state (secs)
    pub on_demand_min_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
            probe_timeout_secs: 10,
            failure_threshold: 3,
            max_concurrent_checks: 8,
            on_demand_min_interval_secs: 60,
        }
    }
}

/// Metrics exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether the Prometheus endpoint is served
    pub enabled: bool,
    /// Bind address
    pub listen_addr: String,
    /// Bind port
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9400,
        }
    }
}

// --- Env override helpers ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
