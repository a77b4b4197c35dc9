//! WP-CLI bootstrap automation.
//!
//! Drives the runtime's CLI inside a freshly started container: database
//! config, non-interactive core install, locale pack, the health-probe
//! extension, and preview-embedding header relaxation. Every step is
//! idempotent against an already-configured instance.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use pressforge_core::command::{CommandOutput, CommandRunner};
use pressforge_core::error::ProvisionError;
use pressforge_content::applier::wp_args;

use crate::database::DbCredentials;

/// Query parameter the health-probe extension answers on.
pub const HEALTH_QUERY_PARAM: &str = "pressforge_health";

/// Path of the health-probe extension inside the instance.
const HEALTH_PLUGIN_PATH: &str = "/var/www/html/wp-content/mu-plugins/pressforge-health.php";

/// The health-probe extension. Its JSON payload is the sole data source
/// for the health monitor; field names are load-bearing.
const HEALTH_PLUGIN_PHP: &str = r#"<?php
/**
 * Plugin Name: Pressforge Health Endpoint
 * Description: Exposes instance health as JSON.
 */
add_action('init', function () {
    if (!isset($_GET['pressforge_health'])) {
        return;
    }
    global $wpdb;
    $start = microtime(true);
    $status = 'healthy';
    $db_version = $wpdb->get_var('SELECT VERSION()');
    if ($db_version === null) {
        $status = 'warning';
        $db_version = null;
    }
    $load = function_exists('sys_getloadavg') ? sys_getloadavg() : null;
    $updates = function_exists('wp_get_update_data') ? wp_get_update_data() : null;
    $disk_used = null;
    if (function_exists('disk_total_space') && function_exists('disk_free_space')) {
        $total = @disk_total_space('/');
        $free = @disk_free_space('/');
        if ($total !== false && $free !== false) {
            $disk_used = round(($total - $free) / 1048576);
        }
    }
    header('Content-Type: application/json');
    echo json_encode([
        'status' => $status,
        'response_time' => round((microtime(true) - $start) * 1000, 2),
        'wp_version' => get_bloginfo('version'),
        'php_version' => PHP_VERSION,
        'db_version' => $db_version,
        'server' => [
            'cpu_load' => $load ? $load[0] : null,
            'memory_current' => round(memory_get_usage() / 1048576, 1),
            'memory_limit' => (float) ini_get('memory_limit') ?: null,
            'disk_used' => $disk_used,
        ],
        'plugins' => [
            'updates_available' => is_array($updates) ? ($updates['counts']['plugins'] ?? null) : null,
        ],
    ]);
    exit;
});
"#;

/// Automates runtime installation inside site containers.
pub struct BootstrapAutomator<R> {
    runner: Arc<R>,
    command_timeout: Duration,
    admin_user: String,
    admin_email: String,
}

impl<R: CommandRunner> BootstrapAutomator<R> {
    pub fn new(
        runner: Arc<R>,
        command_timeout: Duration,
        admin_user: impl Into<String>,
        admin_email: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            command_timeout,
            admin_user: admin_user.into(),
            admin_email: admin_email.into(),
        }
    }

    /// Installs and configures the runtime.
    ///
    /// Re-running against an already-installed instance skips the
    /// install step; config and locale writes are safe to repeat.
    #[allow(clippy::too_many_arguments)]
    pub async fn configure(
        &self,
        container: &str,
        db_ref: &str,
        creds: &DbCredentials,
        site_name: &str,
        locale: &str,
        port: u16,
        admin_password: &str,
    ) -> Result<(), ProvisionError> {
        let config = wp_args(&[
            "config",
            "create",
            &format!("--dbname={}", creds.database),
            &format!("--dbuser={}", creds.user),
            &format!("--dbpass={}", creds.password),
            &format!("--dbhost={db_ref}"),
            "--skip-check",
            "--force",
        ]);
        self.run_ok(container, &config).await?;

        if self.is_installed(container).await? {
            debug!(container, "runtime already installed, skipping install");
        } else {
            let install = wp_args(&[
                "core",
                "install",
                &format!("--url=http://localhost:{port}"),
                &format!("--title={site_name}"),
                &format!("--admin_user={}", self.admin_user),
                &format!("--admin_password={admin_password}"),
                &format!("--admin_email={}", self.admin_email),
                "--skip-email",
            ]);
            self.run_ok(container, &install).await?;
            info!(container, site_name, "runtime installed");
        }

        if locale != "en_US" {
            let language = wp_args(&["language", "core", "install", locale, "--activate"]);
            self.run_ok(container, &language).await?;
            debug!(container, locale, "locale pack activated");
        }

        Ok(())
    }

    /// Probes whether the runtime install has completed.
    pub async fn is_installed(&self, container: &str) -> Result<bool, ProvisionError> {
        let probe = wp_args(&["core", "is-installed"]);
        let out = self
            .runner
            .run(container, &probe, self.command_timeout)
            .await?;
        Ok(out.success())
    }

    /// Materializes and activates the health-probe extension.
    ///
    /// Dropped into mu-plugins so it activates without any plugin
    /// management step. Its absence later manifests as a probe timeout,
    /// which the monitor treats as down.
    pub async fn install_health_endpoint(&self, container: &str) -> Result<(), ProvisionError> {
        let script = format!(
            "mkdir -p /var/www/html/wp-content/mu-plugins && cat > {HEALTH_PLUGIN_PATH} <<'PRESSFORGE_EOF'\n{HEALTH_PLUGIN_PHP}\nPRESSFORGE_EOF"
        );
        let args = vec!["bash".to_owned(), "-c".to_owned(), script];
        self.run_ok(container, &args).await?;
        info!(container, "health endpoint installed");
        Ok(())
    }

    /// Relaxes iframe/CORS headers so the instance can be embedded in
    /// the preview frame.
    pub async fn relax_preview_headers(&self, container: &str) -> Result<(), ProvisionError> {
        let script = concat!(
            "printf '\\n<IfModule mod_headers.c>\\n",
            "Header always unset X-Frame-Options\\n",
            "Header set Access-Control-Allow-Origin \"*\"\\n",
            "</IfModule>\\n' >> /var/www/html/.htaccess"
        );
        let args = vec!["bash".to_owned(), "-c".to_owned(), script.to_owned()];
        self.run_ok(container, &args).await?;
        debug!(container, "preview headers relaxed");
        Ok(())
    }

    /// Rotates the admin account password, used by the reuse path.
    pub async fn update_admin_credentials(
        &self,
        container: &str,
        admin_password: &str,
    ) -> Result<(), ProvisionError> {
        let args = wp_args(&[
            "user",
            "update",
            &self.admin_user,
            &format!("--user_pass={admin_password}"),
            "--skip-email",
        ]);
        self.run_ok(container, &args).await?;
        debug!(container, "admin credentials updated");
        Ok(())
    }

    /// Replays sandbox-saved editor modifications as stored options.
    pub async fn replay_sandbox_options(
        &self,
        container: &str,
        options: &[(String, String)],
    ) -> Result<(), ProvisionError> {
        for (key, value) in options {
            let args = wp_args(&["option", "update", key, value]);
            self.run_ok(container, &args).await?;
        }
        if !options.is_empty() {
            debug!(container, count = options.len(), "sandbox options replayed");
        }
        Ok(())
    }

    /// Deletes transient preview-only homepage artifacts.
    pub async fn clear_preview_artifacts(&self, container: &str) -> Result<(), ProvisionError> {
        for key in ["pressforge_preview_draft", "pressforge_preview_banner"] {
            let args = wp_args(&["option", "delete", key]);
            // Absent options exit non-zero; that is the common case.
            let _ = self.runner.run(container, &args, self.command_timeout).await?;
        }
        Ok(())
    }

    async fn run_ok(&self, container: &str, args: &[String]) -> Result<CommandOutput, ProvisionError> {
        let out = self.runner.run(container, args, self.command_timeout).await?;
        if out.success() {
            Ok(out)
        } else {
            Err(ProvisionError::CommandFailed {
                container: container.to_owned(),
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_owned(),
            })
        }
    }
}
