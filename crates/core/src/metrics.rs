//! Metric name constants and description registration.
//!
//! Every Prometheus metric name lives here so the modules and the
//! exporter agree on spelling. Modules record through
//! `metrics::counter!()`, `metrics::gauge!()` and
//! `metrics::histogram!()` using these constants.
//!
//! # Naming convention
//!
//! - Prefix: `pressforge_`
//! - Module: `provision_`, `content_`, `health_`, `daemon_`
//! - Suffix: `_total` (counter), `_seconds` (histogram/latency),
//!   none (gauge)
//!
//! # Example
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(pressforge_core::metrics::PROVISION_SITES_CREATED_TOTAL).increment(1);
//! ```

// --- Label key constants ---

/// Result label key (success, failure)
pub const LABEL_RESULT: &str = "result";

/// Health status label key (healthy, warning, down)
pub const LABEL_STATUS: &str = "status";

/// Site label key
pub const LABEL_SITE: &str = "site";

// --- Provision metrics ---

/// Provision: sites created (counter, label: result)
pub const PROVISION_SITES_CREATED_TOTAL: &str = "pressforge_provision_sites_created_total";

/// Provision: end-to-end site creation latency (histogram, seconds)
pub const PROVISION_CREATE_DURATION_SECONDS: &str = "pressforge_provision_create_duration_seconds";

/// Provision: host ports currently bound (gauge)
pub const PROVISION_PORTS_BOUND: &str = "pressforge_provision_ports_bound";

/// Provision: toolchain installs that needed the replacement retry (counter)
pub const PROVISION_TOOLCHAIN_RETRIES_TOTAL: &str = "pressforge_provision_toolchain_retries_total";

// --- Content metrics ---

/// Content: pages created (counter, label: result)
pub const CONTENT_PAGES_CREATED_TOTAL: &str = "pressforge_content_pages_created_total";

/// Content: structure applications (counter, label: result)
pub const CONTENT_STRUCTURES_APPLIED_TOTAL: &str = "pressforge_content_structures_applied_total";

// --- Health metrics ---

/// Health: probes executed (counter, label: status)
pub const HEALTH_CHECKS_TOTAL: &str = "pressforge_health_checks_total";

/// Health: probe round-trip time (histogram, seconds)
pub const HEALTH_PROBE_DURATION_SECONDS: &str = "pressforge_health_probe_duration_seconds";

/// Health: sites persisted as down (gauge)
pub const HEALTH_SITES_DOWN: &str = "pressforge_health_sites_down";

/// Health: alerts emitted (counter)
pub const HEALTH_ALERTS_SENT_TOTAL: &str = "pressforge_health_alerts_sent_total";

// --- Daemon metrics ---

/// Daemon: uptime (gauge, seconds)
pub const DAEMON_UPTIME_SECONDS: &str = "pressforge_daemon_uptime_seconds";

/// Daemon: active sites under management (gauge)
pub const DAEMON_ACTIVE_SITES: &str = "pressforge_daemon_active_sites";

/// Daemon: build info (gauge, always 1, labels: version)
pub const DAEMON_BUILD_INFO: &str = "pressforge_daemon_build_info";

// --- Histogram bucket definitions ---

/// Site creation latency buckets (seconds).
///
/// 1s to 10min; creation includes image pulls and readiness waits.
pub const CREATE_DURATION_BUCKETS: [f64; 9] =
    [1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 180.0, 300.0, 600.0];

/// Health probe latency buckets (seconds).
pub const PROBE_DURATION_BUCKETS: [f64; 8] = [0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Registers descriptions for every metric.
///
/// Sets the Prometheus HELP text via `describe_counter!()` and friends.
/// Call once after the global recorder is installed, normally at daemon
/// startup.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Provision
    describe_counter!(
        PROVISION_SITES_CREATED_TOTAL,
        "Total site provisioning attempts by result"
    );
    describe_histogram!(
        PROVISION_CREATE_DURATION_SECONDS,
        "End-to-end site creation latency in seconds"
    );
    describe_gauge!(PROVISION_PORTS_BOUND, "Host ports currently bound to sites");
    describe_counter!(
        PROVISION_TOOLCHAIN_RETRIES_TOTAL,
        "Toolchain installs that required a container replacement retry"
    );

    // Content
    describe_counter!(
        CONTENT_PAGES_CREATED_TOTAL,
        "Total page creation attempts by result"
    );
    describe_counter!(
        CONTENT_STRUCTURES_APPLIED_TOTAL,
        "Total content structure applications by result"
    );

    // Health
    describe_counter!(HEALTH_CHECKS_TOTAL, "Total health probes by derived status");
    describe_histogram!(
        HEALTH_PROBE_DURATION_SECONDS,
        "Health probe round-trip time in seconds"
    );
    describe_gauge!(HEALTH_SITES_DOWN, "Sites currently persisted as down");
    describe_counter!(
        HEALTH_ALERTS_SENT_TOTAL,
        "Total health alert events sent to downstream consumers"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Pressforge daemon uptime in seconds");
    describe_gauge!(DAEMON_ACTIVE_SITES, "Active sites under management");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        PROVISION_SITES_CREATED_TOTAL,
        PROVISION_CREATE_DURATION_SECONDS,
        PROVISION_PORTS_BOUND,
        PROVISION_TOOLCHAIN_RETRIES_TOTAL,
        CONTENT_PAGES_CREATED_TOTAL,
        CONTENT_STRUCTURES_APPLIED_TOTAL,
        HEALTH_CHECKS_TOTAL,
        HEALTH_PROBE_DURATION_SECONDS,
        HEALTH_SITES_DOWN,
        HEALTH_ALERTS_SENT_TOTAL,
        DAEMON_UPTIME_SECONDS,
        DAEMON_ACTIVE_SITES,
        DAEMON_BUILD_INFO,
    ];

    #[test]
    fn all_metrics_start_with_pressforge_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("pressforge_"),
                "Metric '{}' does not start with 'pressforge_' prefix",
                name
            );
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        // Safe to call without a recorder installed
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_RESULT, LABEL_STATUS, LABEL_SITE] {
            assert_eq!(label.to_lowercase(), label);
        }
    }

    #[test]
    fn bucket_values_are_ascending() {
        for buckets in [&CREATE_DURATION_BUCKETS[..], &PROBE_DURATION_BUCKETS[..]] {
            for i in 1..buckets.len() {
                assert!(buckets[i] > buckets[i - 1]);
            }
        }
    }
}
