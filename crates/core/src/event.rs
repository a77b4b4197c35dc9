//! Event system for inter-module messaging.
//!
//! Modules communicate over `tokio::mpsc` channels carrying typed events.
//! [`EventMetadata`] is the tracing envelope every event carries, and the
//! [`Event`] trait is the interface every event type implements. Event
//! sends are fire-and-forget: a full or closed channel is logged, never
//! propagated as an error into the emitting path.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::types::HealthStatus;

// --- Module name constants ---

/// Provisioning pipeline module name
pub const MODULE_PROVISION: &str = "provision";
/// Content applier module name
pub const MODULE_CONTENT: &str = "content";
/// Health monitor module name
pub const MODULE_HEALTH: &str = "health";

// --- Event type constants ---

/// Provisioning lifecycle event type
pub const EVENT_TYPE_PROVISION: &str = "provision";
/// Health alert event type
pub const EVENT_TYPE_HEALTH_ALERT: &str = "health_alert";

/// Metadata carried by every event.
///
/// Records when the event happened, which module produced it, and the
/// trace ID linking events that belong to the same flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Event creation time
    pub timestamp: SystemTime,
    /// Producing module (e.g. "provision", "health")
    pub source_module: String,
    /// Trace ID linking events in the same flow
    pub trace_id: String,
}

impl EventMetadata {
    /// Creates metadata reusing an existing trace ID.
    pub fn new(source_module: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: trace_id.into(),
        }
    }

    /// Creates metadata starting a new trace (fresh UUID v4).
    pub fn with_new_trace(source_module: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl fmt::Display for EventMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] source={} trace={}",
            unix_timestamp_str(self.timestamp),
            self.source_module,
            self.trace_id,
        )
    }
}

/// Base trait every event implements.
///
/// The `Send + Sync + 'static` bound makes every event safe to move
/// through a `tokio::mpsc` channel.
pub trait Event: Send + Sync + 'static {
    /// Unique event ID (UUID v4)
    fn event_id(&self) -> &str;

    /// Event metadata (timestamp, source_module, trace_id)
    fn metadata(&self) -> &EventMetadata;

    /// Event type name, used for logging and routing
    fn event_type(&self) -> &str;
}

/// Provisioning step kinds reported through [`ProvisionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStep {
    PortAllocated,
    NetworkReady,
    DatabaseReady,
    ContainerStarted,
    Installed,
    ThemeApplied,
    ContentApplied,
    Failed,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PortAllocated => "port_allocated",
            Self::NetworkReady => "network_ready",
            Self::DatabaseReady => "database_ready",
            Self::ContainerStarted => "container_started",
            Self::Installed => "installed",
            Self::ThemeApplied => "theme_applied",
            Self::ContentApplied => "content_applied",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Lifecycle event emitted as a site moves through provisioning.
#[derive(Debug, Clone)]
pub struct ProvisionEvent {
    /// Unique event ID
    pub id: String,
    /// Event metadata
    pub metadata: EventMetadata,
    /// Site this event concerns
    pub site_slug: String,
    /// Step the pipeline just completed (or failed)
    pub step: ProvisionStep,
    /// Optional step detail (error text, theme slug, ...)
    pub detail: Option<String>,
}

impl ProvisionEvent {
    /// Creates an event starting a new trace.
    pub fn new(site_slug: impl Into<String>, step: ProvisionStep) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::with_new_trace(MODULE_PROVISION),
            site_slug: site_slug.into(),
            step,
            detail: None,
        }
    }

    /// Creates an event bound to an existing trace.
    pub fn with_trace(
        site_slug: impl Into<String>,
        step: ProvisionStep,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::new(MODULE_PROVISION, trace_id),
            site_slug: site_slug.into(),
            step,
            detail: None,
        }
    }

    /// Attaches a detail string.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl Event for ProvisionEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> &str {
        EVENT_TYPE_PROVISION
    }
}

impl fmt::Display for ProvisionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProvisionEvent[{}] site={} step={}",
            &self.id[..8.min(self.id.len())],
            self.site_slug,
            self.step,
        )
    }
}

/// Alert emitted when a site's persisted health state changes to a
/// notable value (confirmed down, or recovered).
#[derive(Debug, Clone)]
pub struct HealthAlertEvent {
    /// Unique event ID
    pub id: String,
    /// Event metadata
    pub metadata: EventMetadata,
    /// Site this alert concerns
    pub site_slug: String,
    /// Human-readable site title
    pub site_name: String,
    /// Owner identifier for downstream notification routing
    pub owner_id: String,
    /// New persisted health status
    pub status: HealthStatus,
    /// Consecutive failed checks at emission time
    pub failed_checks: u32,
}

impl HealthAlertEvent {
    /// Creates an alert starting a new trace.
    pub fn new(
        site_slug: impl Into<String>,
        site_name: impl Into<String>,
        owner_id: impl Into<String>,
        status: HealthStatus,
        failed_checks: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::with_new_trace(MODULE_HEALTH),
            site_slug: site_slug.into(),
            site_name: site_name.into(),
            owner_id: owner_id.into(),
            status,
            failed_checks,
        }
    }
}

impl Event for HealthAlertEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> &str {
        EVENT_TYPE_HEALTH_ALERT
    }
}

impl fmt::Display for HealthAlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HealthAlertEvent[{}] site={} status={} failed_checks={}",
            &self.id[..8.min(self.id.len())],
            self.site_slug,
            self.status,
            self.failed_checks,
        )
    }
}

/// Renders a SystemTime as unix seconds for display.
fn unix_timestamp_str(time: SystemTime) -> String {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(duration) => format!("{}", duration.as_secs()),
        Err(_) => "unknown".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_metadata_new_preserves_trace_id() {
        let meta = EventMetadata::new("test-module", "trace-abc-123");
        assert_eq!(meta.source_module, "test-module");
        assert_eq!(meta.trace_id, "trace-abc-123");
        assert!(meta.timestamp <= SystemTime::now());
    }

    #[test]
    fn event_metadata_with_new_trace_generates_uuid() {
        let meta = EventMetadata::with_new_trace("test-module");
        assert!(!meta.trace_id.is_empty());
        // UUID v4 shape: 8-4-4-4-12
        assert_eq!(meta.trace_id.len(), 36);
        assert_eq!(meta.trace_id.chars().filter(|c| *c == '-').count(), 4);
    }

    #[test]
    fn event_metadata_display() {
        let meta = EventMetadata::new("provision", "trace-xyz");
        let display = meta.to_string();
        assert!(display.contains("provision"));
        assert!(display.contains("trace-xyz"));
    }

    #[test]
    fn provision_event_implements_event_trait() {
        let event = ProvisionEvent::new("acme-cafe", ProvisionStep::ContainerStarted);
        assert_eq!(event.event_type(), "provision");
        assert!(!event.event_id().is_empty());
        assert_eq!(event.metadata().source_module, "provision");
    }

    #[test]
    fn provision_event_with_trace_preserves_trace_id() {
        let event =
            ProvisionEvent::with_trace("acme-cafe", ProvisionStep::Installed, "my-trace-id");
        assert_eq!(event.metadata().trace_id, "my-trace-id");
    }

    #[test]
    fn provision_event_with_detail() {
        let event = ProvisionEvent::new("acme-cafe", ProvisionStep::ThemeApplied)
            .with_detail("astra");
        assert_eq!(event.detail.as_deref(), Some("astra"));
    }

    #[test]
    fn provision_event_display() {
        let event = ProvisionEvent::new("acme-cafe", ProvisionStep::DatabaseReady);
        let display = event.to_string();
        assert!(display.contains("acme-cafe"));
        assert!(display.contains("database_ready"));
    }

    #[test]
    fn health_alert_event_implements_event_trait() {
        let event =
            HealthAlertEvent::new("acme-cafe", "Acme Cafe", "owner-1", HealthStatus::Down, 3);
        assert_eq!(event.event_type(), "health_alert");
        assert_eq!(event.metadata().source_module, "health");
        assert_eq!(event.failed_checks, 3);
    }

    #[test]
    fn health_alert_event_display() {
        let event =
            HealthAlertEvent::new("acme-cafe", "Acme Cafe", "owner-1", HealthStatus::Down, 3);
        let display = event.to_string();
        assert!(display.contains("acme-cafe"));
        assert!(display.contains("down"));
    }

    #[test]
    fn events_are_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<ProvisionEvent>();
        assert_send_sync::<HealthAlertEvent>();
    }
}
