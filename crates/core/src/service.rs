//! Service lifecycle trait implemented by every long-running module.

use std::fmt;
use std::future::Future;

use crate::error::PressforgeError;

/// Health status reported by a service's own `health_check`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceHealth {
    /// Operating normally
    Healthy,
    /// Operating with reduced capability
    Degraded(String),
    /// Not operating
    Unhealthy(String),
}

impl fmt::Display for ServiceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// Lifecycle interface for the daemon's long-running modules.
///
/// # Lifecycle
/// ```text
/// Created -> start() -> Running -> stop() -> Stopped
/// ```
///
/// `start` must be idempotent-safe to call once; `stop` performs a
/// graceful shutdown and may be called from a signal handler path.
pub trait Service: Send + Sync {
    /// Service name, used in logs and health reports.
    fn name(&self) -> &str;

    /// Starts the service's background work.
    fn start(&mut self) -> impl Future<Output = Result<(), PressforgeError>> + Send;

    /// Stops the service gracefully.
    fn stop(&mut self) -> impl Future<Output = Result<(), PressforgeError>> + Send;

    /// Reports the service's own health.
    fn health_check(&self) -> impl Future<Output = ServiceHealth> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_health_display() {
        assert_eq!(ServiceHealth::Healthy.to_string(), "healthy");
        assert_eq!(
            ServiceHealth::Degraded("alert channel closed".to_owned()).to_string(),
            "degraded: alert channel closed"
        );
        assert_eq!(
            ServiceHealth::Unhealthy("not started".to_owned()).to_string(),
            "unhealthy: not started"
        );
    }
}
