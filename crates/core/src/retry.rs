//! Readiness polling with linear backoff.
//!
//! Provisioning repeatedly needs to wait for some resource (a database
//! accepting connections, a CLI binary responding) to become usable.
//! [`wait_until_ready`] polls a caller-supplied probe until it succeeds
//! or the attempt budget is spent, sleeping `backoff * attempt` between
//! tries so early retries are cheap and later ones give the resource
//! room to come up.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::ProvisionError;

/// Polls `probe` until it returns `Ok(true)`.
///
/// A probe returning `Ok(false)` or `Err(_)` counts as one failed
/// attempt; probe errors are logged and retried, never propagated.
/// After `max_attempts` failures this returns
/// [`ProvisionError::ReadinessTimeout`] naming `resource`.
pub async fn wait_until_ready<F, Fut, E>(
    resource: &str,
    max_attempts: u32,
    backoff: Duration,
    mut probe: F,
) -> Result<(), ProvisionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::fmt::Display,
{
    for attempt in 1..=max_attempts {
        match probe().await {
            Ok(true) => {
                debug!(resource, attempt, "resource ready");
                return Ok(());
            }
            Ok(false) => {
                debug!(resource, attempt, "resource not ready yet");
            }
            Err(e) => {
                debug!(resource, attempt, error = %e, "readiness probe failed");
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(backoff * attempt).await;
        }
    }

    Err(ProvisionError::ReadinessTimeout {
        resource: resource.to_owned(),
        attempts: max_attempts,
    })
}
