//! Waiting for a new environment to become ready.

use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use subenv_core::{EnvironmentId, Error, Result};

use crate::metrics::EngineMetrics;
use crate::platform::{EnvironmentStatus, Platform};
use crate::settings::ReadinessPolicy;

/// Polls the platform until `id` is ready.
///
/// A failed poll is logged and retried on the next tick.
///
/// # Errors
///
/// - `Error::EnvironmentFailed` if the platform reports a terminal failure
/// - `Error::Timeout` once `policy.timeout` elapses
/// - `Error::Cancelled` if `cancel` fires first
pub async fn wait_until_ready(
    platform: &dyn Platform,
    id: &EnvironmentId,
    policy: ReadinessPolicy,
    cancel: &CancellationToken,
) -> Result<()> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let metrics = EngineMetrics::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                metrics.observe_readiness_wait("cancelled", started.elapsed());
                return Err(Error::Cancelled {
                    message: format!("waiting for environment {id}"),
                });
            }
            () = sleep_until(deadline) => {
                metrics.observe_readiness_wait("timeout", started.elapsed());
                return Err(Error::Timeout {
                    environment: id.to_string(),
                    waited: started.elapsed(),
                });
            }
            () = sleep(policy.interval) => {}
        }

        match platform.environment_detail(id).await {
            Ok(detail) => match detail.status() {
                EnvironmentStatus::Ready => {
                    metrics.observe_readiness_wait("ready", started.elapsed());
                    tracing::info!(environment = %id, waited = ?started.elapsed(), "environment ready");
                    return Ok(());
                }
                EnvironmentStatus::Failed(status) => {
                    metrics.observe_readiness_wait("failed", started.elapsed());
                    return Err(Error::EnvironmentFailed {
                        environment: id.to_string(),
                        status,
                    });
                }
                EnvironmentStatus::Pending(status) => {
                    tracing::debug!(environment = %id, status = %status, "environment not ready yet");
                }
            },
            Err(err) => {
                tracing::warn!(environment = %id, error = %err, "readiness poll failed");
            }
        }
    }
}
