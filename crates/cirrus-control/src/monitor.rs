//! Polling of long-running operations.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::control_plane::ControlPlane;
use crate::error::{ControlError, ControlResult};
use crate::types::Operation;

/// Polls an operation at a fixed interval until it reaches `DONE`.
///
/// ```text
/// PENDING ──poll──▶ PENDING ──poll──▶ DONE_OK
///                                └──▶ DONE_ERROR
/// ```
///
/// The wait, including each in-flight poll, is bounded by a timeout and can
/// be cancelled; both leave the operation's real outcome unknown.
#[derive(Clone)]
pub struct DeploymentMonitor {
    control_plane: Arc<dyn ControlPlane>,
    project: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl DeploymentMonitor {
    /// Create a monitor using the configured interval and timeout.
    #[must_use]
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        project: impl Into<String>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            control_plane,
            project: project.into(),
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
        }
    }

    /// Wait for `operation` to finish.
    ///
    /// Returns the terminal operation when it carries no error payload.
    pub async fn monitor(
        &self,
        operation: &str,
        cancel: &CancellationToken,
    ) -> ControlResult<Operation> {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut polls: u32 = 0;

        loop {
            let poll = timeout_at(
                deadline,
                self.control_plane.get_operation(&self.project, operation),
            );
            let current = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled(operation)),
                result = poll => match result {
                    Ok(current) => current?,
                    Err(_) => return Err(timed_out(operation, started)),
                },
            };
            polls += 1;

            if current.is_done() {
                return finish(current, started.elapsed(), polls);
            }

            debug!(
                operation = %operation,
                status = ?current.status,
                polls,
                "operation still running"
            );

            let now = Instant::now();
            if now >= deadline {
                return Err(timed_out(operation, started));
            }

            let wait = self.poll_interval.min(deadline - now);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(cancelled(operation)),
                () = sleep(wait) => {}
            }
        }
    }
}

fn timed_out(operation: &str, started: Instant) -> ControlError {
    let elapsed = started.elapsed();
    warn!(operation = %operation, ?elapsed, "operation timed out");
    ControlError::Timeout {
        operation: operation.to_owned(),
        elapsed,
    }
}

fn cancelled(operation: &str) -> ControlError {
    info!(operation = %operation, "operation monitoring cancelled");
    ControlError::Cancelled {
        operation: operation.to_owned(),
    }
}

fn finish(operation: Operation, elapsed: Duration, polls: u32) -> ControlResult<Operation> {
    if let Some(error) = &operation.error {
        warn!(
            operation = %operation.name,
            failures = error.errors.len(),
            "operation failed"
        );
        return Err(ControlError::OperationFailed {
            operation: operation.name.clone(),
            failures: error.errors.clone(),
        });
    }

    info!(operation = %operation.name, ?elapsed, polls, "operation done");
    Ok(operation)
}
