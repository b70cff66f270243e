//! Executes one check with a bounded deadline and retry policy

use super::model::{CheckResult, CheckStatus};
use super::spec::{CheckSpec, Probe, ProbeContext, ProbeOutput};
use crate::error::HealthError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

enum Attempt {
    Completed(anyhow::Result<ProbeOutput>),
    Panicked(String),
    TimedOut,
    Cancelled,
}

/// Aborts the wrapped task when dropped, so an abandoned async probe stops
/// at its next await point.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs a single [`CheckSpec`] and produces its [`CheckResult`].
///
/// Each attempt is bounded by `spec.timeout`. Async probes run on their own
/// task and are aborted once abandoned. Sync probes run on the blocking pool;
/// a sync probe that overruns its deadline cannot be stopped and keeps its
/// thread until it returns, while the runner reports a timeout immediately.
pub struct ProbeRunner {
    spec: Arc<CheckSpec>,
    cancel: CancellationToken,
}

impl ProbeRunner {
    pub fn new(spec: Arc<CheckSpec>) -> Self {
        Self {
            spec,
            cancel: CancellationToken::new(),
        }
    }

    /// Ties the run to an outer token, e.g. the collector's global deadline.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(self) -> CheckResult {
        let start = Instant::now();
        let spec = &self.spec;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = self.attempt(attempt).await;

            let error = match outcome {
                Attempt::Completed(Ok(output)) => {
                    return self.evaluate(output, attempt, start.elapsed());
                }
                Attempt::TimedOut => {
                    let err = HealthError::ProbeTimeout(spec.timeout);
                    warn!("Check '{}' attempt {}: {}", spec.name, attempt, err);
                    return self.finish(CheckStatus::Timeout, err.to_string(), attempt, start.elapsed());
                }
                Attempt::Cancelled => {
                    return self.finish(
                        CheckStatus::Timeout,
                        "Check cancelled before completion".to_string(),
                        attempt,
                        start.elapsed(),
                    );
                }
                Attempt::Completed(Err(e)) => HealthError::Probe(format!("{:#}", e)),
                Attempt::Panicked(msg) => HealthError::Probe(format!("probe panicked: {}", msg)),
            };

            if attempt >= spec.retry.max_attempts {
                warn!(
                    "Check '{}' failed after {} attempt(s): {}",
                    spec.name, attempt, error
                );
                return self.finish(CheckStatus::Error, error.to_string(), attempt, start.elapsed());
            }

            let backoff = spec.retry.backoff_after(attempt);
            debug!(
                "Check '{}' attempt {} failed ({}), retrying in {:?}",
                spec.name, attempt, error, backoff
            );

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.cancel.cancelled() => {
                    return self.finish(CheckStatus::Error, error.to_string(), attempt, start.elapsed());
                }
            }
        }
    }

    async fn attempt(&self, attempt: u32) -> Attempt {
        let token = self.cancel.child_token();
        let ctx = ProbeContext {
            name: self.spec.name.clone(),
            attempt,
            cancel: token.clone(),
        };
        let timeout = self.spec.timeout;

        let joined = match &self.spec.probe {
            Probe::Sync(f) => {
                let f = Arc::clone(f);
                let handle = tokio::task::spawn_blocking(move || f(&ctx));
                tokio::select! {
                    joined = tokio::time::timeout(timeout, handle) => joined,
                    _ = self.cancel.cancelled() => return Attempt::Cancelled,
                }
            }
            Probe::Async(probe) => {
                let probe = Arc::clone(probe);
                let handle = tokio::spawn(async move { probe.probe(&ctx).await });
                let mut guard = AbortOnDrop(handle);
                tokio::select! {
                    joined = tokio::time::timeout(timeout, &mut guard.0) => joined,
                    _ = self.cancel.cancelled() => return Attempt::Cancelled,
                }
            }
        };

        match joined {
            Ok(Ok(result)) => Attempt::Completed(result),
            Ok(Err(join_err)) => {
                let msg = panic_message(join_err);
                Attempt::Panicked(msg)
            }
            Err(_) => {
                token.cancel();
                Attempt::TimedOut
            }
        }
    }

    fn evaluate(&self, output: ProbeOutput, attempts: u32, elapsed: Duration) -> CheckResult {
        let spec = &self.spec;
        let numeric = output.value.as_ref().and_then(serde_json::Value::as_f64);

        let (passed, message) = match (&spec.threshold, numeric) {
            (Some(threshold), Some(value)) if !threshold.passes(value) => (
                false,
                format!("{} ({} violates threshold '{}')", output.message, value, threshold),
            ),
            (Some(threshold), None) => {
                let result = self.finish(
                    CheckStatus::Error,
                    format!("Threshold '{}' requires a numeric probe value", threshold),
                    attempts,
                    elapsed,
                );
                return match output.value {
                    Some(value) => result.with_value(value),
                    None => result,
                };
            }
            _ => (output.healthy, output.message),
        };

        let status = if passed {
            CheckStatus::Ok
        } else if spec.critical {
            CheckStatus::Critical
        } else {
            CheckStatus::Warning
        };

        let result = self.finish(status, message, attempts, elapsed);
        match output.value {
            Some(value) => result.with_value(value),
            None => result,
        }
    }

    fn finish(&self, status: CheckStatus, message: String, attempts: u32, elapsed: Duration) -> CheckResult {
        CheckResult::new(self.spec.name.clone(), status, message)
            .with_duration(elapsed)
            .with_attempts(attempts)
            .with_critical(self.spec.critical)
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if err.is_cancelled() {
        return "task cancelled".to_string();
    }

    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
