//! Concurrent fan-out of probe runs under a global deadline

use super::model::{CheckResult, CheckStatus};
use super::runner::ProbeRunner;
use super::spec::CheckSpec;
use crate::error::HealthError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const DEFAULT_GLOBAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Stand-in deadline for budgets too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Results of one collector pass, one per attempted spec, in the order the
/// specs were given.
#[derive(Debug, Clone)]
pub struct CollectedRun {
    pub results: Vec<CheckResult>,
    pub elapsed: Duration,
    /// Checks cut off by the global deadline.
    pub timed_out: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Collector {
    max_concurrency: Option<usize>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps simultaneously running probes. Queued checks are admitted in the
    /// order they were passed to [`Collector::collect`].
    pub fn with_max_concurrency(mut self, max_concurrency: Option<usize>) -> Self {
        self.max_concurrency = max_concurrency.map(|n| n.max(1));
        self
    }

    pub async fn collect(&self, specs: &[Arc<CheckSpec>], global_timeout: Duration) -> CollectedRun {
        let start = Instant::now();
        let deadline = deadline_after(global_timeout);
        let cancel = CancellationToken::new();
        let limit = self.max_concurrency.unwrap_or(usize::MAX);

        info!("Collecting {} checks (global timeout {:?})", specs.len(), global_timeout);

        let mut queue = specs.iter();
        let mut running: JoinSet<CheckResult> = JoinSet::new();
        let mut finished: HashMap<String, CheckResult> = HashMap::with_capacity(specs.len());

        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            while running.len() < limit {
                match queue.next() {
                    Some(spec) => {
                        let runner = ProbeRunner::new(Arc::clone(spec)).with_cancellation(cancel.child_token());
                        running.spawn(runner.run());
                    }
                    None => break,
                }
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                joined = running.join_next() => match joined {
                    Some(Ok(result)) => {
                        finished.insert(result.name.clone(), result);
                    }
                    Some(Err(e)) => {
                        error!("Probe runner task failed: {}", e);
                    }
                    None => break,
                },
                _ = &mut sleep => break,
            }
        }

        cancel.cancel();
        running.abort_all();

        let elapsed = start.elapsed();
        let mut timed_out = Vec::new();
        let results = specs
            .iter()
            .map(|spec| {
                finished.remove(&spec.name).unwrap_or_else(|| {
                    timed_out.push(spec.name.clone());
                    CheckResult::new(
                        spec.name.clone(),
                        CheckStatus::Timeout,
                        HealthError::GlobalTimeout(global_timeout).to_string(),
                    )
                    .with_duration(elapsed)
                    .with_critical(spec.critical)
                })
            })
            .collect();

        if timed_out.is_empty() {
            info!("Collected {} checks in {:?}", specs.len(), elapsed);
        } else {
            warn!(
                "{}: outstanding checks [{}]",
                HealthError::GlobalTimeout(global_timeout),
                timed_out.join(", ")
            );
        }

        CollectedRun {
            results,
            elapsed,
            timed_out,
        }
    }
}

fn deadline_after(budget: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(budget).unwrap_or_else(|| now + FAR_FUTURE)
}
