//! Rollup of cached check results into a single report

use super::model::{CheckResult, CheckStatus, HealthReport, HealthStatus};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{error, info, warn};

pub const NO_CHECKS_SUMMARY: &str = "no checks executed";

#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    max_age: Option<Duration>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results older than `max_age` count as timed out during rollup.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn rollup(&self, results: Vec<CheckResult>, duration: Duration) -> HealthReport {
        self.rollup_at(results, duration, Utc::now())
    }

    /// Rules, first match wins:
    /// 1. a critical check in critical/error/timeout fails the report hard;
    /// 2. any other non-ok check degrades it;
    /// 3. stale results count as timeouts for both rules;
    /// 4. an empty cache is not healthy.
    pub fn rollup_at(&self, results: Vec<CheckResult>, duration: Duration, now: DateTime<Utc>) -> HealthReport {
        if results.is_empty() {
            return HealthReport {
                ok: false,
                status: HealthStatus::Unknown,
                summary: NO_CHECKS_SUMMARY.to_string(),
                details: BTreeMap::new(),
                duration,
                generated_at: now,
            };
        }

        let mut critical_failures = Vec::new();
        let mut degraded = Vec::new();

        for result in &results {
            let stale = self.is_stale(result, now);
            let status = if stale { CheckStatus::Timeout } else { result.status };
            let label = if stale {
                format!("{} (stale)", result.name)
            } else {
                result.name.clone()
            };

            if result.critical && status.is_hard_failure() {
                critical_failures.push(label);
            } else if !status.is_ok() {
                degraded.push(label);
            }
        }

        critical_failures.sort();
        degraded.sort();

        let (ok, status, summary) = if !critical_failures.is_empty() {
            let mut summary = format!("critical failure: {}", critical_failures.join(", "));
            if !degraded.is_empty() {
                summary.push_str(&format!("; degraded (non-critical): {}", degraded.join(", ")));
            }
            error!("Health rollup: {}", summary);
            (false, HealthStatus::Unhealthy, summary)
        } else if !degraded.is_empty() {
            let summary = format!("degraded (non-critical): {}", degraded.join(", "));
            warn!("Health rollup: {}", summary);
            (false, HealthStatus::Degraded, summary)
        } else {
            let summary = format!("all {} checks passing", results.len());
            info!("Health rollup: {}", summary);
            (true, HealthStatus::Healthy, summary)
        };

        let details = results
            .into_iter()
            .map(|result| (result.name.clone(), result))
            .collect();

        HealthReport {
            ok,
            status,
            summary,
            details,
            duration,
            generated_at: now,
        }
    }

    fn is_stale(&self, result: &CheckResult, now: DateTime<Utc>) -> bool {
        self.max_age
            .map(|max_age| result.age(now) > max_age)
            .unwrap_or(false)
    }
}
