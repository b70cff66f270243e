//! Results produced by probe executions and the reports rolled up from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome class of a single probe execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warning,
    Critical,
    Error,
    Timeout,
}

impl CheckStatus {
    /// Statuses that fail a critical check outright.
    pub fn is_hard_failure(&self) -> bool {
        matches!(self, CheckStatus::Critical | CheckStatus::Error | CheckStatus::Timeout)
    }

    pub fn is_ok(&self) -> bool {
        *self == CheckStatus::Ok
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Ok => write!(f, "ok"),
            CheckStatus::Warning => write!(f, "warning"),
            CheckStatus::Critical => write!(f, "critical"),
            CheckStatus::Error => write!(f, "error"),
            CheckStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// Overall state of a report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One probe execution at one point in time. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub value: Option<serde_json::Value>,
    pub message: String,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    pub attempt_count: u32,
    /// Criticality of the spec that produced this result.
    pub critical: bool,
}

impl CheckResult {
    pub fn new(name: impl Into<String>, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            value: None,
            message: message.into(),
            duration: Duration::ZERO,
            timestamp: Utc::now(),
            attempt_count: 0,
            critical: false,
        }
    }

    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_attempts(mut self, attempt_count: u32) -> Self {
        self.attempt_count = attempt_count;
        self
    }

    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Age of the result relative to `now`; zero if the timestamp lies in the future.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Aggregate view over the latest result of every cached check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub ok: bool,
    pub status: HealthStatus,
    pub summary: String,
    pub details: BTreeMap<String, CheckResult>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub generated_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn failing(&self) -> impl Iterator<Item = &CheckResult> {
        self.details.values().filter(|result| !result.status.is_ok())
    }
}

/// Durations travel as fractional seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
