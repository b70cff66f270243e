//! Declarative check definitions: the probe plus its execution policy

use crate::error::{HealthError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

lazy_static! {
    static ref THRESHOLD_PATTERN: Regex =
        Regex::new(r"^\s*(?:value\s*)?(<=|>=|==|!=|<|>)\s*(-?\d+(?:\.\d+)?)\s*$").unwrap();
}

/// Passed to every probe invocation.
///
/// Probes that do long-running work should watch `cancel`; it fires when the
/// attempt's deadline or the run's global deadline passes. A probe that ignores
/// it keeps running in the background after its result has been recorded as a
/// timeout.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    pub name: String,
    pub attempt: u32,
    pub cancel: CancellationToken,
}

/// What a probe reports back when it completes.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutput {
    pub healthy: bool,
    pub value: Option<serde_json::Value>,
    pub message: String,
}

impl ProbeOutput {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            value: None,
            message: message.into(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            value: None,
            message: message.into(),
        }
    }

    pub fn with_value(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[async_trait::async_trait]
pub trait AsyncProbe: Send + Sync {
    async fn probe(&self, ctx: &ProbeContext) -> anyhow::Result<ProbeOutput>;
}

pub type SyncProbeFn = dyn Fn(&ProbeContext) -> anyhow::Result<ProbeOutput> + Send + Sync;

/// The unit of work behind a check, either a blocking function or a future.
#[derive(Clone)]
pub enum Probe {
    Sync(Arc<SyncProbeFn>),
    Async(Arc<dyn AsyncProbe>),
}

impl Probe {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&ProbeContext) -> anyhow::Result<ProbeOutput> + Send + Sync + 'static,
    {
        Probe::Sync(Arc::new(f))
    }

    pub fn from_async<P: AsyncProbe + 'static>(probe: P) -> Self {
        Probe::Async(Arc::new(probe))
    }

    pub fn from_async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(ProbeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ProbeOutput>> + Send + 'static,
    {
        Probe::Async(Arc::new(AsyncFnProbe(f)))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Probe::Async(_))
    }
}

impl std::fmt::Debug for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Probe::Sync(_) => write!(f, "Probe::Sync"),
            Probe::Async(_) => write!(f, "Probe::Async"),
        }
    }
}

struct AsyncFnProbe<F>(F);

#[async_trait::async_trait]
impl<F, Fut> AsyncProbe for AsyncFnProbe<F>
where
    F: Fn(ProbeContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ProbeOutput>> + Send + 'static,
{
    async fn probe(&self, ctx: &ProbeContext) -> anyhow::Result<ProbeOutput> {
        (self.0)(ctx.clone()).await
    }
}

/// Retries apply to probe errors only, never to timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn attempts(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff: Duration::from_secs(10).max(initial_backoff),
        }
    }

    /// Backoff before attempt `attempt + 1`, doubling from the initial delay.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparator {
    fn symbol(&self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Eq => "==",
            Comparator::Ne => "!=",
        }
    }
}

/// Numeric pass condition on a probe's value, written as `value < 80`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Threshold {
    pub op: Comparator,
    pub limit: f64,
}

impl Threshold {
    pub fn new(op: Comparator, limit: f64) -> Self {
        Self { op, limit }
    }

    pub fn below(limit: f64) -> Self {
        Self::new(Comparator::Lt, limit)
    }

    pub fn parse(expr: &str) -> Result<Self> {
        let captures = THRESHOLD_PATTERN
            .captures(expr)
            .ok_or_else(|| HealthError::Config(format!("Invalid threshold expression: '{}'", expr)))?;

        let op = match &captures[1] {
            "<" => Comparator::Lt,
            "<=" => Comparator::Le,
            ">" => Comparator::Gt,
            ">=" => Comparator::Ge,
            "==" => Comparator::Eq,
            _ => Comparator::Ne,
        };
        let limit = captures[2]
            .parse::<f64>()
            .map_err(|e| HealthError::Config(format!("Invalid threshold limit in '{}': {}", expr, e)))?;

        Ok(Self { op, limit })
    }

    /// Whether `value` satisfies the threshold.
    pub fn passes(&self, value: f64) -> bool {
        match self.op {
            Comparator::Lt => value < self.limit,
            Comparator::Le => value <= self.limit,
            Comparator::Gt => value > self.limit,
            Comparator::Ge => value >= self.limit,
            Comparator::Eq => value == self.limit,
            Comparator::Ne => value != self.limit,
        }
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "value {} {}", self.op.symbol(), self.limit)
    }
}

impl std::str::FromStr for Threshold {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Threshold {
    type Error = HealthError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Threshold> for String {
    fn from(threshold: Threshold) -> Self {
        threshold.to_string()
    }
}

/// Grouping used by the category views of the HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckCategory {
    System,
    Dependency,
    Custom,
    Page,
}

impl std::fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckCategory::System => write!(f, "system"),
            CheckCategory::Dependency => write!(f, "dependency"),
            CheckCategory::Custom => write!(f, "custom"),
            CheckCategory::Page => write!(f, "page"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckSpec {
    pub name: String,
    pub probe: Probe,
    pub timeout: Duration,
    pub critical: bool,
    pub retry: RetryPolicy,
    pub threshold: Option<Threshold>,
    /// `None` means on-demand only.
    pub interval: Option<Duration>,
    pub category: CheckCategory,
}

impl CheckSpec {
    pub fn new(name: impl Into<String>, probe: Probe) -> Self {
        Self {
            name: name.into(),
            probe,
            timeout: DEFAULT_CHECK_TIMEOUT,
            critical: false,
            retry: RetryPolicy::default(),
            threshold: None,
            interval: None,
            category: CheckCategory::Custom,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_threshold(mut self, threshold: Threshold) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn in_category(mut self, category: CheckCategory) -> Self {
        self.category = category;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HealthError::Config("Check name cannot be empty".to_string()));
        }

        if self.timeout.is_zero() {
            return Err(HealthError::Config(format!(
                "Check '{}' must have a positive timeout",
                self.name
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(HealthError::Config(format!(
                "Check '{}' must allow at least one attempt",
                self.name
            )));
        }

        if matches!(self.interval, Some(interval) if interval.is_zero()) {
            return Err(HealthError::Config(format!(
                "Check '{}' has a zero schedule interval",
                self.name
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_probe() -> Probe {
        Probe::from_fn(|_| Ok(ProbeOutput::healthy("ok")))
    }

    #[test]
    fn test_threshold_parsing() {
        let threshold = Threshold::parse("value < 80").unwrap();
        assert_eq!(threshold, Threshold::new(Comparator::Lt, 80.0));

        let threshold: Threshold = ">= 0.5".parse().unwrap();
        assert_eq!(threshold, Threshold::new(Comparator::Ge, 0.5));

        let threshold = Threshold::parse("value != -1").unwrap();
        assert_eq!(threshold.op, Comparator::Ne);
        assert_eq!(threshold.limit, -1.0);

        assert!(Threshold::parse("value ~ 80").is_err());
        assert!(Threshold::parse("cpu < 80").is_err());
        assert!(Threshold::parse("").is_err());
    }

    #[test]
    fn test_threshold_evaluation() {
        let below = Threshold::below(80.0);
        assert!(below.passes(79.9));
        assert!(!below.passes(80.0));
        assert!(!below.passes(90.0));

        let at_least = Threshold::new(Comparator::Ge, 1.0);
        assert!(at_least.passes(1.0));
        assert!(!at_least.passes(0.0));
    }

    #[test]
    fn test_threshold_serde_as_expression() {
        let threshold = Threshold::below(80.0);
        let serialized = serde_json::to_string(&threshold).unwrap();
        assert_eq!(serialized, "\"value < 80\"");

        let parsed: Threshold = serde_json::from_str("\"value <= 90.5\"").unwrap();
        assert_eq!(parsed, Threshold::new(Comparator::Le, 90.5));
    }

    #[test]
    fn test_retry_backoff_doubles_up_to_max() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
        };

        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(300));
        assert_eq!(policy.backoff_after(40), Duration::from_millis(300));
    }

    #[test]
    fn test_spec_defaults() {
        let spec = CheckSpec::new("db", noop_probe());
        assert_eq!(spec.timeout, DEFAULT_CHECK_TIMEOUT);
        assert!(!spec.critical);
        assert_eq!(spec.retry.max_attempts, 1);
        assert!(spec.threshold.is_none());
        assert!(spec.interval.is_none());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_spec_validation() {
        let spec = CheckSpec::new("", noop_probe());
        assert!(matches!(spec.validate(), Err(HealthError::Config(_))));

        let spec = CheckSpec::new("db", noop_probe()).with_timeout(Duration::ZERO);
        assert!(matches!(spec.validate(), Err(HealthError::Config(_))));

        let spec = CheckSpec::new("db", noop_probe()).with_retry(RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        });
        assert!(spec.validate().is_err());

        let spec = CheckSpec::new("db", noop_probe()).every(Duration::ZERO);
        assert!(spec.validate().is_err());
    }

    #[tokio::test]
    async fn test_async_fn_probe_receives_context() {
        let probe = Probe::from_async_fn(|ctx: ProbeContext| async move {
            Ok(ProbeOutput::healthy(format!("{} attempt {}", ctx.name, ctx.attempt)))
        });
        assert!(probe.is_async());

        let ctx = ProbeContext {
            name: "api".to_string(),
            attempt: 2,
            cancel: CancellationToken::new(),
        };

        match probe {
            Probe::Async(inner) => {
                let output = inner.probe(&ctx).await.unwrap();
                assert_eq!(output.message, "api attempt 2");
            }
            Probe::Sync(_) => panic!("expected async probe"),
        }
    }
}
