//! Run cycles, cache commits and interval scheduling

use super::aggregator::Aggregator;
use super::cache::{ResultCache, DEFAULT_HISTORY_SIZE};
use super::collector::{Collector, DEFAULT_GLOBAL_TIMEOUT};
use super::model::{CheckResult, HealthReport};
use super::registry::{RegisterMode, Registration, Registry};
use super::spec::{CheckCategory, CheckSpec};
use crate::error::{HealthError, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Budget for scheduled runs and for `run_all` callers that pass the default.
    pub global_timeout: Duration,
    pub history_size: usize,
    /// Results older than this count as timed out in reports.
    pub max_age: Option<Duration>,
    pub max_concurrency: Option<usize>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            global_timeout: DEFAULT_GLOBAL_TIMEOUT,
            history_size: DEFAULT_HISTORY_SIZE,
            max_age: None,
            max_concurrency: None,
        }
    }
}

/// Handle to the checker. Clones share the same registry, cache and schedules.
#[derive(Clone)]
pub struct CheckerEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    registry: Registry,
    cache: ResultCache,
    collector: Collector,
    aggregator: Aggregator,
    global_timeout: Duration,
    run_seq: AtomicU64,
    last_run_duration: Mutex<Duration>,
    // Serializes registry swaps with cache commits so a purged name never
    // receives a result produced by the spec it replaced.
    commit_lock: Mutex<()>,
    // Keyed by name and spec identity: a replaced definition never blocks its successor.
    in_flight: Mutex<HashSet<(String, usize)>>,
    schedules: Mutex<HashMap<String, JoinHandle<()>>>,
    scheduler_running: AtomicBool,
    shutdown: CancellationToken,
}

impl CheckerEngine {
    pub fn new(registry: Registry, settings: EngineSettings) -> Self {
        info!(
            "Creating checker engine (global timeout {:?}, history {}, max age {:?}, max concurrency {:?})",
            settings.global_timeout, settings.history_size, settings.max_age, settings.max_concurrency
        );

        Self {
            inner: Arc::new(EngineInner {
                registry,
                cache: ResultCache::new(settings.history_size),
                collector: Collector::new().with_max_concurrency(settings.max_concurrency),
                aggregator: Aggregator::new().with_max_age(settings.max_age),
                global_timeout: settings.global_timeout,
                run_seq: AtomicU64::new(0),
                last_run_duration: Mutex::new(Duration::ZERO),
                commit_lock: Mutex::new(()),
                in_flight: Mutex::new(HashSet::new()),
                schedules: Mutex::new(HashMap::new()),
                scheduler_running: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn global_timeout(&self) -> Duration {
        self.inner.global_timeout
    }

    /// Registers or replaces a check. A replaced check loses its cached
    /// results and its schedule restarts with the new definition.
    pub fn register(&self, spec: CheckSpec) -> Result<Registration> {
        self.register_with_mode(spec, RegisterMode::Overwrite)
    }

    /// Like [`CheckerEngine::register`] but fails on an existing name.
    pub fn register_strict(&self, spec: CheckSpec) -> Result<Registration> {
        self.register_with_mode(spec, RegisterMode::Strict)
    }

    fn register_with_mode(&self, spec: CheckSpec, mode: RegisterMode) -> Result<Registration> {
        let name = spec.name.clone();
        let outcome = {
            let _commit = self.inner.commit_lock.lock();
            let outcome = self.inner.registry.register_with_mode(spec, mode)?;
            self.inner.cache.remove(&name);
            outcome
        };

        if self.inner.scheduler_running.load(Ordering::SeqCst) {
            EngineInner::schedule(&self.inner, &name);
        }

        Ok(outcome)
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        {
            let _commit = self.inner.commit_lock.lock();
            self.inner.registry.unregister(name)?;
            self.inner.cache.remove(name);
        }

        if let Some(handle) = self.inner.schedules.lock().remove(name) {
            debug!("Stopping schedule for '{}'", name);
            handle.abort();
        }

        Ok(())
    }

    /// Runs every registered check and reports on them. Never fails; probe
    /// failures and timeouts are encoded in the report.
    pub async fn run_all(&self, timeout: Duration) -> HealthReport {
        let specs = self.inner.registry.list();
        self.inner.execute(specs.to_vec(), timeout).await
    }

    /// Runs the named checks only; the report covers just those checks.
    pub async fn run_checks(&self, names: &[&str], timeout: Duration) -> Result<HealthReport> {
        let specs = self.inner.registry.select(names)?;
        Ok(self.inner.execute(specs, timeout).await)
    }

    /// Rollup of the cached results without running anything.
    pub fn report(&self) -> HealthReport {
        self.inner.report_where(|_| true)
    }

    pub fn report_for(&self, category: CheckCategory) -> HealthReport {
        self.inner.report_where(|spec| spec.category == category)
    }

    /// `None` when the check is registered but has not run yet.
    pub fn latest(&self, name: &str) -> Result<Option<CheckResult>> {
        self.ensure_registered(name)?;
        Ok(self.inner.cache.latest(name))
    }

    /// Most recent last, bounded by the configured history size.
    pub fn history(&self, name: &str) -> Result<Vec<CheckResult>> {
        self.ensure_registered(name)?;
        Ok(self.inner.cache.history(name))
    }

    fn ensure_registered(&self, name: &str) -> Result<()> {
        if self.inner.registry.contains(name) {
            Ok(())
        } else {
            Err(HealthError::NotFound(name.to_string()))
        }
    }

    /// Starts one recurring trigger per check that declares an interval.
    /// Checks registered later are scheduled as they arrive.
    pub fn start_scheduler(&self) {
        if self.inner.shutdown.is_cancelled() {
            warn!("Checker engine is shut down; scheduler not started");
            return;
        }
        if self.inner.scheduler_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let specs = self.inner.registry.list();
        for spec in specs.iter().filter(|spec| spec.interval.is_some()) {
            EngineInner::schedule(&self.inner, &spec.name);
        }
        info!("Scheduler started with {} interval checks", self.inner.schedules.lock().len());
    }

    pub fn scheduled_checks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.schedules.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stops all schedules. Probes already running finish in the background.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.scheduler_running.store(false, Ordering::SeqCst);

        let handles: Vec<_> = self.inner.schedules.lock().drain().collect();
        for (name, handle) in handles {
            debug!("Stopping schedule for '{}'", name);
            handle.abort();
        }
        info!("Checker engine shut down");
    }
}

impl std::fmt::Debug for CheckerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckerEngine")
            .field("registry", &self.inner.registry)
            .field("cached", &self.inner.cache.len())
            .field("global_timeout", &self.inner.global_timeout)
            .finish()
    }
}

impl EngineInner {
    async fn execute(&self, specs: Vec<Arc<CheckSpec>>, timeout: Duration) -> HealthReport {
        let run_seq = self.run_seq.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Starting run {} with {} checks", run_seq, specs.len());

        let run = self.collector.collect(&specs, timeout).await;
        self.commit(run_seq, &specs, run.results);
        *self.last_run_duration.lock() = run.elapsed;

        let names: Vec<&str> = specs.iter().map(|spec| spec.name.as_str()).collect();
        self.aggregator.rollup(self.cache.latest_for(&names), run.elapsed)
    }

    fn commit(&self, run_seq: u64, specs: &[Arc<CheckSpec>], results: Vec<CheckResult>) {
        let _commit = self.commit_lock.lock();

        // Drop results whose spec was replaced or removed during the run.
        let current: Vec<CheckResult> = specs
            .iter()
            .zip(results)
            .filter(|(spec, _)| {
                self.registry
                    .get(&spec.name)
                    .map(|registered| Arc::ptr_eq(&registered, spec))
                    .unwrap_or(false)
            })
            .map(|(_, result)| result)
            .collect();

        let stats = self.cache.commit(run_seq, current);
        if stats.discarded > 0 {
            debug!("Run {} discarded {} out-of-order results", run_seq, stats.discarded);
        }
    }

    fn report_where(&self, filter: impl Fn(&CheckSpec) -> bool) -> HealthReport {
        let specs = self.registry.list();
        let names: Vec<&str> = specs
            .iter()
            .filter(|spec| filter(spec))
            .map(|spec| spec.name.as_str())
            .collect();

        let duration = *self.last_run_duration.lock();
        self.aggregator.rollup(self.cache.latest_for(&names), duration)
    }

    /// (Re)starts the trigger for `name`, or stops it if the current
    /// definition has no interval.
    fn schedule(inner: &Arc<EngineInner>, name: &str) {
        let mut schedules = inner.schedules.lock();
        if let Some(previous) = schedules.remove(name) {
            previous.abort();
        }

        let Some(interval) = inner.registry.get(name).and_then(|spec| spec.interval) else {
            return;
        };

        debug!("Scheduling '{}' every {:?}", name, interval);
        let engine = Arc::clone(inner);
        let check = name.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = engine.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::spawn(EngineInner::run_scheduled(Arc::clone(&engine), check.clone()));
                    }
                }
            }
        });
        schedules.insert(name.to_string(), handle);
    }

    async fn run_scheduled(inner: Arc<EngineInner>, name: String) {
        let Some(spec) = inner.registry.get(&name) else {
            return;
        };
        let Some(_guard) = InFlightGuard::acquire(&inner, &spec) else {
            debug!("Skipping scheduled run of '{}': previous run still in flight", name);
            return;
        };

        inner.execute(vec![spec], inner.global_timeout).await;
    }
}

/// Marks a check as running on its schedule until dropped.
struct InFlightGuard {
    inner: Arc<EngineInner>,
    // Held so the spec's address stays unique while the key is live.
    spec: Arc<CheckSpec>,
}

impl InFlightGuard {
    fn acquire(inner: &Arc<EngineInner>, spec: &Arc<CheckSpec>) -> Option<Self> {
        if inner.in_flight.lock().insert(Self::key(spec)) {
            Some(Self {
                inner: Arc::clone(inner),
                spec: Arc::clone(spec),
            })
        } else {
            None
        }
    }

    fn key(spec: &Arc<CheckSpec>) -> (String, usize) {
        (spec.name.clone(), Arc::as_ptr(spec) as usize)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&Self::key(&self.spec));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::model::{CheckStatus, HealthStatus};
    use crate::health::spec::{Probe, ProbeOutput, Threshold};
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    fn engine() -> CheckerEngine {
        CheckerEngine::new(Registry::new(), EngineSettings::default())
    }

    fn ok_spec(name: &str) -> CheckSpec {
        CheckSpec::new(name, Probe::from_fn(|_| Ok(ProbeOutput::healthy("ok"))))
    }

    fn failing_spec(name: &str) -> CheckSpec {
        CheckSpec::new(name, Probe::from_fn(|_| Ok(ProbeOutput::unhealthy("down"))))
    }

    #[tokio::test]
    async fn test_run_all_commits_and_reports() {
        let engine = engine();
        engine.register(ok_spec("db").critical(true)).unwrap();
        engine
            .register(
                CheckSpec::new("disk", Probe::from_fn(|_| Ok(ProbeOutput::healthy("disk usage").with_value(90))))
                    .with_threshold(Threshold::below(80.0)),
            )
            .unwrap();

        let report = engine.run_all(DEFAULT_GLOBAL_TIMEOUT).await;

        assert!(!report.ok);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.details["db"].status, CheckStatus::Ok);
        assert_eq!(report.details["disk"].status, CheckStatus::Warning);
        assert!(report.summary.contains("disk"));
        assert!(report.summary.contains("degraded"));

        assert_eq!(engine.latest("db").unwrap().unwrap().status, CheckStatus::Ok);
        assert_eq!(engine.report().summary, report.summary);
    }

    #[tokio::test]
    async fn test_report_before_any_run() {
        let engine = engine();
        engine.register(ok_spec("db")).unwrap();

        let report = engine.report();
        assert!(!report.ok);
        assert_eq!(report.summary, "no checks executed");
        assert!(engine.latest("db").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_names_are_not_found() {
        let engine = engine();
        assert!(matches!(engine.latest("ghost"), Err(HealthError::NotFound(_))));
        assert!(matches!(engine.history("ghost"), Err(HealthError::NotFound(_))));
        assert!(matches!(engine.unregister("ghost"), Err(HealthError::NotFound(_))));
        assert!(matches!(
            engine.run_checks(&["ghost"], DEFAULT_GLOBAL_TIMEOUT).await,
            Err(HealthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_run_checks_covers_subset() {
        let engine = engine();
        engine.register(ok_spec("db")).unwrap();
        engine.register(failing_spec("cache")).unwrap();

        let report = engine.run_checks(&["db"], DEFAULT_GLOBAL_TIMEOUT).await.unwrap();
        assert!(report.ok);
        assert_eq!(report.details.len(), 1);
        assert!(engine.latest("cache").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_report_for_category() {
        let engine = engine();
        engine.register(ok_spec("cpu").in_category(CheckCategory::System)).unwrap();
        engine.register(failing_spec("api").in_category(CheckCategory::Dependency)).unwrap();
        engine.run_all(DEFAULT_GLOBAL_TIMEOUT).await;

        let system = engine.report_for(CheckCategory::System);
        assert!(system.ok);
        assert_eq!(system.details.len(), 1);

        let dependencies = engine.report_for(CheckCategory::Dependency);
        assert!(!dependencies.ok);
        assert!(dependencies.details.contains_key("api"));

        let pages = engine.report_for(CheckCategory::Page);
        assert_eq!(pages.status, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn test_history_keeps_last_n_runs_in_order() {
        let engine = CheckerEngine::new(
            Registry::new(),
            EngineSettings {
                history_size: 5,
                ..EngineSettings::default()
            },
        );
        let counter = Arc::new(AtomicU32::new(0));
        let probe_counter = counter.clone();
        engine
            .register(CheckSpec::new(
                "counter",
                Probe::from_fn(move |_| {
                    let n = probe_counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(ProbeOutput::healthy("tick").with_value(n))
                }),
            ))
            .unwrap();

        for _ in 0..10 {
            engine.run_all(DEFAULT_GLOBAL_TIMEOUT).await;
        }

        let values: Vec<u64> = engine
            .history("counter")
            .unwrap()
            .iter()
            .map(|r| r.value.as_ref().and_then(|v| v.as_u64()).unwrap())
            .collect();
        assert_eq!(values, vec![6, 7, 8, 9, 10]);
    }

    #[tokio::test]
    async fn test_later_run_wins_over_slow_earlier_run() {
        let engine = engine();
        let calls = Arc::new(AtomicU32::new(0));
        let probe_calls = calls.clone();
        engine
            .register(
                CheckSpec::new(
                    "api",
                    Probe::from_async_fn(move |_| {
                        let call = probe_calls.fetch_add(1, Ordering::SeqCst) + 1;
                        async move {
                            if call == 1 {
                                tokio::time::sleep(Duration::from_millis(400)).await;
                            }
                            Ok(ProbeOutput::healthy(format!("call {}", call)).with_value(call))
                        }
                    }),
                )
                .with_timeout(Duration::from_secs(2)),
            )
            .unwrap();

        let slow_engine = engine.clone();
        let run_a = tokio::spawn(async move { slow_engine.run_all(Duration::from_secs(2)).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        engine.run_all(Duration::from_secs(2)).await;
        run_a.await.unwrap();

        let latest = engine.latest("api").unwrap().unwrap();
        assert_eq!(latest.value, Some(serde_json::json!(2)));
        assert_eq!(engine.history("api").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reregister_purges_old_results() {
        let engine = engine();
        engine.register(failing_spec("db").critical(true)).unwrap();
        let report = engine.run_all(DEFAULT_GLOBAL_TIMEOUT).await;
        assert_eq!(report.status, HealthStatus::Unhealthy);

        engine.unregister("db").unwrap();
        engine.register(ok_spec("db")).unwrap();

        assert!(engine.latest("db").unwrap().is_none());
        assert_eq!(engine.report().summary, "no checks executed");

        let report = engine.run_all(DEFAULT_GLOBAL_TIMEOUT).await;
        assert!(report.ok);
        assert!(!report.details["db"].critical);
    }

    #[tokio::test]
    async fn test_run_all_respects_global_timeout() {
        let engine = engine();
        engine
            .register(
                CheckSpec::new(
                    "stuck",
                    Probe::from_async_fn(|_| async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(ProbeOutput::healthy("never"))
                    }),
                )
                .with_timeout(Duration::from_secs(60)),
            )
            .unwrap();

        let started = Instant::now();
        let report = engine.run_all(Duration::from_millis(200)).await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(report.details["stuck"].status, CheckStatus::Timeout);
    }

    #[tokio::test]
    async fn test_run_all_without_global_deadline() {
        let engine = engine();
        engine.register(ok_spec("db")).unwrap();

        let report = engine.run_all(Duration::MAX).await;
        assert!(report.ok);
        assert_eq!(report.details["db"].status, CheckStatus::Ok);
    }

    #[tokio::test]
    async fn test_scheduled_runs_skip_while_in_flight() {
        let engine = engine();
        let calls = Arc::new(AtomicU32::new(0));
        let probe_calls = calls.clone();
        engine
            .register(
                CheckSpec::new(
                    "slow",
                    Probe::from_async_fn(move |_| {
                        probe_calls.fetch_add(1, Ordering::SeqCst);
                        async {
                            tokio::time::sleep(Duration::from_millis(300)).await;
                            Ok(ProbeOutput::healthy("done"))
                        }
                    }),
                )
                .every(Duration::from_millis(20)),
            )
            .unwrap();

        engine.start_scheduler();
        assert_eq!(engine.scheduled_checks(), vec!["slow".to_string()]);

        tokio::time::sleep(Duration::from_millis(450)).await;
        engine.shutdown();

        let calls = calls.load(Ordering::SeqCst);
        assert!((1..=2).contains(&calls), "expected at most two runs, got {}", calls);
        assert!(engine.scheduled_checks().is_empty());
    }

    #[tokio::test]
    async fn test_reregistered_check_runs_while_old_definition_in_flight() {
        let engine = engine();
        engine
            .register(
                CheckSpec::new(
                    "db",
                    Probe::from_async_fn(|_| async {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        Ok(ProbeOutput::healthy("stale definition"))
                    }),
                )
                .every(Duration::from_secs(3600)),
            )
            .unwrap();
        engine.start_scheduler();
        tokio::time::sleep(Duration::from_millis(50)).await;

        engine
            .register(
                CheckSpec::new("db", Probe::from_fn(|_| Ok(ProbeOutput::healthy("fresh definition"))))
                    .every(Duration::from_secs(3600)),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let latest = engine.latest("db").unwrap().expect("new definition ran on its first tick");
        assert_eq!(latest.message, "fresh definition");
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_scheduler_follows_registration_changes() {
        let engine = engine();
        engine.start_scheduler();

        engine.register(ok_spec("db").every(Duration::from_millis(20))).unwrap();
        assert_eq!(engine.scheduled_checks(), vec!["db".to_string()]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(engine.latest("db").unwrap().is_some());

        engine.register(ok_spec("db")).unwrap();
        assert!(engine.scheduled_checks().is_empty());

        engine.register(ok_spec("db").every(Duration::from_millis(20))).unwrap();
        engine.unregister("db").unwrap();
        assert!(engine.scheduled_checks().is_empty());

        engine.shutdown();
    }
}
