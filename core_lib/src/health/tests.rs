#[cfg(test)]
mod tests {
    use crate::health::{
        AsyncProbe, CheckCategory, CheckSpec, CheckStatus, CheckerEngine, EngineSettings, HealthStatus, Probe,
        ProbeContext, ProbeOutput, Registry, RetryPolicy, Threshold,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn engine() -> CheckerEngine {
        CheckerEngine::new(Registry::new(), EngineSettings::default())
    }

    fn ok_probe() -> Probe {
        Probe::from_fn(|_| Ok(ProbeOutput::healthy("ok")))
    }

    fn down_probe() -> Probe {
        Probe::from_fn(|_| Ok(ProbeOutput::unhealthy("down")))
    }

    struct FlakyProbe {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl AsyncProbe for FlakyProbe {
        async fn probe(&self, ctx: &ProbeContext) -> anyhow::Result<ProbeOutput> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("connection refused on attempt {}", ctx.attempt);
            }
            Ok(ProbeOutput::healthy("recovered"))
        }
    }

    #[tokio::test]
    async fn test_database_and_disk_scenario() {
        let engine = engine();
        engine
            .register(CheckSpec::new("db", ok_probe()).critical(true))
            .unwrap();
        engine
            .register(
                CheckSpec::new("disk", Probe::from_fn(|_| Ok(ProbeOutput::healthy("disk usage").with_value(90))))
                    .with_threshold(Threshold::parse("value < 80").unwrap()),
            )
            .unwrap();

        let report = engine.run_all(Duration::from_secs(5)).await;

        assert!(!report.ok);
        assert_eq!(report.details["disk"].status, CheckStatus::Warning);
        assert_eq!(report.details["db"].status, CheckStatus::Ok);
        assert!(report.summary.contains("disk"));
        assert!(report.summary.starts_with("degraded (non-critical)"));
    }

    #[tokio::test]
    async fn test_empty_registry_reports_no_checks() {
        let report = engine().run_all(Duration::from_secs(5)).await;
        assert!(!report.ok);
        assert_eq!(report.summary, "no checks executed");
        assert_eq!(report.status, HealthStatus::Unknown);
    }

    #[tokio::test]
    async fn test_critical_failure_cannot_be_outvoted() {
        let engine = engine();
        engine.register(CheckSpec::new("db", down_probe()).critical(true)).unwrap();
        for i in 0..10 {
            engine.register(CheckSpec::new(format!("svc_{}", i), ok_probe())).unwrap();
        }

        let report = engine.run_all(Duration::from_secs(5)).await;

        assert!(!report.ok);
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.summary, "critical failure: db");
        assert_eq!(report.details["db"].status, CheckStatus::Critical);
        assert_eq!(report.details.len(), 11);
    }

    #[tokio::test]
    async fn test_non_critical_failure_is_isolated() {
        let engine = engine();
        engine.register(CheckSpec::new("cache", down_probe())).unwrap();
        engine.register(CheckSpec::new("db", ok_probe())).unwrap();
        engine.register(CheckSpec::new("api", ok_probe())).unwrap();

        let report = engine.run_all(Duration::from_secs(5)).await;

        assert!(!report.ok);
        assert_eq!(report.summary, "degraded (non-critical): cache");
        assert!(!report.summary.contains("critical failure"));
        assert_eq!(report.details["cache"].status, CheckStatus::Warning);
        assert_eq!(report.details["db"].status, CheckStatus::Ok);
        assert_eq!(report.details["api"].status, CheckStatus::Ok);
    }

    #[tokio::test]
    async fn test_probe_error_is_recorded_not_raised() {
        let engine = engine();
        engine
            .register(CheckSpec::new("broken", Probe::from_fn(|_| anyhow::bail!("socket closed"))))
            .unwrap();

        let report = engine.run_all(Duration::from_secs(5)).await;

        let broken = &report.details["broken"];
        assert_eq!(broken.status, CheckStatus::Error);
        assert!(broken.message.contains("socket closed"));
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_retries_recover_flaky_dependency() {
        let engine = engine();
        engine
            .register(
                CheckSpec::new(
                    "api",
                    Probe::from_async(FlakyProbe {
                        failures_left: AtomicU32::new(2),
                    }),
                )
                .critical(true)
                .with_retry(RetryPolicy::attempts(3, Duration::from_millis(10))),
            )
            .unwrap();

        let report = engine.run_all(Duration::from_secs(5)).await;

        assert!(report.ok);
        assert_eq!(report.details["api"].attempt_count, 3);
        assert_eq!(report.details["api"].message, "recovered");
    }

    #[tokio::test]
    async fn test_run_all_bounded_by_global_timeout() {
        let engine = engine();
        for i in 0..5 {
            engine
                .register(
                    CheckSpec::new(
                        format!("hang_{}", i),
                        Probe::from_async_fn(|ctx| async move {
                            ctx.cancel.cancelled().await;
                            Ok(ProbeOutput::healthy("cancelled"))
                        }),
                    )
                    .with_timeout(Duration::from_secs(60)),
                )
                .unwrap();
        }
        engine.register(CheckSpec::new("quick", ok_probe())).unwrap();

        let started = Instant::now();
        let report = engine.run_all(Duration::from_millis(250)).await;

        assert!(started.elapsed() < Duration::from_millis(250) + Duration::from_millis(500));
        assert_eq!(report.details["quick"].status, CheckStatus::Ok);
        assert_eq!(report.failing().count(), 5);
        assert!(report
            .failing()
            .all(|result| result.status == CheckStatus::Timeout));
    }

    #[tokio::test]
    async fn test_unregister_then_register_starts_clean() {
        let engine = engine();
        engine.register(CheckSpec::new("db", down_probe()).critical(true)).unwrap();
        engine.run_all(Duration::from_secs(5)).await;
        assert_eq!(engine.report().status, HealthStatus::Unhealthy);

        engine.unregister("db").unwrap();
        engine.register(CheckSpec::new("db", down_probe())).unwrap();

        assert!(engine.history("db").unwrap().is_empty());

        let report = engine.run_all(Duration::from_secs(5)).await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.details["db"].status, CheckStatus::Warning);
        assert_eq!(engine.history("db").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_bounded_after_extra_cycles() {
        let cap = 4;
        let engine = CheckerEngine::new(
            Registry::new(),
            EngineSettings {
                history_size: cap,
                ..EngineSettings::default()
            },
        );
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        engine
            .register(CheckSpec::new(
                "queue_depth",
                Probe::from_fn(move |_| Ok(ProbeOutput::healthy("depth").with_value(counter.fetch_add(1, Ordering::SeqCst)))),
            ))
            .unwrap();

        for _ in 0..cap + 5 {
            engine.run_all(Duration::from_secs(5)).await;
        }

        let values: Vec<u64> = engine
            .history("queue_depth")
            .unwrap()
            .iter()
            .filter_map(|result| result.value.as_ref().and_then(|v| v.as_u64()))
            .collect();
        assert_eq!(values, vec![5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn test_stale_results_fail_report() {
        let engine = CheckerEngine::new(
            Registry::new(),
            EngineSettings {
                max_age: Some(Duration::from_millis(50)),
                ..EngineSettings::default()
            },
        );
        engine.register(CheckSpec::new("db", ok_probe()).critical(true)).unwrap();

        assert!(engine.run_all(Duration::from_secs(5)).await.ok);

        tokio::time::sleep(Duration::from_millis(120)).await;
        let report = engine.report();
        assert!(!report.ok);
        assert_eq!(report.summary, "critical failure: db (stale)");
    }

    #[tokio::test]
    async fn test_categories_partition_report() {
        let engine = engine();
        engine
            .register(CheckSpec::new("memory", ok_probe()).in_category(CheckCategory::System))
            .unwrap();
        engine
            .register(
                CheckSpec::new("postgres", down_probe())
                    .critical(true)
                    .in_category(CheckCategory::Dependency),
            )
            .unwrap();
        engine.run_all(Duration::from_secs(5)).await;

        assert!(engine.report_for(CheckCategory::System).ok);
        assert_eq!(engine.report_for(CheckCategory::Dependency).status, HealthStatus::Unhealthy);
        assert_eq!(engine.report().status, HealthStatus::Unhealthy);
    }
}
