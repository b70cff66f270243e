//! Named hooks that config entries attach as custom checks

use super::system::SystemMonitor;
use crate::config::{CheckerConfig, CustomCheckConfig};
use crate::error::{HealthError, Result};
use crate::health::{CheckCategory, CheckSpec, Probe, ProbeOutput, Threshold};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Probe>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `process_memory` (MiB) and `load_average` (one minute).
    pub fn with_builtins(monitor: Arc<SystemMonitor>) -> Self {
        let mut hooks = Self::new();

        let memory_monitor = Arc::clone(&monitor);
        hooks.register(
            "process_memory",
            Probe::from_fn(move |_| {
                let mib = memory_monitor
                    .process_memory_mib()
                    .ok_or_else(|| anyhow::anyhow!("current process not visible to sysinfo"))?;
                Ok(ProbeOutput::healthy(format!("Process memory {:.1} MiB", mib)).with_value(mib))
            }),
        );

        hooks.register(
            "load_average",
            Probe::from_fn(move |_| {
                let load = monitor.load_average_one();
                Ok(ProbeOutput::healthy(format!("Load average {:.2}", load)).with_value(load))
            }),
        );

        hooks
    }

    pub fn register(&mut self, name: impl Into<String>, probe: Probe) -> &mut Self {
        self.hooks.insert(name.into(), probe);
        self
    }

    pub fn get(&self, name: &str) -> Option<Probe> {
        self.hooks.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.hooks.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry").field("hooks", &self.names()).finish()
    }
}

pub fn custom_spec(custom: &CustomCheckConfig, hooks: &HookRegistry, checker: &CheckerConfig) -> Result<CheckSpec> {
    let probe = hooks.get(&custom.name).ok_or_else(|| {
        HealthError::Config(format!(
            "Custom check '{}' has no matching hook (known: {})",
            custom.name,
            hooks.names().join(", ")
        ))
    })?;

    let timeout = custom
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| checker.default_check_timeout());

    let mut spec = CheckSpec::new(custom.name.clone(), probe)
        .with_timeout(timeout)
        .critical(custom.critical)
        .with_retry(checker.retry_policy())
        .in_category(CheckCategory::Custom);

    if let Some(threshold) = &custom.threshold {
        spec = spec.with_threshold(Threshold::parse(threshold)?);
    }

    let interval = custom
        .interval_seconds
        .map(Duration::from_secs)
        .or_else(|| checker.check_interval());
    if let Some(interval) = interval {
        spec = spec.every(interval);
    }

    Ok(spec)
}
