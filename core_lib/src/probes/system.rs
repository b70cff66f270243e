//! Host resource probes backed by sysinfo

use crate::config::{CheckerConfig, SystemChecksConfig};
use crate::health::{CheckCategory, CheckSpec, Probe, ProbeOutput, Threshold};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use sysinfo::{Disks, System};
use tracing::debug;

/// Shared sysinfo handle. Refreshes are serialized through the mutex so
/// concurrent probes do not race on the same `System`.
pub struct SystemMonitor {
    system: Mutex<System>,
}

impl SystemMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Global CPU usage. Blocks for the minimum sampling interval.
    pub fn cpu_percent(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_cpu();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_cpu();
        round1(system.global_cpu_info().cpu_usage() as f64)
    }

    pub fn memory_percent(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_memory();

        let total = system.total_memory();
        let used = system.used_memory();
        if total > 0 {
            round1((used as f64 / total as f64) * 100.0)
        } else {
            0.0
        }
    }

    /// Usage of the disk whose mount point is the longest prefix of `path`.
    pub fn disk_percent(&self, path: &Path) -> Option<(String, f64)> {
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())?;

        let total = disk.total_space();
        let used = total.saturating_sub(disk.available_space());
        let percent = if total > 0 {
            round1((used as f64 / total as f64) * 100.0)
        } else {
            0.0
        };

        Some((disk.mount_point().to_string_lossy().to_string(), percent))
    }

    /// Resident memory of this process in MiB.
    pub fn process_memory_mib(&self) -> Option<f64> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = self.system.lock();
        system.refresh_process(pid);
        system
            .process(pid)
            .map(|process| round1(process.memory() as f64 / (1024.0 * 1024.0)))
    }

    pub fn load_average_one(&self) -> f64 {
        System::load_average().one
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn cpu_probe(monitor: Arc<SystemMonitor>) -> Probe {
    Probe::from_fn(move |_| {
        let usage = monitor.cpu_percent();
        debug!("CPU usage {:.1}%", usage);
        Ok(ProbeOutput::healthy(format!("CPU usage {:.1}%", usage)).with_value(usage))
    })
}

pub fn memory_probe(monitor: Arc<SystemMonitor>) -> Probe {
    Probe::from_fn(move |_| {
        let usage = monitor.memory_percent();
        debug!("Memory usage {:.1}%", usage);
        Ok(ProbeOutput::healthy(format!("Memory usage {:.1}%", usage)).with_value(usage))
    })
}

pub fn disk_probe(monitor: Arc<SystemMonitor>, path: impl Into<String>) -> Probe {
    let path = path.into();
    Probe::from_fn(move |_| {
        let (mount, usage) = monitor
            .disk_percent(Path::new(&path))
            .ok_or_else(|| anyhow::anyhow!("No disk found for path '{}'", path))?;
        Ok(ProbeOutput::healthy(format!("Disk usage {:.1}% on {}", usage, mount)).with_value(usage))
    })
}

/// One spec per configured ceiling, each failing once usage reaches it.
pub fn system_specs(system: &SystemChecksConfig, checker: &CheckerConfig, monitor: &Arc<SystemMonitor>) -> Vec<CheckSpec> {
    let mut specs = Vec::new();

    if let Some(ceiling) = system.cpu {
        specs.push(("cpu", cpu_probe(Arc::clone(monitor)), ceiling));
    }
    if let Some(ceiling) = system.memory {
        specs.push(("memory", memory_probe(Arc::clone(monitor)), ceiling));
    }
    if let Some(ceiling) = system.disk {
        specs.push(("disk", disk_probe(Arc::clone(monitor), system.disk_path.clone()), ceiling));
    }

    specs
        .into_iter()
        .map(|(name, probe, ceiling)| {
            let spec = CheckSpec::new(name, probe)
                .with_timeout(checker.default_check_timeout())
                .critical(system.critical)
                .with_threshold(Threshold::below(ceiling))
                .in_category(CheckCategory::System);
            match checker.check_interval() {
                Some(interval) => spec.every(interval),
                None => spec,
            }
        })
        .collect()
}
