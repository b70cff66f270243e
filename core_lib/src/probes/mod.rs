//! Built-in probes and the translation from config into check specs

pub mod custom;
pub mod dependency;
pub mod pages;
pub mod system;

pub use custom::{custom_spec, HookRegistry};
pub use dependency::{app_server_spec, dependency_spec, HttpProbe, Target, TcpProbe};
pub use pages::{PageError, PageErrorKind, PageErrorTracker, PAGES_CHECK_NAME};
pub use system::{system_specs, SystemMonitor};

use crate::config::AppConfig;
use crate::error::{HealthError, Result};
use crate::health::CheckSpec;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Everything the config asks for, in a stable order: system, app server,
/// dependencies, custom hooks, then page errors when a tracker is supplied.
pub fn build_specs(
    config: &AppConfig,
    hooks: &HookRegistry,
    monitor: &Arc<SystemMonitor>,
    pages: Option<&PageErrorTracker>,
) -> Result<Vec<CheckSpec>> {
    let checker = &config.checker;
    let mut specs = system_specs(&config.system, checker, monitor);

    if let Some(app_server) = &config.app_server {
        specs.push(app_server_spec(app_server, checker)?);
    }

    for dependency in &config.dependencies {
        specs.push(dependency_spec(&dependency.clone().into_config(), checker)?);
    }

    for custom in &config.custom_checks {
        specs.push(custom_spec(&custom.clone().into_config(), hooks, checker)?);
    }

    if let Some(pages) = pages {
        specs.push(pages.spec());
    }

    let mut seen = HashSet::new();
    for spec in &specs {
        if !seen.insert(spec.name.as_str()) {
            return Err(HealthError::DuplicateName(spec.name.clone()));
        }
    }

    info!("Built {} checks from configuration", specs.len());
    Ok(specs)
}
