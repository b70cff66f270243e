use crate::error::{HealthError, Result};
use crate::health::{EngineSettings, RetryPolicy, Threshold};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "HEALTHCHECK_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "health_check_config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub checker: CheckerConfig,
    pub system: SystemChecksConfig,
    pub dependencies: Vec<DependencyEntry>,
    pub custom_checks: Vec<CustomCheckEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_server: Option<AppServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub health_path: String,
    /// When false, `GET {health_path}` reports the cache instead of running.
    pub run_on_request: bool,
    pub cors_permissive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub global_timeout_ms: u64,
    pub default_check_timeout_ms: u64,
    pub history_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_interval_seconds: Option<u64>,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

/// Percentage ceilings; an absent ceiling disables that check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemChecksConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<f64>,
    pub disk_path: String,
    pub critical: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyEntry {
    Url(String),
    Detailed(DependencyConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub critical: bool,
}

impl DependencyEntry {
    pub fn into_config(self) -> DependencyConfig {
        match self {
            DependencyEntry::Url(url) => DependencyConfig {
                name: None,
                url,
                timeout_ms: None,
                critical: false,
            },
            DependencyEntry::Detailed(config) => config,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            DependencyEntry::Url(url) => url,
            DependencyEntry::Detailed(config) => &config.url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomCheckEntry {
    Hook(String),
    Detailed(CustomCheckConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomCheckConfig {
    pub name: String,
    #[serde(default)]
    pub critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
}

impl CustomCheckEntry {
    pub fn into_config(self) -> CustomCheckConfig {
        match self {
            CustomCheckEntry::Hook(name) => CustomCheckConfig {
                name,
                critical: false,
                timeout_ms: None,
                threshold: None,
                interval_seconds: None,
            },
            CustomCheckEntry::Detailed(config) => config,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CustomCheckEntry::Hook(name) => name,
            CustomCheckEntry::Detailed(config) => &config.name,
        }
    }
}

/// A monitored application's own health endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppServerConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "default_app_server_path")]
    pub path: String,
}

fn default_app_server_path() -> String {
    "/healthz".to_string()
}

impl AppServerConfig {
    pub fn endpoint(&self) -> String {
        let host = self.url.trim_end_matches('/');
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{}", host)
        };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        match self.port {
            Some(port) => format!("{}:{}{}", host, port, path),
            None => format!("{}{}", host, path),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            health_path: "/health".to_string(),
            run_on_request: true,
            cors_permissive: false,
        }
    }
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            global_timeout_ms: 5000,
            default_check_timeout_ms: 5000,
            history_size: 100,
            max_age_seconds: Some(300),
            max_concurrency: None,
            check_interval_seconds: Some(60),
            retry_attempts: 1,
            retry_backoff_ms: 200,
        }
    }
}

impl Default for SystemChecksConfig {
    fn default() -> Self {
        Self {
            cpu: Some(90.0),
            memory: Some(90.0),
            disk: Some(90.0),
            disk_path: "/".to_string(),
            critical: false,
        }
    }
}

impl CheckerConfig {
    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.global_timeout_ms)
    }

    pub fn default_check_timeout(&self) -> Duration {
        Duration::from_millis(self.default_check_timeout_ms)
    }

    pub fn check_interval(&self) -> Option<Duration> {
        self.check_interval_seconds.map(Duration::from_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::attempts(self.retry_attempts, Duration::from_millis(self.retry_backoff_ms))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            global_timeout: self.global_timeout(),
            history_size: self.history_size,
            max_age: self.max_age_seconds.map(Duration::from_secs),
            max_concurrency: self.max_concurrency,
        }
    }
}

impl AppConfig {
    /// Defaults, then the file named by `HEALTHCHECK_CONFIG` (or
    /// `health_check_config.json` if present), then `HEALTHCHECK_*` variables.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_from(Some(Path::new(&path)), true),
            Err(_) => Self::load_from(Some(Path::new(DEFAULT_CONFIG_FILE)), false),
        }
    }

    pub fn load_from(path: Option<&Path>, required: bool) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(PathBuf::from(path)).required(required));
        }

        builder = builder.add_source(
            Environment::with_prefix("HEALTHCHECK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(HealthError::Config("Server port cannot be 0".to_string()));
        }

        let health_path = &self.server.health_path;
        if !health_path.starts_with('/') || health_path.len() < 2 || health_path.ends_with('/') {
            return Err(HealthError::Config(format!(
                "Health path '{}' must start with '/' and name a sub-path, e.g. '/health'",
                health_path
            )));
        }

        if health_path == "/live" {
            return Err(HealthError::Config("Health path '/live' is reserved for liveness".to_string()));
        }

        if self.checker.global_timeout_ms == 0 {
            return Err(HealthError::Config(
                "Global timeout must be greater than 0".to_string(),
            ));
        }

        if self.checker.default_check_timeout_ms == 0 {
            return Err(HealthError::Config(
                "Default check timeout must be greater than 0".to_string(),
            ));
        }

        if self.checker.history_size == 0 {
            return Err(HealthError::Config(
                "History size must be greater than 0".to_string(),
            ));
        }

        if self.checker.max_concurrency == Some(0) {
            return Err(HealthError::Config(
                "Max concurrency must be greater than 0 when set".to_string(),
            ));
        }

        if self.checker.retry_attempts == 0 {
            return Err(HealthError::Config(
                "Retry attempts must be at least 1".to_string(),
            ));
        }

        if self.checker.check_interval_seconds == Some(0) {
            return Err(HealthError::Config(
                "Check interval must be greater than 0 when set".to_string(),
            ));
        }

        for (label, ceiling) in [
            ("cpu", self.system.cpu),
            ("memory", self.system.memory),
            ("disk", self.system.disk),
        ] {
            if let Some(ceiling) = ceiling {
                if !(ceiling > 0.0 && ceiling <= 100.0) {
                    return Err(HealthError::Config(format!(
                        "System {} ceiling must be within (0, 100], got {}",
                        label, ceiling
                    )));
                }
            }
        }

        for dependency in &self.dependencies {
            if dependency.url().trim().is_empty() {
                return Err(HealthError::Config(
                    "Dependency URL cannot be empty".to_string(),
                ));
            }
            if let DependencyEntry::Detailed(DependencyConfig { timeout_ms: Some(0), url, .. }) = dependency {
                return Err(HealthError::Config(format!(
                    "Dependency '{}' must have a positive timeout",
                    url
                )));
            }
        }

        for custom in &self.custom_checks {
            if custom.name().trim().is_empty() {
                return Err(HealthError::Config(
                    "Custom check name cannot be empty".to_string(),
                ));
            }
            if let CustomCheckEntry::Detailed(config) = custom {
                if config.timeout_ms == Some(0) {
                    return Err(HealthError::Config(format!(
                        "Custom check '{}' must have a positive timeout",
                        config.name
                    )));
                }
                if let Some(threshold) = &config.threshold {
                    Threshold::parse(threshold)?;
                }
            }
        }

        if let Some(app_server) = &self.app_server {
            if app_server.url.trim().is_empty() {
                return Err(HealthError::Config(
                    "App server URL cannot be empty".to_string(),
                ));
            }
        }

        let mut seen = HashSet::new();
        for name in self.explicit_check_names() {
            if !seen.insert(name.clone()) {
                return Err(HealthError::DuplicateName(name));
            }
        }

        Ok(())
    }

    /// Names fixed by the config itself; dependency names derived from URLs
    /// are checked when the registry is built.
    fn explicit_check_names(&self) -> Vec<String> {
        let dependency_names = self.dependencies.iter().filter_map(|entry| match entry {
            DependencyEntry::Detailed(DependencyConfig { name: Some(name), .. }) => Some(name.clone()),
            _ => None,
        });
        let custom_names = self.custom_checks.iter().map(|entry| entry.name().to_string());

        dependency_names.chain(custom_names).collect()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
