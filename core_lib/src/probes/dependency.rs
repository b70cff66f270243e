//! Probes for external services: HTTP endpoints and TCP-reachable backends

use crate::config::{AppServerConfig, CheckerConfig, DependencyConfig};
use crate::error::{HealthError, Result};
use crate::health::{AsyncProbe, CheckCategory, CheckSpec, Probe, ProbeContext, ProbeOutput};
use async_trait::async_trait;
use reqwest::Url;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Where a dependency lives and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Http(Url),
    Tcp { host: String, port: u16 },
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "postgres" | "postgresql" => Some(5432),
        "redis" | "rediss" => Some(6379),
        "mysql" | "mariadb" => Some(3306),
        "mongodb" => Some(27017),
        "amqp" | "amqps" => Some(5672),
        _ => None,
    }
}

impl Target {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|e| HealthError::Config(format!("Invalid dependency URL '{}': {}", raw, e)))?;

        match url.scheme() {
            "http" | "https" => Ok(Target::Http(url)),
            scheme => {
                let host = url
                    .host_str()
                    .filter(|host| !host.is_empty())
                    .ok_or_else(|| HealthError::Config(format!("Dependency URL '{}' has no host", raw)))?
                    .to_string();
                let port = url.port().or_else(|| default_port(scheme)).ok_or_else(|| {
                    HealthError::Config(format!(
                        "Dependency URL '{}' needs an explicit port for scheme '{}'",
                        raw, scheme
                    ))
                })?;
                Ok(Target::Tcp { host, port })
            }
        }
    }

    /// `<scheme>_<host>`, e.g. `postgres_db.internal`.
    pub fn default_name(raw: &str) -> Result<String> {
        let url = Url::parse(raw.trim())
            .map_err(|e| HealthError::Config(format!("Invalid dependency URL '{}': {}", raw, e)))?;
        let host = url.host_str().unwrap_or("unknown");
        Ok(format!("{}_{}", url.scheme(), host))
    }
}

pub struct HttpProbe {
    client: reqwest::Client,
    url: Url,
}

impl HttpProbe {
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HealthError::Other(e.into()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl AsyncProbe for HttpProbe {
    async fn probe(&self, ctx: &ProbeContext) -> anyhow::Result<ProbeOutput> {
        let start = Instant::now();
        let response = self.client.get(self.url.clone()).send().await?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let status = response.status();

        let value = serde_json::json!({
            "status_code": status.as_u16(),
            "response_time_ms": (elapsed_ms * 100.0).round() / 100.0,
        });

        if status.as_u16() >= 400 {
            warn!("Check '{}': {} answered {}", ctx.name, self.url, status);
            Ok(ProbeOutput::unhealthy(format!("Unhealthy response from {}: {}", self.url, status)).with_value(value))
        } else {
            debug!("Check '{}': {} answered {} in {:.2}ms", ctx.name, self.url, status, elapsed_ms);
            Ok(ProbeOutput::healthy(format!("{} reachable ({})", self.url, status)).with_value(value))
        }
    }
}

pub struct TcpProbe {
    host: String,
    port: u16,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl AsyncProbe for TcpProbe {
    async fn probe(&self, ctx: &ProbeContext) -> anyhow::Result<ProbeOutput> {
        let start = Instant::now();
        let stream = tokio::select! {
            _ = ctx.cancel.cancelled() => anyhow::bail!("connection to {}:{} cancelled", self.host, self.port),
            stream = TcpStream::connect((self.host.as_str(), self.port)) => stream,
        };
        stream.map_err(|e| anyhow::anyhow!("cannot connect to {}:{}: {}", self.host, self.port, e))?;

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        Ok(ProbeOutput::healthy(format!("{}:{} accepting connections", self.host, self.port))
            .with_value(serde_json::json!({ "response_time_ms": (elapsed_ms * 100.0).round() / 100.0 })))
    }
}

pub fn target_probe(target: &Target, timeout: Duration) -> Result<Probe> {
    match target {
        Target::Http(url) => Ok(Probe::from_async(HttpProbe::new(url.clone(), timeout)?)),
        Target::Tcp { host, port } => Ok(Probe::from_async(TcpProbe::new(host.clone(), *port))),
    }
}

pub fn dependency_spec(dependency: &DependencyConfig, checker: &CheckerConfig) -> Result<CheckSpec> {
    let target = Target::parse(&dependency.url)?;
    let name = match &dependency.name {
        Some(name) => name.clone(),
        None => Target::default_name(&dependency.url)?,
    };
    let timeout = dependency
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| checker.default_check_timeout());

    let spec = CheckSpec::new(name, target_probe(&target, timeout)?)
        .with_timeout(timeout)
        .critical(dependency.critical)
        .with_retry(checker.retry_policy())
        .in_category(CheckCategory::Dependency);

    Ok(match checker.check_interval() {
        Some(interval) => spec.every(interval),
        None => spec,
    })
}

/// The monitored application's own health endpoint, always critical.
pub fn app_server_spec(app_server: &AppServerConfig, checker: &CheckerConfig) -> Result<CheckSpec> {
    dependency_spec(
        &DependencyConfig {
            name: Some("app_server".to_string()),
            url: app_server.endpoint(),
            timeout_ms: None,
            critical: true,
        },
        checker,
    )
}
