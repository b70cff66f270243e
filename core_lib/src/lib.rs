//! Core library: check engine, built-in probes, configuration and the HTTP
//! health surface.

pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod models;
pub mod probes;

pub use config::AppConfig;
pub use error::{HealthError, Result};
pub use handlers::routes::create_routes;
pub use health::{
    CheckCategory, CheckResult, CheckSpec, CheckStatus, CheckerEngine, EngineSettings, HealthReport, HealthStatus,
    Probe, ProbeContext, ProbeOutput, Registry, RetryPolicy, Threshold,
};
pub use middleware::cors::{cors_layer, cors_layer_permissive};
pub use middleware::logging::logging_layer;
pub use probes::{HookRegistry, PageErrorTracker, SystemMonitor};

use axum::Router;
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub app_name: String,
    pub version: String,
    pub engine: CheckerEngine,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(engine: CheckerEngine, config: AppConfig) -> Self {
        Self {
            app_name: "Health Check Server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            engine,
            config: Arc::new(config),
        }
    }
}

/// Builds an engine holding every check the config describes. Any invalid or
/// duplicate check fails the whole build.
pub fn build_engine(
    config: &AppConfig,
    hooks: &HookRegistry,
    monitor: &Arc<SystemMonitor>,
    pages: Option<&PageErrorTracker>,
) -> Result<CheckerEngine> {
    let engine = CheckerEngine::new(Registry::new(), config.checker.engine_settings());

    for spec in probes::build_specs(config, hooks, monitor, pages)? {
        engine.register_strict(spec)?;
    }

    info!("Registered checks: {}", engine.registry().names().join(", "));
    Ok(engine)
}

pub fn create_app(state: AppState) -> Router {
    let mut router = Router::new().merge(create_routes(&state.config.server.health_path));

    router = if state.config.server.cors_permissive {
        router.layer(cors_layer_permissive())
    } else {
        router.layer(cors_layer())
    };

    router = router.layer(logging_layer());

    router.with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<()> {
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
