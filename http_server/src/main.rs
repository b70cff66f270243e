//! Main entry point for the health check server binary

use anyhow::Result;
use healthcheck_core::{build_engine, create_app, run_server, AppConfig, AppState, HookRegistry, SystemMonitor};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::load().map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    info!("Configuration loaded successfully");
    info!("Server will bind to: {}", config.bind_address());

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address: {}", e))?;

    let monitor = Arc::new(SystemMonitor::new());
    let hooks = HookRegistry::with_builtins(Arc::clone(&monitor));

    let engine = build_engine(&config, &hooks, &monitor, None)
        .map_err(|e| anyhow::anyhow!("Invalid check configuration: {}", e))?;

    engine.start_scheduler();

    let warmup = engine.clone();
    tokio::spawn(async move {
        let report = warmup.run_all(warmup.global_timeout()).await;
        info!("Initial health run: {}", report.summary);
    });

    let state = AppState::new(engine.clone(), config);
    info!("App: {} v{}", state.app_name, state.version);

    let app = create_app(state);

    let served = run_server(app, addr).await;
    engine.shutdown();
    served?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let default_level = if cfg!(debug_assertions) { "debug" } else { "info" };

        format!(
            "{}={},healthcheck_core={},tower_http=info",
            env!("CARGO_CRATE_NAME").replace('-', "_"),
            default_level,
            default_level
        )
        .into()
    });

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let is_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    if is_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.pretty())
            .init();
    }
}
