//! Route table for the health surface

use super::health::{
    handle_check, handle_check_history, handle_custom_health, handle_dependencies_health, handle_health,
    handle_liveness, handle_pages_health, handle_system_health,
};
use crate::{models::request::ApiResponse, AppState};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};

/// Mounts the report endpoints under `health_path` (e.g. `/health`).
pub fn create_routes(health_path: &str) -> Router<AppState> {
    let base = health_path.trim_end_matches('/');

    Router::new()
        .route("/", get(handle_root))
        .route("/live", get(handle_liveness))
        .route(base, get(handle_health))
        .route(&format!("{}/system", base), get(handle_system_health))
        .route(&format!("{}/dependencies", base), get(handle_dependencies_health))
        .route(&format!("{}/custom", base), get(handle_custom_health))
        .route(&format!("{}/pages", base), get(handle_pages_health))
        .route(&format!("{}/checks/:name", base), get(handle_check))
        .route(&format!("{}/checks/:name/history", base), get(handle_check_history))
}

async fn handle_root(State(state): State<AppState>) -> impl IntoResponse {
    let base = state.config.server.health_path.trim_end_matches('/').to_string();

    Json(ApiResponse::success(serde_json::json!({
        "app": state.app_name,
        "version": state.version,
        "checks": state.engine.registry().names(),
        "endpoints": {
            "health": base,
            "system": format!("{}/system", base),
            "dependencies": format!("{}/dependencies", base),
            "custom": format!("{}/custom", base),
            "pages": format!("{}/pages", base),
            "check": format!("{}/checks/{{name}}", base),
            "history": format!("{}/checks/{{name}}/history", base),
            "live": "/live"
        }
    })))
}
