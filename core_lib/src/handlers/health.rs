//! Health report handlers

use crate::{
    error::Result,
    health::{CheckCategory, HealthReport},
    models::request::ApiResponse,
    AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{info, warn};

/// 200 when the report is ok, 503 otherwise. Failing checks are the
/// monitored condition, so they never turn into a 5xx of their own.
fn report_response(report: HealthReport) -> Response {
    let status_code = if report.ok {
        StatusCode::OK
    } else {
        warn!("Health report failing: {}", report.summary);
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(report)).into_response()
}

pub async fn handle_health(State(state): State<AppState>) -> Response {
    let report = if state.config.server.run_on_request {
        info!("Running all health checks on request");
        state.engine.run_all(state.engine.global_timeout()).await
    } else {
        state.engine.report()
    };

    report_response(report)
}

fn category_response(state: &AppState, category: CheckCategory) -> Response {
    info!("Reporting cached {} checks", category);
    report_response(state.engine.report_for(category))
}

pub async fn handle_system_health(State(state): State<AppState>) -> Response {
    category_response(&state, CheckCategory::System)
}

pub async fn handle_dependencies_health(State(state): State<AppState>) -> Response {
    category_response(&state, CheckCategory::Dependency)
}

pub async fn handle_custom_health(State(state): State<AppState>) -> Response {
    category_response(&state, CheckCategory::Custom)
}

pub async fn handle_pages_health(State(state): State<AppState>) -> Response {
    category_response(&state, CheckCategory::Page)
}

pub async fn handle_check(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    let response = match state.engine.latest(&name)? {
        Some(result) => ApiResponse::success(result),
        None => ApiResponse::empty(format!("Check '{}' has not run yet", name)),
    };
    Ok(Json(response))
}

pub async fn handle_check_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    let history = state.engine.history(&name)?;
    Ok(Json(ApiResponse::success(history)))
}

pub async fn handle_liveness() -> impl IntoResponse {
    Json(ApiResponse::success(serde_json::json!({
        "status": "alive",
        "timestamp": chrono::Utc::now().timestamp()
    })))
}
