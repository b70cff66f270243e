//! Error types for check registration, execution and the HTTP surface

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HealthError>;

#[derive(Error, Debug)]
pub enum HealthError {
    #[error("Check '{0}' is already registered")]
    DuplicateName(String),

    #[error("Invalid check definition: {0}")]
    Config(String),

    #[error("Check '{0}' not found")]
    NotFound(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    #[error("Run exceeded global timeout of {0:?} with checks still outstanding")]
    GlobalTimeout(Duration),

    #[error("Configuration error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HealthError {
    /// Structural misuse of the registration API, as opposed to a check failing.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            HealthError::DuplicateName(_) | HealthError::Config(_) | HealthError::Settings(_)
        )
    }
}

impl IntoResponse for HealthError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            HealthError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            HealthError::DuplicateName(_) | HealthError::Config(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            HealthError::Settings(err) => {
                tracing::error!("Configuration error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error".to_string())
            }
            HealthError::IoError(err) => {
                tracing::error!("IO error: {:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            HealthError::JsonError(err) => {
                tracing::error!("JSON error: {:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Serialization error".to_string())
            }
            other => {
                tracing::error!("Unexpected error: {}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
