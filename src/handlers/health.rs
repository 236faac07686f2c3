use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
};
use serde_json::{json, Value};
use tracing::info;

use crate::error::AppResult;
use super::AppState;

/// Liveness probe.
pub async fn root_handler() -> &'static str {
    "IMEI relay backend is alive"
}

/// Health check endpoint
pub async fn health_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    info!("Health check requested");

    let config = &state.config;
    let response = json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
        "version": env!("CARGO_PKG_VERSION"),
        "config": {
            "model": config.gemini_model,
            "model_max_retries": config.gemini_max_retries,
            "dispatch_concurrency": config.dispatch_concurrency,
            "manual_entry_policy": config.manual_entry_policy.to_string(),
        }
    });

    Ok(Json(response))
}

/// Readiness check endpoint
///
/// Startup refuses to serve without a model key and webhook URL, so a running
/// process is ready.
pub async fn ready_handler() -> StatusCode {
    info!("Readiness check passed");
    StatusCode::OK
}
