use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use std::time::Instant;
use tracing::{info, error};

use crate::error::{ApiError, AppError};
use crate::middleware::REQUEST_ID_HEADER;
use crate::models::{AssignRequest, AssignResponse};
use crate::services::{parse_destinations, ExtractionInput};
use super::AppState;

/// Extracts `(name, IMEI)` pairs from a PDF or a manual list and records each
/// one in every requested sheet.
pub async fn extract_and_assign_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<Json<AssignResponse>, ApiError> {
    let start = Instant::now();
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let log_id = request_id.as_deref().unwrap_or("-");
    let fail = |error: AppError| ApiError {
        error,
        detail: state.config.error_detail,
        request_id: request_id.clone(),
    };

    let request = match payload {
        Ok(Json(request)) => request,
        Err(JsonRejection::BytesRejection(e)) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return Err(fail(AppError::PayloadTooLarge {
                limit_mb: state.config.max_body_size_mb,
            }));
        }
        Err(e) => {
            return Err(fail(AppError::invalid_input(format!(
                "Invalid request body: {}",
                e.body_text()
            ))));
        }
    };

    // Reject bad input before any outbound call.
    let input = ExtractionInput::from_request(&request).map_err(fail)?;
    let destinations = parse_destinations(request.sheet_name.as_deref());
    let overwrite = request.overwrite.unwrap_or(false);
    let source = match &input {
        ExtractionInput::Document(_) => "pdf",
        ExtractionInput::Manual(_) => "manual",
    };

    info!(
        request_id = %log_id,
        source,
        destinations = destinations.len(),
        overwrite,
        "Starting extract-and-assign request"
    );

    let records = match state.extractor.extract(input).await {
        Ok(records) => records,
        Err(e) => {
            error!(request_id = %log_id, error = %e, "Extraction failed");
            return Err(fail(e));
        }
    };

    let results = state
        .dispatcher
        .dispatch(&records, &destinations, overwrite)
        .await;
    let response = AssignResponse::from_results(results);

    info!(
        request_id = %log_id,
        records = records.len(),
        writes = response.results.len(),
        failed = response.failed.unwrap_or(0),
        total_time_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );

    Ok(Json(response))
}
