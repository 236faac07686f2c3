use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ErrorDetail;

pub type AppResult<T> = Result<T, AppError>;

const GENERIC_MESSAGE: &str = "Failed to process request";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Request body exceeds the {limit_mb} MB limit")]
    PayloadTooLarge { limit_mb: usize },

    #[error("Extraction service failed: {message}")]
    UpstreamExtraction { message: String },

    #[error("Malformed model response: {reason}")]
    MalformedResponse { reason: String, raw: String },

    #[error("Webhook request failed: {message}")]
    DispatchTransport { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl AppError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidInput { .. } => "INVALID_INPUT",
            AppError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            AppError::UpstreamExtraction { .. } => "UPSTREAM_EXTRACTION_ERROR",
            AppError::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            AppError::DispatchTransport { .. } => "DISPATCH_TRANSPORT_ERROR",
            AppError::ConfigError { .. } => "CONFIG_ERROR",
            AppError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UpstreamExtraction { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::MalformedResponse { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::DispatchTransport { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ConfigError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client errors always carry their message; server errors only when verbose.
    pub fn public_message(&self, detail: ErrorDetail) -> String {
        match (detail, self) {
            (_, AppError::InvalidInput { .. })
            | (_, AppError::PayloadTooLarge { .. })
            | (ErrorDetail::Verbose, _) => self.to_string(),
            (ErrorDetail::Generic, _) => GENERIC_MESSAGE.to_string(),
        }
    }

    pub fn into_response_with(self, detail: ErrorDetail, request_id: Option<String>) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.public_message(detail);
        let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let timestamp = chrono::Utc::now().to_rfc3339();

        if let AppError::MalformedResponse { raw, .. } = &self {
            tracing::error!(
                request_id = %request_id,
                raw_response = %raw,
                "Unparseable model response"
            );
        }

        tracing::error!(
            error_code = error_code,
            status_code = %status,
            request_id = %request_id,
            error_message = %self,
            "API error occurred"
        );

        let body = Json(json!({
            "status": "error",
            "message": message,
            "code": error_code,
            "request_id": request_id,
            "timestamp": timestamp
        }));

        (status, body).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_response_with(ErrorDetail::Verbose, None)
    }
}

/// An [`AppError`] paired with the configured response verbosity and the request it belongs to.
pub struct ApiError {
    pub error: AppError,
    pub detail: ErrorDetail,
    pub request_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.error.into_response_with(self.detail, self.request_id)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<base64::DecodeError> for AppError {
    fn from(err: base64::DecodeError) -> Self {
        AppError::InvalidInput {
            message: format!("base64pdf is not valid base64: {}", err),
        }
    }
}

impl AppError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        AppError::InvalidInput {
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        AppError::UpstreamExtraction {
            message: message.into(),
        }
    }

    pub fn dispatch(message: impl Into<String>) -> Self {
        AppError::DispatchTransport {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        AppError::ConfigError {
            message: message.into(),
        }
    }
}
