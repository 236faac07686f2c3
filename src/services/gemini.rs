use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// A generative model that can read a PDF and answer in text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Sends `instruction` together with the base64 PDF and returns the model's text answer.
    async fn extract_text(&self, instruction: &str, pdf_base64: &str) -> AppResult<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl GenerateResponse {
    /// Text parts of the first candidate, joined.
    fn first_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Failure of a single attempt, tagged with whether another attempt could help.
#[derive(Debug)]
struct AttemptError {
    error: AppError,
    transient: bool,
}

impl AttemptError {
    fn transient(error: AppError) -> Self {
        Self { error, transient: true }
    }

    fn fatal(error: AppError) -> Self {
        Self { error, transient: false }
    }
}

pub struct GeminiClient {
    client: Client,
    endpoint: String,
    api_key: String,
    max_retries: usize,
}

impl GeminiClient {
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| AppError::config(format!("Failed to build model HTTP client: {}", e)))?;

        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            config.gemini_base_url.trim_end_matches('/'),
            config.gemini_model
        );
        info!(endpoint = %endpoint, max_retries = config.gemini_max_retries, "Gemini client ready");

        Ok(Self {
            client,
            endpoint,
            api_key: config.gemini_api_key.clone(),
            max_retries: config.gemini_max_retries,
        })
    }

    async fn generate_once(&self, body: &GenerateRequest<'_>) -> Result<String, AttemptError> {
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            // reqwest errors can embed the URL, which carries the key
            .map_err(|e| {
                AttemptError::transient(AppError::upstream(format!(
                    "model request failed: {}",
                    e.without_url()
                )))
            })?;

        let status = response.status();
        let body_text = response.text().await.map_err(|e| {
            AttemptError::transient(AppError::upstream(format!(
                "failed to read model response: {}",
                e.without_url()
            )))
        })?;

        if !status.is_success() {
            let detail = serde_json::from_str::<GenerateResponse>(&body_text)
                .ok()
                .and_then(|p| p.error)
                .map(|e| e.message)
                .unwrap_or_else(|| "no error detail".to_string());
            let error = AppError::upstream(format!("model returned {}: {}", status, detail));
            return Err(if is_transient_status(status) {
                AttemptError::transient(error)
            } else {
                AttemptError::fatal(error)
            });
        }

        let payload: GenerateResponse = serde_json::from_str(&body_text).map_err(|e| {
            AttemptError::fatal(AppError::upstream(format!(
                "model returned an unreadable payload: {}",
                e
            )))
        })?;

        payload
            .first_text()
            .ok_or_else(|| AttemptError::fatal(AppError::upstream("No valid response from model")))
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn extract_text(&self, instruction: &str, pdf_base64: &str) -> AppResult<String> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: instruction },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "application/pdf",
                            data: pdf_base64,
                        },
                    },
                ],
            }],
        };

        debug!(payload_bytes = pdf_base64.len(), "Sending document to model");

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(8))
            .with_max_times(self.max_retries)
            .with_jitter();

        let text = (|| async { self.generate_once(&body).await })
            .retry(backoff)
            .when(|e: &AttemptError| e.transient)
            .notify(|e: &AttemptError, delay: Duration| {
                warn!(error = %e.error, retry_in_ms = delay.as_millis() as u64, "Model call failed, retrying");
            })
            .await
            .map_err(|e| e.error)?;

        info!(response_chars = text.len(), "Model answered");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: "extract" },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "application/pdf",
                            data: "JVBERi0=",
                        },
                    },
                ],
            }],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["text"], "extract");
        assert_eq!(
            value["contents"][0]["parts"][1]["inline_data"]["mime_type"],
            "application/pdf"
        );
        assert_eq!(value["contents"][0]["parts"][1]["inline_data"]["data"], "JVBERi0=");
    }

    #[test]
    fn test_first_text_joins_parts() {
        let payload: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"[{\"a\":"},{"text":"1}]"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(payload.first_text().as_deref(), Some(r#"[{"a":1}]"#));
    }

    #[test]
    fn test_first_text_missing_candidates() {
        let payload: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(payload.first_text().is_none());

        let payload: GenerateResponse =
            serde_json::from_str(r#"{"error":{"code":400,"message":"API key not valid"}}"#).unwrap();
        assert_eq!(payload.error.as_ref().map(|e| e.message.as_str()), Some("API key not valid"));
        assert!(payload.first_text().is_none());
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
    }
}
