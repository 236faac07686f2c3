use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Body of one spreadsheet write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetWrite {
    pub imei: String,
    pub name: String,
    /// Empty string selects the webhook's default sheet.
    pub sheet_name: String,
    pub overwrite: bool,
}

/// Remote endpoint that records rows in a spreadsheet.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SheetWebhook: Send + Sync {
    /// Returns the endpoint's reply text verbatim.
    async fn submit(&self, write: &SheetWrite) -> AppResult<String>;
}

/// Google Apps Script web app receiving JSON posts.
pub struct AppsScriptWebhook {
    client: Client,
    url: String,
}

impl AppsScriptWebhook {
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| AppError::config(format!("Failed to build webhook HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.webhook_url.clone(),
        })
    }
}

#[async_trait]
impl SheetWebhook for AppsScriptWebhook {
    async fn submit(&self, write: &SheetWrite) -> AppResult<String> {
        let response = self
            .client
            .post(&self.url)
            .json(write)
            .send()
            .await
            .map_err(|e| AppError::dispatch(e.without_url().to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::dispatch(format!("failed to read webhook reply: {}", e.without_url())))?;

        // The reply is opaque; a non-2xx status is reported but not interpreted.
        if !status.is_success() {
            warn!(
                imei = %write.imei,
                sheet_name = %write.sheet_name,
                status = %status,
                "Webhook answered with non-success status"
            );
        } else {
            debug!(imei = %write.imei, sheet_name = %write.sheet_name, "Webhook accepted write");
        }

        Ok(text)
    }
}
