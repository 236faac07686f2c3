use serde::{Deserialize, Serialize};

use super::DispatchResult;

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignResponse {
    pub status: String,
    pub results: Vec<DispatchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<usize>,
}

impl AssignResponse {
    /// `success` only when every pair reached the webhook, otherwise `partial`.
    pub fn from_results(results: Vec<DispatchResult>) -> Self {
        let failed = results.iter().filter(|r| !r.delivered).count();
        if failed == 0 {
            Self {
                status: "success".to_string(),
                results,
                failed: None,
            }
        } else {
            Self {
                status: "partial".to_string(),
                results,
                failed: Some(failed),
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }
}
