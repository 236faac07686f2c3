pub mod assign;
pub mod health;

pub use assign::*;
pub use health::*;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::error::AppResult;
use crate::middleware::logging_middleware;
use crate::services::{
    AppsScriptWebhook, Dispatcher, Extractor, GeminiClient, LanguageModel, SheetWebhook,
};

/// Per-process state shared by every request. Nothing in it is mutated after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub extractor: Arc<Extractor>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(
        config: Config,
        model: Arc<dyn LanguageModel>,
        webhook: Arc<dyn SheetWebhook>,
    ) -> Self {
        let extractor = Extractor::new(model, config.manual_entry_policy.clone());
        let dispatcher = Dispatcher::new(webhook, config.dispatch_concurrency);
        Self {
            config: Arc::new(config),
            extractor: Arc::new(extractor),
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Wires the live Gemini and Apps Script clients.
    pub fn from_config(config: Config) -> AppResult<Self> {
        let model = Arc::new(GeminiClient::new(&config)?);
        let webhook = Arc::new(AppsScriptWebhook::new(&config)?);
        Ok(Self::new(config, model, webhook))
    }
}

pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.max_body_size_mb.saturating_mul(1024 * 1024);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/extract-and-assign", post(extract_and_assign_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit))
                .layer(axum::middleware::from_fn(logging_middleware)),
        )
        .with_state(state)
}
