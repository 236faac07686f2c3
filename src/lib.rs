//! IMEI relay service
//!
//! Reads `(name, IMEI)` pairs out of PDFs with a generative model, or takes
//! them from a manual list, and records each pair in one or more spreadsheets
//! through a webhook.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use handlers::{create_router, AppState};
