use std::env;
use std::fmt;
use std::str::FromStr;
use anyhow::{Result, Context};
use tracing::{info, warn};

pub const DEFAULT_MANUAL_LABEL: &str = "Manual Entry";
pub const MAX_BODY_SIZE_LIMIT_MB: usize = 1024;

/// How bare identifier strings in a manual list are treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualEntryPolicy {
    /// Pair the identifier with a fixed display name.
    Label(String),
    /// Demand `{imei, name}` objects.
    Reject,
}

/// Whether error responses carry the internal error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDetail {
    Verbose,
    Generic,
}

impl FromStr for ErrorDetail {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "verbose" => Ok(ErrorDetail::Verbose),
            "generic" => Ok(ErrorDetail::Generic),
            other => Err(format!("unknown error detail level '{}'", other)),
        }
    }
}

impl fmt::Display for ManualEntryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManualEntryPolicy::Label(label) => write!(f, "label({})", label),
            ManualEntryPolicy::Reject => write!(f, "reject"),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub max_body_size_mb: usize,
    pub request_timeout_seconds: u64,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub gemini_max_retries: usize,
    pub webhook_url: String,
    pub dispatch_concurrency: usize,
    pub manual_entry_policy: ManualEntryPolicy,
    pub error_detail: ErrorDetail,
}

// The API key must never reach the logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server_host", &self.server_host)
            .field("server_port", &self.server_port)
            .field("max_body_size_mb", &self.max_body_size_mb)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .field("gemini_api_key", &"<redacted>")
            .field("gemini_model", &self.gemini_model)
            .field("gemini_base_url", &self.gemini_base_url)
            .field("gemini_max_retries", &self.gemini_max_retries)
            .field("webhook_url", &self.webhook_url)
            .field("dispatch_concurrency", &self.dispatch_concurrency)
            .field("manual_entry_policy", &self.manual_entry_policy)
            .field("error_detail", &self.error_detail)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        info!("Loading configuration from environment variables");

        // PORT takes precedence over SERVER_PORT (hosting platform convention)
        let port_var = if env::var("PORT").is_ok() { "PORT" } else { "SERVER_PORT" };

        let config = Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| {
                info!("SERVER_HOST not set, using default: 0.0.0.0");
                "0.0.0.0".to_string()
            }),
            server_port: Self::parse_env_var(port_var, 3000)
                .context("Failed to parse server port")?,
            max_body_size_mb: Self::parse_env_var("MAX_BODY_SIZE_MB", 10)
                .context("Failed to parse MAX_BODY_SIZE_MB")?,
            request_timeout_seconds: Self::parse_env_var("REQUEST_TIMEOUT_SECONDS", 60)
                .context("Failed to parse REQUEST_TIMEOUT_SECONDS")?,
            gemini_api_key: Self::required_env_var("GEMINI_API_KEY")?,
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-1.5-pro".to_string()),
            gemini_base_url: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string()),
            gemini_max_retries: Self::parse_env_var("GEMINI_MAX_RETRIES", 0)
                .context("Failed to parse GEMINI_MAX_RETRIES")?,
            webhook_url: Self::required_env_var("GOOGLE_SCRIPT_WEBHOOK_URL")?,
            dispatch_concurrency: Self::parse_env_var("DISPATCH_CONCURRENCY", 4)
                .context("Failed to parse DISPATCH_CONCURRENCY")?,
            manual_entry_policy: Self::manual_entry_policy_from_env()?,
            error_detail: match env::var("ERROR_DETAIL") {
                Ok(val) => val.parse().map_err(|e: String| anyhow::anyhow!(e))?,
                Err(_) => ErrorDetail::Verbose,
            },
        };

        config.validate()?;

        info!("Configuration loaded successfully: {:?}", config);
        Ok(config)
    }

    fn parse_env_var<T>(var_name: &str, default: T) -> Result<T>
    where
        T: FromStr + Copy + fmt::Debug,
        T::Err: fmt::Display,
    {
        match env::var(var_name) {
            Ok(val) => match val.trim().parse() {
                Ok(parsed) => Ok(parsed),
                Err(e) => {
                    warn!("Failed to parse {}: {} (using default: {:?})", var_name, e, default);
                    Ok(default)
                }
            },
            Err(_) => {
                info!("{} not set, using default: {:?}", var_name, default);
                Ok(default)
            }
        }
    }

    fn required_env_var(var_name: &str) -> Result<String> {
        env::var(var_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow::anyhow!("{} must be set", var_name))
    }

    fn manual_entry_policy_from_env() -> Result<ManualEntryPolicy> {
        let policy = env::var("MANUAL_ENTRY_POLICY").unwrap_or_else(|_| "label".to_string());
        match policy.trim().to_ascii_lowercase().as_str() {
            "label" => {
                let label = env::var("MANUAL_ENTRY_LABEL")
                    .ok()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| DEFAULT_MANUAL_LABEL.to_string());
                Ok(ManualEntryPolicy::Label(label))
            }
            "reject" => Ok(ManualEntryPolicy::Reject),
            other => Err(anyhow::anyhow!(
                "MANUAL_ENTRY_POLICY must be 'label' or 'reject', got '{}'",
                other
            )),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.server_port == 0 {
            return Err(anyhow::anyhow!("server port must be greater than 0"));
        }
        if self.max_body_size_mb == 0 || self.max_body_size_mb > MAX_BODY_SIZE_LIMIT_MB {
            return Err(anyhow::anyhow!(
                "MAX_BODY_SIZE_MB must be between 1 and {}",
                MAX_BODY_SIZE_LIMIT_MB
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("REQUEST_TIMEOUT_SECONDS must be greater than 0"));
        }
        if self.dispatch_concurrency == 0 {
            return Err(anyhow::anyhow!("DISPATCH_CONCURRENCY must be greater than 0"));
        }
        if !self.webhook_url.starts_with("http://") && !self.webhook_url.starts_with("https://") {
            return Err(anyhow::anyhow!("GOOGLE_SCRIPT_WEBHOOK_URL must be an http(s) URL"));
        }
        Ok(())
    }
}
