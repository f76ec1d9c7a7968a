use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::TokenEndpoint;
use crate::http_client::{ClientSettings, DEFAULT_BASE_URL};
use crate::wait::BoundedPoll;

/// Garments Client - authenticated requests against the garments backend
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE)
    pub method: String,

    /// Request path, may contain {name} placeholders
    pub path: String,

    /// Query parameter as key=value (repeatable)
    #[arg(short = 'q', long = "query", value_parser = parse_key_value)]
    pub query: Vec<(String, String)>,

    /// Path parameter as key=value (repeatable)
    #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,

    /// JSON request body
    #[arg(short = 'd', long = "data")]
    pub data: Option<String>,

    /// Backend API base URL
    #[arg(short = 'b', long, env = "API_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Secure-token endpoint used to refresh id tokens
    #[arg(
        long,
        env = "IDENTITY_TOKEN_URL",
        default_value = "https://securetoken.googleapis.com/v1/token"
    )]
    pub token_endpoint: String,

    /// API key appended to token refresh requests
    #[arg(long, env = "IDENTITY_API_KEY")]
    pub identity_api_key: Option<String>,

    /// Path to the signed-in user's credentials file
    #[arg(short = 'c', long, env = "CREDENTIALS_FILE")]
    pub credentials: Option<String>,

    /// Login entry point used when the session ends
    #[arg(long, env = "LOGIN_PATH", default_value = "/login")]
    pub login_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Backend
    pub base_url: String,
    pub login_path: String,

    // Identity
    pub token_endpoint: String,
    pub identity_api_key: Option<String>,
    pub credentials_file: Option<PathBuf>,
    pub token_refresh_threshold: u64,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Auth flow timing
    pub principal_poll_attempts: u32,
    pub principal_poll_interval_ms: u64,
    pub retry_settle_delay_ms: u64,
    pub retry_grace_delay_ms: u64,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, CliArgs)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let config = Self::from_args(&args);
        Ok((config, args))
    }

    /// Build configuration from parsed arguments plus env-only settings
    pub fn from_args(args: &CliArgs) -> Self {
        Config {
            base_url: args.base_url.clone(),
            login_path: args.login_path.clone(),

            token_endpoint: args.token_endpoint.clone(),
            identity_api_key: args.identity_api_key.clone().filter(|k| !k.is_empty()),
            credentials_file: args.credentials.as_deref().map(expand_tilde),
            token_refresh_threshold: env_or("TOKEN_REFRESH_THRESHOLD", 300),

            http_connect_timeout: env_or("HTTP_CONNECT_TIMEOUT", 10),
            http_request_timeout: args.http_timeout,

            principal_poll_attempts: env_or("PRINCIPAL_POLL_ATTEMPTS", 10),
            principal_poll_interval_ms: env_or("PRINCIPAL_POLL_INTERVAL_MS", 100),
            retry_settle_delay_ms: env_or("RETRY_SETTLE_DELAY_MS", 100),
            retry_grace_delay_ms: env_or("RETRY_GRACE_DELAY_MS", 500),

            log_level: args.log_level.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("API_BASE_URL is not a valid URL: {}", self.base_url))?;

        reqwest::Url::parse(&self.token_endpoint).with_context(|| {
            format!(
                "IDENTITY_TOKEN_URL is not a valid URL: {}",
                self.token_endpoint
            )
        })?;

        if !self.login_path.starts_with('/') {
            anyhow::bail!("LOGIN_PATH must start with '/': {}", self.login_path);
        }

        if let Some(path) = &self.credentials_file {
            if !path.exists() {
                anyhow::bail!("CREDENTIALS_FILE does not exist: {}", path.display());
            }
        }

        Ok(())
    }

    /// Settings for the authenticated client
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.base_url.clone(),
            connect_timeout: Duration::from_secs(self.http_connect_timeout),
            request_timeout: Duration::from_secs(self.http_request_timeout),
            principal_poll: BoundedPoll::new(
                self.principal_poll_attempts,
                Duration::from_millis(self.principal_poll_interval_ms),
            ),
            retry_settle_delay: Duration::from_millis(self.retry_settle_delay_ms),
            retry_grace_delay: Duration::from_millis(self.retry_grace_delay_ms),
        }
    }

    pub fn token_endpoint(&self) -> TokenEndpoint {
        TokenEndpoint {
            url: self.token_endpoint.clone(),
            api_key: self.identity_api_key.clone(),
        }
    }
}

/// Read a numeric env var, falling back on absence or parse failure
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse a `key=value` argument
fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
