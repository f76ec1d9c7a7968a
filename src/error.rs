// Error handling module
// Defines the client error type and the backend's JSON error contract

use serde_json::Value;
use thiserror::Error;

/// Application error code the backend sends for policy-blocked accounts
pub const SUSPENDED_CODE: &str = "SUSPENDED";

/// JSON error body returned by the backend on failed requests
///
/// Fields are read leniently: a non-string `message` or `suspendFeedback`
/// is kept as its JSON text rather than discarding the whole body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
    pub suspend_reason: Option<String>,
    pub suspend_feedback: Option<String>,
}

impl ErrorBody {
    /// Parse an error body, returning `None` unless the payload is a JSON object
    pub fn parse(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        let fields = value.as_object()?;

        Some(Self {
            code: fields.get("code").and_then(Value::as_str).map(str::to_string),
            message: fields.get("message").and_then(field_text),
            suspend_reason: fields.get("suspendReason").and_then(field_text),
            suspend_feedback: fields.get("suspendFeedback").and_then(field_text),
        })
    }

    /// True when the body carries the account-suspended code
    pub fn is_suspended(&self) -> bool {
        self.code.as_deref() == Some(SUSPENDED_CODE)
    }
}

/// Errors surfaced by the API client
#[derive(Error, Debug)]
pub enum ApiError {
    /// Backend answered with a non-success status
    #[error("HTTP {status}: {}", display_message(.body, .details))]
    Http {
        status: u16,
        body: String,
        details: Option<ErrorBody>,
    },

    /// Request never produced a response (connect, timeout, body errors)
    #[error("Network error: {0}")]
    Network(String),

    /// Forced token refresh failed while recovering from a 401
    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    /// Request could not be built (bad path parameters, bad URL, body encoding)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Success response body did not match the expected shape
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Build an HTTP error from a status and raw body text
    pub fn http(status: u16, body: String) -> Self {
        let details = ErrorBody::parse(&body);
        ApiError::Http {
            status,
            body,
            details,
        }
    }

    /// HTTP status of the failure, if the backend responded
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Parsed backend error body, if any
    pub fn error_body(&self) -> Option<&ErrorBody> {
        match self {
            ApiError::Http { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// 403 carrying the account-suspended code
    pub fn is_suspended(&self) -> bool {
        self.status() == Some(403) && self.error_body().is_some_and(ErrorBody::is_suspended)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            "timeout"
        } else if e.is_connect() {
            "connection_failed"
        } else if e.is_builder() {
            return ApiError::InvalidRequest(e.to_string());
        } else if e.is_body() {
            "body_error"
        } else if e.is_decode() {
            return ApiError::Decode(e.to_string());
        } else {
            "request_error"
        };
        ApiError::Network(format!("{} (kind: {})", e, kind))
    }
}

fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn display_message(body: &str, details: &Option<ErrorBody>) -> String {
    match details.as_ref().and_then(|d| d.message.clone()) {
        Some(message) => message,
        None if body.trim().is_empty() => "Request failed.".to_string(),
        None => body.trim().chars().take(MAX_ERROR_CHARS).collect(),
    }
}

/// Maximum number of raw body characters shown in error messages
const MAX_ERROR_CHARS: usize = 200;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ApiError>;
