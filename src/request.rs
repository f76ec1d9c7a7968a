// Request descriptors
// Describe one backend call independently of the HTTP client that executes it

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{ApiError, Result};

/// One logical backend request
///
/// Paths may contain `{name}` placeholders that are filled from `path_params`
/// with percent-encoding. The `retried` flag is flipped by the client when it
/// re-sends the request after a token refresh and is never reset.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub path_params: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub retried: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            path_params: Vec::new(),
            query: Vec::new(),
            headers: HashMap::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter (repeated keys are kept in order)
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set the value for a `{key}` placeholder in the path
    pub fn with_path_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.path_params.retain(|(k, _)| *k != key);
        self.path_params.push((key, value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize `body` as the JSON payload
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode request body: {}", e)))?;
        Ok(self.with_body(value))
    }

    /// Path with every `{name}` placeholder substituted
    pub fn resolved_path(&self) -> Result<String> {
        let mut resolved = String::with_capacity(self.path.len());
        let mut rest = self.path.as_str();

        while let Some(start) = rest.find('{') {
            resolved.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after.find('}').ok_or_else(|| {
                ApiError::InvalidRequest(format!("Unclosed path parameter in '{}'", self.path))
            })?;
            let name = &after[..end];
            let value = self
                .path_params
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v)
                .ok_or_else(|| {
                    ApiError::InvalidRequest(format!(
                        "Missing path parameter '{}' for '{}'",
                        name, self.path
                    ))
                })?;
            resolved.push_str(&urlencoding::encode(value));
            rest = &after[end + 1..];
        }

        resolved.push_str(rest);
        Ok(resolved)
    }

    /// Absolute URL for this request against `base_url` (query excluded)
    pub fn url(&self, base_url: &str) -> Result<String> {
        Ok(build_url_with_base(base_url, &self.resolved_path()?))
    }

    /// Short "METHOD path" label for logs and events
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Join a base URL and a path with exactly one slash between them
pub fn build_url_with_base(base_url: &str, path: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let path = path.trim();

    if base.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    }
}

/// Parse an HTTP method name case-insensitively
pub fn parse_method(s: &str) -> Result<Method> {
    Method::from_bytes(s.trim().to_uppercase().as_bytes())
        .map_err(|_| ApiError::InvalidRequest(format!("Invalid HTTP method: {}", s)))
}
