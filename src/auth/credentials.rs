// Credential loading from a JSON credentials file

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;

use super::types::Credentials;

/// On-disk credentials layout
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsFile {
    uid: Option<String>,
    #[serde(alias = "localId")]
    user_id: Option<String>,
    email: Option<String>,
    display_name: Option<String>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_at: Option<String>,
}

/// Load credentials from a JSON file
pub fn load_from_file(path: &Path) -> Result<Credentials> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read credentials file: {}", path.display()))?;

    let file: CredentialsFile =
        serde_json::from_str(&raw).context("Failed to parse credentials file")?;

    let refresh_token = file
        .refresh_token
        .filter(|t| !t.is_empty())
        .context("Credentials file must contain refreshToken")?;

    let uid = file
        .uid
        .or(file.user_id)
        .context("Credentials file must contain uid")?;

    // A bad expiry only costs an early refresh
    let expires_at = file.expires_at.and_then(|s| match parse_datetime(&s) {
        Ok(dt) => Some(dt),
        Err(e) => {
            tracing::warn!("Ignoring expiresAt in credentials file: {}", e);
            None
        }
    });

    Ok(Credentials {
        uid,
        email: file.email,
        display_name: file.display_name,
        refresh_token,
        id_token: file.id_token.filter(|t| !t.is_empty()),
        expires_at,
    })
}

/// Write credentials back, e.g. after the refresh token rotated
pub fn save_to_file(path: &Path, creds: &Credentials) -> Result<()> {
    let json = serde_json::to_string_pretty(creds).context("Failed to encode credentials")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write credentials file: {}", path.display()))
}

/// Parse datetime from various ISO 8601 formats
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    // Handle Z suffix
    let normalized = if s.ends_with('Z') {
        s.replace('Z', "+00:00")
    } else {
        s.to_string()
    };

    DateTime::parse_from_rfc3339(&normalized)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse datetime: {}", s))
}
