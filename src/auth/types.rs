// Authentication types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::session::SessionUser;

/// Signed-in identity as persisted in a credentials file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub refresh_token: String,
    pub id_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// App-level user derived from these credentials
    pub fn session_user(&self) -> SessionUser {
        SessionUser {
            uid: self.uid.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// Token data from refresh response
#[derive(Debug, Clone)]
pub struct TokenData {
    pub id_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub user_id: Option<String>,
}

/// Secure-token refresh response
///
/// Providers disagree on the token field name and on whether `expires_in` is
/// a number or a numeric string, so both shapes are accepted.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    #[serde(alias = "access_token")]
    pub id_token: String,
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "seconds_from_str_or_number")]
    pub expires_in: Option<u64>,
    pub user_id: Option<String>,
}

fn seconds_from_str_or_number<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Option::<Seconds>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Seconds::Number(n)) => Ok(Some(n)),
        Some(Seconds::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
