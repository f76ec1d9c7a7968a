// Token refresh logic

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use std::path::Path;
use thiserror::Error;

use super::types::{Credentials, RefreshResponse, TokenData};

/// Lifetime assumed when the provider omits `expires_in`
const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Safety margin subtracted from the provider's expiry
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Upper bound on the lifetime we trust from the provider
const MAX_TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// Token endpoint answered with a non-success status
#[derive(Debug, Error)]
#[error("Token refresh failed: {status} - {body}")]
pub struct RefreshRejected {
    pub status: StatusCode,
    pub body: String,
}

/// Secure-token endpoint settings
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    pub url: String,
    pub api_key: Option<String>,
}

/// Exchange the refresh token for a new id token
pub async fn refresh_id_token(
    client: &Client,
    endpoint: &TokenEndpoint,
    creds: &Credentials,
) -> Result<TokenData> {
    tracing::info!(uid = %creds.uid, "Refreshing id token...");

    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", creds.refresh_token.as_str()),
    ];

    let mut request = client
        .post(&endpoint.url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .form(&form);
    if let Some(key) = &endpoint.api_key {
        request = request.query(&[("key", key.as_str())]);
    }

    let response = request
        .send()
        .await
        .context("Failed to send token refresh request")?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            "Token refresh failed: status={}, body={}",
            status,
            error_text
        );

        // Secure-token errors look like {"error": {"message": "TOKEN_EXPIRED"}}
        if let Ok(error_json) = serde_json::from_str::<serde_json::Value>(&error_text) {
            if let Some(message) = error_json
                .pointer("/error/message")
                .or_else(|| error_json.get("error_description"))
                .and_then(|v| v.as_str())
            {
                tracing::error!("Token refresh error details: {}", message);
            }
        }

        return Err(RefreshRejected {
            status,
            body: error_text,
        }
        .into());
    }

    let data: RefreshResponse = response
        .json()
        .await
        .context("Failed to parse token refresh response")?;

    if data.id_token.is_empty() {
        anyhow::bail!("Token refresh response does not contain an id token");
    }

    let expires_in = data.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
    let expires_at = expiry_after(Utc::now(), expires_in)?;

    tracing::info!("Id token refreshed, expires: {}", expires_at.to_rfc3339());

    Ok(TokenData {
        id_token: data.id_token,
        refresh_token: data.refresh_token,
        expires_at,
        user_id: data.user_id,
    })
}

/// Expiry for a token issued at `now` with the provider's `expires_in`
///
/// The lifetime is capped at one day and the safety margin never eats more
/// than half of it, so a short-lived token is still usable once stored.
fn expiry_after(now: DateTime<Utc>, expires_in: u64) -> Result<DateTime<Utc>> {
    let lifetime = i64::try_from(expires_in)
        .unwrap_or(i64::MAX)
        .min(MAX_TOKEN_LIFETIME_SECS);
    let buffer = EXPIRY_BUFFER_SECS.min(lifetime / 2);

    Duration::try_seconds(lifetime - buffer)
        .and_then(|d| now.checked_add_signed(d))
        .with_context(|| format!("Token expiry out of range: expires_in={}", expires_in))
}

fn is_bad_request(err: &anyhow::Error) -> bool {
    err.downcast_ref::<RefreshRejected>()
        .is_some_and(|r| r.status == StatusCode::BAD_REQUEST)
}

/// Refresh with one reload-and-retry for file-backed credentials
///
/// A 400 usually means another process rotated the refresh token, so the
/// credentials file is re-read and the exchange attempted once more.
pub async fn refresh_with_retry(
    client: &Client,
    endpoint: &TokenEndpoint,
    creds: &mut Credentials,
    credentials_file: Option<&Path>,
) -> Result<TokenData> {
    let result = refresh_id_token(client, endpoint, creds).await;

    if let Err(ref e) = result {
        if let Some(path) = credentials_file {
            if is_bad_request(e) {
                tracing::warn!("Token refresh failed with 400, reloading credentials file and retrying...");

                *creds = super::credentials::load_from_file(path)
                    .context("Failed to reload credentials file")?;

                return refresh_id_token(client, endpoint, creds).await;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn creds(refresh_token: &str) -> Credentials {
        Credentials {
            uid: "u-1".to_string(),
            email: None,
            display_name: None,
            refresh_token: refresh_token.to_string(),
            id_token: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/token")
            .match_query(Matcher::UrlEncoded("key".into(), "api-key".into()))
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "r1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id_token":"fresh","refresh_token":"r2","expires_in":"3600"}"#)
            .create_async()
            .await;

        let endpoint = TokenEndpoint {
            url: format!("{}/v1/token", server.url()),
            api_key: Some("api-key".to_string()),
        };

        let before = Utc::now();
        let data = refresh_id_token(&Client::new(), &endpoint, &creds("r1"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(data.id_token, "fresh");
        assert_eq!(data.refresh_token.as_deref(), Some("r2"));
        // Expiry carries the safety margin
        assert!(data.expires_at <= before + Duration::seconds(3600 - EXPIRY_BUFFER_SECS + 5));
        assert!(data.expires_at >= before + Duration::seconds(3600 - EXPIRY_BUFFER_SECS - 5));
    }

    #[tokio::test]
    async fn test_refresh_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/token")
            .with_status(400)
            .with_body(r#"{"error":{"code":400,"message":"TOKEN_EXPIRED"}}"#)
            .create_async()
            .await;

        let endpoint = TokenEndpoint {
            url: format!("{}/v1/token", server.url()),
            api_key: None,
        };

        let err = refresh_id_token(&Client::new(), &endpoint, &creds("r1"))
            .await
            .unwrap_err();
        let rejected = err.downcast_ref::<RefreshRejected>().unwrap();
        assert_eq!(rejected.status, StatusCode::BAD_REQUEST);
        assert!(rejected.body.contains("TOKEN_EXPIRED"));
        assert!(err.to_string().contains("400"));
    }

    #[test]
    fn test_expiry_caps_huge_lifetimes() {
        let now = Utc::now();
        let cap = now + Duration::seconds(MAX_TOKEN_LIFETIME_SECS - EXPIRY_BUFFER_SECS);

        assert_eq!(expiry_after(now, 100_000_000_000_000_000).unwrap(), cap);
        // Would wrap negative through a plain `as i64`
        assert_eq!(expiry_after(now, u64::MAX).unwrap(), cap);
    }

    #[test]
    fn test_expiry_short_lifetimes_stay_in_future() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, 60).unwrap(), now + Duration::seconds(30));
        assert_eq!(expiry_after(now, 10).unwrap(), now + Duration::seconds(5));
        assert_eq!(expiry_after(now, 3600).unwrap(), now + Duration::seconds(3540));
        assert_eq!(expiry_after(now, 0).unwrap(), now);
    }

    #[tokio::test]
    async fn test_refresh_huge_expires_in_does_not_panic() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/token")
            .with_status(200)
            .with_body(r#"{"id_token":"fresh","expires_in":100000000000000000}"#)
            .create_async()
            .await;

        let endpoint = TokenEndpoint {
            url: format!("{}/v1/token", server.url()),
            api_key: None,
        };

        let before = Utc::now();
        let data = refresh_id_token(&Client::new(), &endpoint, &creds("r1"))
            .await
            .unwrap();

        assert!(data.expires_at > before);
        assert!(data.expires_at <= Utc::now() + Duration::seconds(MAX_TOKEN_LIFETIME_SECS));
    }

    #[tokio::test]
    async fn test_refresh_short_expires_in_is_not_already_expired() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/token")
            .with_status(200)
            .with_body(r#"{"id_token":"fresh","expires_in":"60"}"#)
            .create_async()
            .await;

        let endpoint = TokenEndpoint {
            url: format!("{}/v1/token", server.url()),
            api_key: None,
        };

        let data = refresh_id_token(&Client::new(), &endpoint, &creds("r1"))
            .await
            .unwrap();
        assert!(data.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn test_refresh_rejects_empty_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/token")
            .with_status(200)
            .with_body(r#"{"id_token":""}"#)
            .create_async()
            .await;

        let endpoint = TokenEndpoint {
            url: format!("{}/v1/token", server.url()),
            api_key: None,
        };

        assert!(refresh_id_token(&Client::new(), &endpoint, &creds("r1"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_refresh_with_retry_reloads_file_on_400() {
        let mut server = mockito::Server::new_async().await;
        let stale = server
            .mock("POST", "/v1/token")
            .match_body(Matcher::UrlEncoded("refresh_token".into(), "stale".into()))
            .with_status(400)
            .with_body(r#"{"error":{"message":"INVALID_REFRESH_TOKEN"}}"#)
            .expect(1)
            .create_async()
            .await;
        let rotated = server
            .mock("POST", "/v1/token")
            .match_body(Matcher::UrlEncoded("refresh_token".into(), "rotated".into()))
            .with_status(200)
            .with_body(r#"{"id_token":"fresh","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        std::fs::write(&path, r#"{"uid":"u-1","refreshToken":"rotated"}"#).unwrap();

        let endpoint = TokenEndpoint {
            url: format!("{}/v1/token", server.url()),
            api_key: None,
        };
        let mut current = creds("stale");

        let data = refresh_with_retry(&Client::new(), &endpoint, &mut current, Some(&path))
            .await
            .unwrap();

        stale.assert_async().await;
        rotated.assert_async().await;
        assert_eq!(data.id_token, "fresh");
        assert_eq!(current.refresh_token, "rotated");
    }

    #[tokio::test]
    async fn test_refresh_with_retry_without_file_fails_once() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/token")
            .with_status(400)
            .with_body("bad request")
            .expect(1)
            .create_async()
            .await;

        let endpoint = TokenEndpoint {
            url: format!("{}/v1/token", server.url()),
            api_key: None,
        };
        let mut current = creds("stale");

        assert!(refresh_with_retry(&Client::new(), &endpoint, &mut current, None)
            .await
            .is_err());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_with_retry_ignores_other_statuses() {
        let mut server = mockito::Server::new_async().await;
        // Body mentions 400 but the status is a server error
        let mock = server
            .mock("POST", "/v1/token")
            .with_status(500)
            .with_body(r#"{"error":{"code":400,"message":"upstream said 400"}}"#)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        std::fs::write(&path, r#"{"uid":"u-1","refreshToken":"rotated"}"#).unwrap();

        let endpoint = TokenEndpoint {
            url: format!("{}/v1/token", server.url()),
            api_key: None,
        };
        let mut current = creds("stale");

        let err = refresh_with_retry(&Client::new(), &endpoint, &mut current, Some(&path))
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert_eq!(
            err.downcast_ref::<RefreshRejected>().map(|r| r.status),
            Some(StatusCode::INTERNAL_SERVER_ERROR)
        );
        // File was not reloaded
        assert_eq!(current.refresh_token, "stale");
    }
}
