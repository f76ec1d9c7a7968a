use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::credentials;
use super::refresh::{self, TokenEndpoint};
use super::types::Credentials;
use super::{IdentityProvider, Principal};

/// Authentication manager
/// Identity provider backed by refresh-token exchange against a secure-token endpoint
pub struct AuthManager {
    /// Currently signed-in principal
    current: parking_lot::RwLock<Option<Arc<ManagedPrincipal>>>,

    /// HTTP client for refresh requests
    client: Client,

    /// Where refresh tokens are exchanged
    endpoint: TokenEndpoint,

    /// Token refresh threshold in seconds (default: 300 = 5 minutes)
    refresh_threshold: i64,
}

impl AuthManager {
    /// Create a signed-out AuthManager
    pub fn new(endpoint: TokenEndpoint, refresh_threshold: u64) -> Result<Self> {
        // Create HTTP client with timeout
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            current: parking_lot::RwLock::new(None),
            client,
            endpoint,
            refresh_threshold: refresh_threshold as i64,
        })
    }

    /// Sign in with in-memory credentials
    pub fn sign_in(&self, credentials: Credentials) -> Arc<ManagedPrincipal> {
        self.install(credentials, None)
    }

    /// Sign in from a credentials file; rotated refresh tokens are written back to it
    pub fn sign_in_from_file(&self, path: &Path) -> Result<Arc<ManagedPrincipal>> {
        tracing::info!("Loading credentials from: {}", path.display());
        let credentials = credentials::load_from_file(path)?;
        Ok(self.install(credentials, Some(path.to_path_buf())))
    }

    /// Current principal with its concrete type
    pub fn principal(&self) -> Option<Arc<ManagedPrincipal>> {
        self.current.read().clone()
    }

    fn install(
        &self,
        credentials: Credentials,
        credentials_file: Option<PathBuf>,
    ) -> Arc<ManagedPrincipal> {
        let principal = Arc::new(ManagedPrincipal::new(
            credentials,
            self.client.clone(),
            self.endpoint.clone(),
            credentials_file,
            self.refresh_threshold,
        ));
        tracing::info!(uid = %principal.uid(), "Signed in");
        *self.current.write() = Some(principal.clone());
        principal
    }
}

#[async_trait]
impl IdentityProvider for AuthManager {
    fn current_principal(&self) -> Option<Arc<dyn Principal>> {
        self.principal().map(|p| p as Arc<dyn Principal>)
    }

    async fn sign_out(&self) -> Result<()> {
        let previous = self.current.write().take();
        if let Some(principal) = previous {
            tracing::info!(uid = %principal.uid(), "Signed out");
        }
        Ok(())
    }
}

/// Signed-in identity that can mint bearer tokens
/// Manages token lifecycle with automatic refresh and thread-safe access
pub struct ManagedPrincipal {
    uid: String,

    /// Current credentials
    credentials: Arc<RwLock<Credentials>>,

    /// Current id token
    id_token: Arc<RwLock<Option<String>>>,

    /// Token expiration time
    expires_at: Arc<RwLock<Option<DateTime<Utc>>>>,

    /// HTTP client for refresh requests
    client: Client,

    endpoint: TokenEndpoint,

    /// Credentials file to reload on 400 and to persist rotated tokens into
    credentials_file: Option<PathBuf>,

    refresh_threshold: i64,
}

impl ManagedPrincipal {
    pub fn new(
        credentials: Credentials,
        client: Client,
        endpoint: TokenEndpoint,
        credentials_file: Option<PathBuf>,
        refresh_threshold: i64,
    ) -> Self {
        let id_token = credentials.id_token.clone();
        let expires_at = credentials.expires_at;

        Self {
            uid: credentials.uid.clone(),
            credentials: Arc::new(RwLock::new(credentials)),
            id_token: Arc::new(RwLock::new(id_token)),
            expires_at: Arc::new(RwLock::new(expires_at)),
            client,
            endpoint,
            credentials_file,
            refresh_threshold,
        }
    }

    /// Snapshot of the current credentials
    pub async fn credentials(&self) -> Credentials {
        self.credentials.read().await.clone()
    }

    /// Check if token is expiring soon (within threshold)
    async fn is_token_expiring_soon(&self) -> bool {
        let expires_at = self.expires_at.read().await;

        match *expires_at {
            None => true, // No expiration info, assume refresh needed
            Some(exp) => {
                let now = Utc::now();
                let threshold = now + Duration::seconds(self.refresh_threshold);
                exp <= threshold
            }
        }
    }

    /// Check if token is actually expired (not just expiring soon)
    async fn is_token_expired(&self) -> bool {
        let expires_at = self.expires_at.read().await;

        match *expires_at {
            None => true, // No expiration info, assume expired
            Some(exp) => Utc::now() >= exp,
        }
    }

    async fn cached_token(&self) -> Option<String> {
        self.id_token.read().await.clone()
    }

    /// Refresh the id token
    async fn refresh_token(&self, force: bool) -> Result<()> {
        // Holding the credentials write lock serializes refreshes
        let mut creds = self.credentials.write().await;

        // Another task may have refreshed while we waited for the lock
        if !force && !self.is_token_expiring_soon().await && self.cached_token().await.is_some() {
            tracing::debug!("Token already refreshed by a concurrent caller");
            return Ok(());
        }

        tracing::debug!(force, "Refreshing id token...");
        let token_data = refresh::refresh_with_retry(
            &self.client,
            &self.endpoint,
            &mut creds,
            self.credentials_file.as_deref(),
        )
        .await?;

        // Update stored token data
        {
            let mut id_token = self.id_token.write().await;
            *id_token = Some(token_data.id_token.clone());
        }

        {
            let mut expires_at = self.expires_at.write().await;
            *expires_at = Some(token_data.expires_at);
        }

        creds.id_token = Some(token_data.id_token);
        creds.expires_at = Some(token_data.expires_at);

        // Update credentials with new refresh token if provided
        if let Some(new_refresh_token) = token_data.refresh_token {
            if new_refresh_token != creds.refresh_token {
                creds.refresh_token = new_refresh_token;
                if let Some(path) = &self.credentials_file {
                    if let Err(e) = credentials::save_to_file(path, &creds) {
                        tracing::warn!("Failed to persist rotated refresh token: {}", e);
                    }
                }
            }
        }

        if let Some(user_id) = token_data.user_id {
            if user_id != self.uid {
                tracing::warn!(
                    expected = %self.uid,
                    received = %user_id,
                    "Token refresh returned a different user id"
                );
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Principal for ManagedPrincipal {
    fn uid(&self) -> &str {
        &self.uid
    }

    /// Get a valid id token, refreshing if necessary
    async fn get_token(&self, force_refresh: bool) -> Result<String> {
        if force_refresh {
            self.refresh_token(true).await?;
        } else if self.is_token_expiring_soon().await {
            // Attempt refresh
            if let Err(e) = self.refresh_token(false).await {
                tracing::error!("Token refresh failed: {}", e);

                // Graceful degradation: if token isn't actually expired yet, use it
                if !self.is_token_expired().await {
                    if let Some(token) = self.cached_token().await {
                        tracing::warn!(
                            "Using existing token despite refresh failure (not yet expired)"
                        );
                        return Ok(token);
                    }
                }

                return Err(e).context("Failed to refresh token and no valid token available");
            }
        }

        // Return current token
        self.cached_token().await.context("No id token available")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_endpoint() -> TokenEndpoint {
        TokenEndpoint {
            url: "http://127.0.0.1:9/v1/token".to_string(),
            api_key: None,
        }
    }

    fn creds(id_token: Option<&str>, expires_in_secs: Option<i64>) -> Credentials {
        Credentials {
            uid: "u-1".to_string(),
            email: Some("a@b.com".to_string()),
            display_name: None,
            refresh_token: "r1".to_string(),
            id_token: id_token.map(str::to_string),
            expires_at: expires_in_secs.map(|s| Utc::now() + Duration::seconds(s)),
        }
    }

    fn principal(creds: Credentials, endpoint: TokenEndpoint) -> ManagedPrincipal {
        ManagedPrincipal::new(creds, Client::new(), endpoint, None, 300)
    }

    #[tokio::test]
    async fn test_token_expiration_check() {
        // Token expires in 10 minutes, threshold is 5 minutes - should not need refresh
        let p = principal(creds(Some("t"), Some(600)), unreachable_endpoint());
        assert!(!p.is_token_expiring_soon().await);

        // Update to expire in 2 minutes - should need refresh
        {
            let mut expires_at = p.expires_at.write().await;
            *expires_at = Some(Utc::now() + Duration::seconds(120));
        }
        assert!(p.is_token_expiring_soon().await);
        assert!(!p.is_token_expired().await);
    }

    #[tokio::test]
    async fn test_token_expired_check() {
        // Token expired 1 minute ago
        let p = principal(creds(Some("t"), Some(-60)), unreachable_endpoint());
        assert!(p.is_token_expired().await);

        let p = principal(creds(None, None), unreachable_endpoint());
        assert!(p.is_token_expired().await);
    }

    #[tokio::test]
    async fn test_fresh_cached_token_needs_no_network() {
        let p = principal(creds(Some("cached"), Some(3600)), unreachable_endpoint());
        assert_eq!(p.get_token(false).await.unwrap(), "cached");
    }

    #[tokio::test]
    async fn test_degrades_to_unexpired_token_when_refresh_fails() {
        // Inside the refresh threshold but not yet expired
        let p = principal(creds(Some("cached"), Some(120)), unreachable_endpoint());
        assert_eq!(p.get_token(false).await.unwrap(), "cached");
    }

    #[tokio::test]
    async fn test_forced_refresh_failure_propagates() {
        let p = principal(creds(Some("cached"), Some(3600)), unreachable_endpoint());
        assert!(p.get_token(true).await.is_err());
    }

    #[tokio::test]
    async fn test_forced_refresh_bypasses_cache() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/token")
            .with_status(200)
            .with_body(r#"{"id_token":"fresh","refresh_token":"r2","expires_in":"3600"}"#)
            .expect(1)
            .create_async()
            .await;
        let endpoint = TokenEndpoint {
            url: format!("{}/v1/token", server.url()),
            api_key: None,
        };

        let p = principal(creds(Some("cached"), Some(3600)), endpoint);
        assert_eq!(p.get_token(true).await.unwrap(), "fresh");
        // Subsequent non-forced reads reuse the new token
        assert_eq!(p.get_token(false).await.unwrap(), "fresh");

        mock.assert_async().await;
        assert_eq!(p.credentials().await.refresh_token, "r2");
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_persisted() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/token")
            .with_status(200)
            .with_body(r#"{"id_token":"fresh","refresh_token":"r2","expires_in":3600}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        std::fs::write(&path, r#"{"uid":"u-1","refreshToken":"r1"}"#).unwrap();

        let manager = AuthManager::new(
            TokenEndpoint {
                url: format!("{}/v1/token", server.url()),
                api_key: None,
            },
            300,
        )
        .unwrap();
        let p = manager.sign_in_from_file(&path).unwrap();

        assert_eq!(p.get_token(false).await.unwrap(), "fresh");
        let saved = credentials::load_from_file(&path).unwrap();
        assert_eq!(saved.refresh_token, "r2");
        assert_eq!(saved.id_token.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_sign_in_and_out() {
        let manager = AuthManager::new(unreachable_endpoint(), 300).unwrap();
        assert!(manager.current_principal().is_none());

        manager.sign_in(creds(Some("t"), Some(3600)));
        let current = manager.current_principal().unwrap();
        assert_eq!(current.uid(), "u-1");

        manager.sign_out().await.unwrap();
        assert!(manager.current_principal().is_none());
    }
}
