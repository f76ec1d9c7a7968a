use anyhow::Context;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Response};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::error::{ApiError, Result};
use crate::interceptor::{AuthInterceptor, InterceptorGuard, InterceptorRegistry};
use crate::request::RequestDescriptor;
use crate::session::{AuthEvent, TerminalReason};
use crate::wait::{BoundedPoll, Clock, TokioClock};

/// Fallback backend address when none is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Backend API base URL
    pub base_url: String,

    pub connect_timeout: Duration,
    pub request_timeout: Duration,

    /// Wait for the identity provider to catch up with the app-level session
    pub principal_poll: BoundedPoll,

    /// Pause after a first 401 before looking for a principal
    pub retry_settle_delay: Duration,

    /// Extra pause when no principal is visible after the settle delay
    pub retry_grace_delay: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            principal_poll: BoundedPoll::new(10, Duration::from_millis(100)),
            retry_settle_delay: Duration::from_millis(100),
            retry_grace_delay: Duration::from_millis(500),
        }
    }
}

/// Where a request stands in the auth flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Initial,
    Sent,
    Success,
    /// First 401; eligible for one refresh-and-retry
    Failed401First,
    Retried,
    /// Unrecoverable auth failure; ends the session
    FailedFinal,
    /// Account suspended; session stays valid
    Failed403Suspended,
    FailedOther,
}

impl RequestState {
    pub fn ends_session(self) -> bool {
        self == RequestState::FailedFinal
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestState::Initial => "INITIAL",
            RequestState::Sent => "SENT",
            RequestState::Success => "SUCCESS",
            RequestState::Failed401First => "FAILED_401_FIRST",
            RequestState::Retried => "RETRIED",
            RequestState::FailedFinal => "FAILED_FINAL",
            RequestState::Failed403Suspended => "FAILED_403_SUSPENDED",
            RequestState::FailedOther => "FAILED_OTHER",
        };
        f.write_str(s)
    }
}

/// State a failed attempt moves the request into
pub fn classify_failure(err: &ApiError, retried: bool) -> RequestState {
    match err.status() {
        Some(401) if !retried => RequestState::Failed401First,
        Some(401) => RequestState::FailedFinal,
        Some(403) if err.is_suspended() => RequestState::Failed403Suspended,
        Some(403) => RequestState::FailedFinal,
        _ => RequestState::FailedOther,
    }
}

/// HTTP client for the garments backend
///
/// Without an installed interceptor requests go out as described. With one,
/// each request carries the signed-in principal's bearer token, a first 401 is
/// recovered by one forced refresh and re-send, and unrecoverable auth
/// failures are reported to the interceptor's event sink before the error is
/// returned.
pub struct AuthenticatedClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    settings: ClientSettings,

    interceptors: Arc<InterceptorRegistry>,

    clock: Arc<dyn Clock>,
}

impl AuthenticatedClient {
    /// Create a new HTTP client
    pub fn new(settings: ClientSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            settings,
            interceptors: Arc::new(InterceptorRegistry::default()),
            clock: Arc::new(TokioClock),
        })
    }

    /// Replace the clock used for auth-flow delays
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.settings.base_url
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Install an auth interceptor until the returned guard is dropped
    pub fn install(&self, interceptor: AuthInterceptor) -> InterceptorGuard {
        let id = self.interceptors.register(interceptor);
        tracing::debug!(interceptor_id = id, "Auth interceptor installed");
        InterceptorGuard::new(id, &self.interceptors)
    }

    /// Number of currently installed interceptors
    pub fn interceptor_count(&self) -> usize {
        self.interceptors.len()
    }

    /// Send a request through the auth flow
    pub async fn send(&self, request: RequestDescriptor) -> Result<Response> {
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let span = tracing::debug_span!("request", id = %request_id, request = %request.label());

        match self.interceptors.active() {
            Some(interceptor) => {
                self.send_authenticated(&interceptor, request)
                    .instrument(span)
                    .await
            }
            None => self.execute(&request, None).instrument(span).await,
        }
    }

    async fn send_authenticated(
        &self,
        interceptor: &AuthInterceptor,
        mut request: RequestDescriptor,
    ) -> Result<Response> {
        tracing::debug!(state = %RequestState::Initial, "Preparing request");
        let mut token = self.authorize(interceptor).await;

        loop {
            let sent = if request.retried {
                RequestState::Retried
            } else {
                RequestState::Sent
            };
            tracing::debug!(state = %sent, authorized = token.is_some(), "Sending request");

            let err = match self.execute(&request, token.as_deref()).await {
                Ok(response) => {
                    tracing::debug!(state = %RequestState::Success, "Request completed");
                    return Ok(response);
                }
                Err(err) => err,
            };

            let state = classify_failure(&err, request.retried);
            tracing::debug!(state = %state, error = %err, "Request failed");

            match state {
                RequestState::Failed401First => {
                    request.retried = true;
                    token = Some(self.refresh_for_retry(interceptor, &request, err).await?);
                }
                state if state.ends_session() => {
                    let reason = if err.status() == Some(403) {
                        TerminalReason::Forbidden
                    } else {
                        TerminalReason::RetryRejected
                    };
                    self.end_session(interceptor, &request, err.status(), reason)
                        .await;
                    return Err(err);
                }
                _ => return Err(err),
            }
        }
    }

    /// Token for the outgoing request, or `None` to send it unauthenticated
    async fn authorize(&self, interceptor: &AuthInterceptor) -> Option<String> {
        if interceptor.session.current_user().is_none() {
            tracing::debug!("No session user, sending without Authorization");
            return None;
        }

        // The identity provider can lag behind the app-level session
        let identity = interceptor.identity.clone();
        let principal = self
            .settings
            .principal_poll
            .until(self.clock.as_ref(), || identity.current_principal())
            .await;

        let Some(principal) = principal else {
            tracing::warn!(
                wait_ms = self.settings.principal_poll.budget().as_millis() as u64,
                "Session user present but no principal appeared, sending without Authorization"
            );
            return None;
        };

        match principal.get_token(false).await {
            Ok(token) if !token.is_empty() => Some(token),
            Ok(_) => {
                tracing::warn!(uid = %principal.uid(), "Identity provider returned an empty token");
                None
            }
            Err(e) => {
                tracing::warn!(uid = %principal.uid(), error = %e, "Failed to get token");
                None
            }
        }
    }

    /// Force-refreshed token for the single retry after a 401
    async fn refresh_for_retry(
        &self,
        interceptor: &AuthInterceptor,
        request: &RequestDescriptor,
        original: ApiError,
    ) -> Result<String> {
        tracing::warn!("Received 401, refreshing token and retrying once...");

        self.clock.sleep(self.settings.retry_settle_delay).await;
        let mut principal = interceptor.identity.current_principal();
        if principal.is_none() {
            self.clock.sleep(self.settings.retry_grace_delay).await;
            principal = interceptor.identity.current_principal();
        }

        let Some(principal) = principal else {
            tracing::warn!("No principal available to refresh");
            self.end_session(interceptor, request, original.status(), TerminalReason::NoPrincipal)
                .await;
            return Err(original);
        };

        let refreshed = match principal.get_token(true).await {
            Ok(token) if !token.is_empty() => Ok(token),
            Ok(_) => Err(ApiError::TokenRefresh(
                "identity provider returned an empty token".to_string(),
            )),
            Err(e) => Err(ApiError::TokenRefresh(format!("{:#}", e))),
        };

        if let Err(ref e) = refreshed {
            tracing::error!(uid = %principal.uid(), error = %e, "Forced token refresh failed");
            self.end_session(interceptor, request, original.status(), TerminalReason::RefreshFailed)
                .await;
        }

        refreshed
    }

    async fn end_session(
        &self,
        interceptor: &AuthInterceptor,
        request: &RequestDescriptor,
        status: Option<u16>,
        reason: TerminalReason,
    ) {
        tracing::debug!(state = %RequestState::FailedFinal, reason = %reason, "Ending session");
        interceptor
            .events
            .on_event(AuthEvent::SessionExpired {
                method: request.method.to_string(),
                path: request.path.clone(),
                status,
                reason,
            })
            .await;
    }

    /// One HTTP exchange; non-success statuses become `ApiError::Http`
    async fn execute(&self, request: &RequestDescriptor, token: Option<&str>) -> Result<Response> {
        let url = request.url(&self.settings.base_url)?;

        let mut builder = self.client.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            // The interceptor's token wins over a caller-supplied one
            if token.is_some() && name.eq_ignore_ascii_case(AUTHORIZATION.as_str()) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let err = ApiError::from(e);
                tracing::warn!(url = %url, error = %err, "HTTP request error");
                return Err(err);
            }
        };

        let status = response.status();
        if status.is_success() {
            tracing::debug!(status = %status, "Received HTTP response");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            status = status.as_u16(),
            url = %url,
            response_body = %body,
            "Received error response"
        );
        Err(ApiError::http(status.as_u16(), body))
    }
}
