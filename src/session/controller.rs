// Session controller
// Turns terminal-auth events from the HTTP layer into sign-out + redirect

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use super::{Navigator, SessionStore};

/// Why a request ended the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// 401 and no principal appeared while waiting to refresh
    NoPrincipal,
    /// Forced token refresh failed
    RefreshFailed,
    /// 401 again after the one retry
    RetryRejected,
    /// 403 without the suspended code
    Forbidden,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminalReason::NoPrincipal => "no_principal",
            TerminalReason::RefreshFailed => "refresh_failed",
            TerminalReason::RetryRejected => "retry_rejected",
            TerminalReason::Forbidden => "forbidden",
        };
        f.write_str(s)
    }
}

/// Typed auth outcome emitted by the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SessionExpired {
        method: String,
        path: String,
        status: Option<u16>,
        reason: TerminalReason,
    },
}

/// Receiver of auth events; awaited before the failing request returns
#[async_trait]
pub trait AuthEventSink: Send + Sync {
    async fn on_event(&self, event: AuthEvent);
}

/// Ends the local session and sends the user to the login entry point
pub struct SessionController {
    session: Arc<dyn SessionStore>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
}

impl SessionController {
    pub fn new(
        session: Arc<dyn SessionStore>,
        navigator: Arc<dyn Navigator>,
        login_path: impl Into<String>,
    ) -> Self {
        Self {
            session,
            navigator,
            login_path: login_path.into(),
        }
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }
}

#[async_trait]
impl AuthEventSink for SessionController {
    async fn on_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SessionExpired {
                method,
                path,
                status,
                reason,
            } => {
                tracing::warn!(
                    method = %method,
                    path = %path,
                    status = ?status,
                    reason = %reason,
                    "Session invalidated by backend response"
                );

                // Redirect even when sign-out fails: the session is unusable either way
                if let Err(e) = self.session.sign_out().await {
                    tracing::error!(error = %e, "Sign-out failed");
                }

                self.navigator.redirect(&self.login_path);
            }
        }
    }
}
