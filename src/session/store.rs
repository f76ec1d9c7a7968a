// In-memory session store

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use super::{SessionStore, SessionUser};
use crate::auth::IdentityProvider;

/// Process-local session context
///
/// Signing out clears the app-level user and, when an identity provider is
/// attached, drops its principal as well.
pub struct MemorySessionStore {
    user: RwLock<Option<SessionUser>>,
    identity: Option<Arc<dyn IdentityProvider>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            user: RwLock::new(None),
            identity: None,
        }
    }

    pub fn with_identity(identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            user: RwLock::new(None),
            identity: Some(identity),
        }
    }

    pub fn sign_in(&self, user: SessionUser) {
        tracing::info!(uid = %user.uid, "Session started");
        *self.user.write() = Some(user);
    }

    pub fn is_signed_in(&self) -> bool {
        self.user.read().is_some()
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn current_user(&self) -> Option<SessionUser> {
        self.user.read().clone()
    }

    async fn sign_out(&self) -> anyhow::Result<()> {
        let previous = self.user.write().take();
        if let Some(user) = previous {
            tracing::info!(uid = %user.uid, "Session ended");
        }

        if let Some(identity) = &self.identity {
            identity.sign_out().await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Principal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingIdentity {
        sign_outs: AtomicUsize,
    }

    #[async_trait]
    impl IdentityProvider for CountingIdentity {
        fn current_principal(&self) -> Option<Arc<dyn Principal>> {
            None
        }

        async fn sign_out(&self) -> anyhow::Result<()> {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn buyer() -> SessionUser {
        SessionUser {
            uid: "u-1".to_string(),
            email: Some("a@b.com".to_string()),
            display_name: None,
        }
    }

    #[tokio::test]
    async fn test_sign_in_and_out() {
        let store = MemorySessionStore::new();
        assert!(store.current_user().is_none());

        store.sign_in(buyer());
        assert!(store.is_signed_in());
        assert_eq!(store.current_user().unwrap().uid, "u-1");

        store.sign_out().await.unwrap();
        assert!(!store.is_signed_in());
    }

    #[tokio::test]
    async fn test_sign_out_reaches_identity_provider() {
        let identity = Arc::new(CountingIdentity {
            sign_outs: AtomicUsize::new(0),
        });
        let store = MemorySessionStore::with_identity(identity.clone());
        store.sign_in(buyer());

        store.sign_out().await.unwrap();
        // Signing out twice is harmless
        store.sign_out().await.unwrap();

        assert_eq!(identity.sign_outs.load(Ordering::SeqCst), 2);
        assert!(store.current_user().is_none());
    }
}
