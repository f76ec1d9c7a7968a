// Auth interceptor registration
// Interceptors are installed on a client for the lifetime of a guard

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::auth::IdentityProvider;
use crate::session::{AuthEventSink, SessionStore};

/// Collaborators the client consults around each request
pub struct AuthInterceptor {
    pub(crate) identity: Arc<dyn IdentityProvider>,
    pub(crate) session: Arc<dyn SessionStore>,
    pub(crate) events: Arc<dyn AuthEventSink>,
}

impl AuthInterceptor {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        session: Arc<dyn SessionStore>,
        events: Arc<dyn AuthEventSink>,
    ) -> Self {
        Self {
            identity,
            session,
            events,
        }
    }
}

/// Installed interceptors keyed by install order
#[derive(Default)]
pub(crate) struct InterceptorRegistry {
    next_id: AtomicU64,
    entries: DashMap<u64, Arc<AuthInterceptor>>,
}

impl InterceptorRegistry {
    pub(crate) fn register(&self, interceptor: AuthInterceptor) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, Arc::new(interceptor));
        id
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Most recently installed interceptor still registered
    pub(crate) fn active(&self) -> Option<Arc<AuthInterceptor>> {
        self.entries
            .iter()
            .max_by_key(|entry| *entry.key())
            .map(|entry| entry.value().clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Keeps an interceptor installed; dropping it uninstalls the interceptor
#[must_use = "dropping the guard immediately uninstalls the interceptor"]
pub struct InterceptorGuard {
    id: u64,
    registry: Weak<InterceptorRegistry>,
}

impl InterceptorGuard {
    pub(crate) fn new(id: u64, registry: &Arc<InterceptorRegistry>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for InterceptorGuard {
    fn drop(&mut self) {
        // Client already gone: nothing left to uninstall from
        if let Some(registry) = self.registry.upgrade() {
            if registry.remove(self.id) {
                tracing::debug!(interceptor_id = self.id, "Auth interceptor uninstalled");
            }
        }
    }
}
