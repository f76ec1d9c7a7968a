// Session module
// App-level session state, navigation, and the controller that ends sessions
// when the HTTP layer reports an unrecoverable auth failure

mod controller;
mod navigator;
mod store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use controller::{AuthEvent, AuthEventSink, SessionController, TerminalReason};
pub use navigator::LogNavigator;
pub use store::MemorySessionStore;

/// User known to the application-level session context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Holds "is a user currently signed in" for the application
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// User the application currently believes is signed in
    fn current_user(&self) -> Option<SessionUser>;

    /// End the session, including the identity provider's sign-in
    async fn sign_out(&self) -> anyhow::Result<()>;
}

/// Navigation capability of the hosting application
pub trait Navigator: Send + Sync {
    fn redirect(&self, path: &str);
}
