// Authentication module
// Identity provider capabilities and the refresh-token backed implementation

mod credentials;
mod manager;
mod refresh;
mod types;

use async_trait::async_trait;
use std::sync::Arc;

pub use credentials::{load_from_file, save_to_file};
pub use manager::{AuthManager, ManagedPrincipal};
pub use refresh::TokenEndpoint;
pub use types::Credentials;

/// Signed-in identity able to produce bearer tokens
#[async_trait]
pub trait Principal: Send + Sync {
    fn uid(&self) -> &str;

    /// Current token; `force_refresh` bypasses any cached token
    async fn get_token(&self, force_refresh: bool) -> anyhow::Result<String>;
}

/// Source of the process-wide signed-in principal
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn current_principal(&self) -> Option<Arc<dyn Principal>>;

    async fn sign_out(&self) -> anyhow::Result<()>;
}
