// Garments Client - authenticated API client for the garments tracker backend

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod interceptor;
pub mod request;
pub mod session;
pub mod wait;

pub use error::{ApiError, ErrorBody};
pub use http_client::{AuthenticatedClient, ClientSettings, RequestState};
pub use interceptor::{AuthInterceptor, InterceptorGuard};
pub use request::RequestDescriptor;
