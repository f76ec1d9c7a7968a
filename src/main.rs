use anyhow::{Context, Result};
use std::sync::Arc;

use garments_client::auth::AuthManager;
use garments_client::config::{CliArgs, Config};
use garments_client::request::parse_method;
use garments_client::session::{LogNavigator, MemorySessionStore, SessionController};
use garments_client::{ApiError, AuthInterceptor, AuthenticatedClient, RequestDescriptor};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let (config, args) = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::debug!("Backend: {}", config.base_url);

    // Identity provider and app-level session
    let identity = Arc::new(AuthManager::new(
        config.token_endpoint(),
        config.token_refresh_threshold,
    )?);
    let session = Arc::new(MemorySessionStore::with_identity(identity.clone()));

    match &config.credentials_file {
        Some(path) => {
            let principal = identity.sign_in_from_file(path)?;
            session.sign_in(principal.credentials().await.session_user());
        }
        None => {
            tracing::info!("No credentials configured, requests are sent unauthenticated");
        }
    }

    let navigator = Arc::new(LogNavigator::new());
    let controller = Arc::new(SessionController::new(
        session.clone(),
        navigator.clone(),
        config.login_path.clone(),
    ));

    let client = AuthenticatedClient::new(config.client_settings())?;
    let _interceptor = client.install(AuthInterceptor::new(identity, session, controller));

    let request = build_request(&args)?;
    tracing::info!("{}", request.label());

    match client.send(request).await {
        Ok(response) => print_response(response).await,
        Err(e) => {
            report_error(&e, navigator.last_redirect());
            Err(e.into())
        }
    }
}

/// Build the request described on the command line
fn build_request(args: &CliArgs) -> Result<RequestDescriptor> {
    let method = parse_method(&args.method)?;
    let mut request = RequestDescriptor::new(method, args.path.clone());

    for (key, value) in &args.params {
        request = request.with_path_param(key.as_str(), value.as_str());
    }
    for (key, value) in &args.query {
        request = request.with_query(key.as_str(), value.as_str());
    }
    if let Some(data) = &args.data {
        let body: serde_json::Value =
            serde_json::from_str(data).context("--data must be valid JSON")?;
        request = request.with_body(body);
    }

    // Surface bad path parameters before any network traffic
    request.resolved_path()?;
    Ok(request)
}

/// Print the response body, pretty-printing JSON
async fn print_response(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let body = response
        .text()
        .await
        .context("Failed to read response body")?;

    tracing::info!("Response: {}", status);

    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if body.is_empty() => {}
        Err(_) => println!("{}", body),
    }

    Ok(())
}

fn report_error(err: &ApiError, redirect: Option<String>) {
    if err.is_suspended() {
        let details = err.error_body().cloned().unwrap_or_default();
        eprintln!("Account suspended.");
        if let Some(reason) = details.suspend_reason {
            eprintln!("  Reason:   {}", reason);
        }
        if let Some(feedback) = details.suspend_feedback {
            eprintln!("  Feedback: {}", feedback);
        }
        return;
    }

    if let Some(path) = redirect {
        eprintln!("Session ended. Sign in again at {}", path);
    }
}
