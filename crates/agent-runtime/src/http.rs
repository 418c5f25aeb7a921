//! Shared HTTP plumbing for the provider adapters.

use std::time::Duration;

use agent_core::error::{ProviderError, ProviderErrorKind};
use reqwest::{Client, Response, StatusCode};

/// Default per-request timeout for provider calls
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Client with the provider timeout applied
pub fn client(timeout_secs: u64) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ProviderError::unknown(format!("HTTP client setup failed: {e}")))
}

/// Map an HTTP status onto a provider error kind
pub const fn classify_status(status: StatusCode) -> ProviderErrorKind {
    match status.as_u16() {
        401 | 403 => ProviderErrorKind::Auth,
        429 => ProviderErrorKind::RateLimit,
        400 | 404 | 413 | 422 => ProviderErrorKind::InvalidRequest,
        500..=599 => ProviderErrorKind::Transport,
        _ => ProviderErrorKind::Unknown,
    }
}

/// Connection failures and timeouts are transport errors
pub fn from_reqwest(provider: &str, error: &reqwest::Error) -> ProviderError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        return ProviderError::transport(format!("{provider}: {error}"));
    }
    if let Some(status) = error.status() {
        return ProviderError::new(classify_status(status), format!("{provider}: {error}"));
    }
    if error.is_decode() || error.is_body() {
        return ProviderError::unknown(format!("{provider}: invalid response: {error}"));
    }
    ProviderError::transport(format!("{provider}: {error}"))
}

/// Turn a non-success response into a classified error
pub async fn check(provider: &str, response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(provider, status = %status, body = %body, "Provider API error");
    Err(ProviderError::new(
        classify_status(status),
        format!("{provider} returned status {status}: {body}"),
    ))
}
