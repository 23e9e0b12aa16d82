//! Shared HTTP plumbing for the API clients.

use std::time::Duration;

use reqwest::Client;
use tracing::warn;

use crate::error::{from_status, CloudError};
use crate::models::AwsErrorBody;

/// Default timeout for API requests.
pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Build the HTTP client used by every API client.
pub(crate) fn build_client() -> Result<Client, CloudError> {
    Client::builder()
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .user_agent(concat!("ssokube/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(CloudError::Http)
}

/// Handle an API response: decode JSON on success, classify the error otherwise.
pub(crate) async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, CloudError> {
    let status = response.status();
    let text = response.text().await?;

    if status.is_success() {
        serde_json::from_str(&text).map_err(|e| {
            warn!(error = %e, body = %text, "Failed to parse response");
            CloudError::Serialization(e)
        })
    } else {
        Err(error_from_body(status.as_u16(), &text))
    }
}

/// Turn an error response body into a [`CloudError`].
pub(crate) fn error_from_body(status: u16, text: &str) -> CloudError {
    let body: AwsErrorBody = serde_json::from_str(text).unwrap_or_default();
    let message = body
        .message
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| text.to_string());
    from_status(status, body.code(), message)
}

/// Join a base URL and a path without doubling slashes.
pub(crate) fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
