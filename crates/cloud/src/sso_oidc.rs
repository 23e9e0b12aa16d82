//! SSO OIDC client: client registration and the device-authorization grant.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::CloudError;
use crate::http::{build_client, error_from_body, handle_response, join};
use crate::models::{
    AwsErrorBody, ClientRegistration, CreateTokenRequest, DeviceAuthorizationResponse,
    OAuthErrorBody, PollResponse, RegisterClientRequest, StartDeviceAuthorizationRequest,
    TokenGrant,
};

/// Grant type for polling a device code.
pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// The federation device-authorization protocol.
#[async_trait]
pub trait FederationClient: Send + Sync {
    /// Register a public client for the regional OIDC endpoint.
    async fn register_client(
        &self,
        region: &str,
        client_name: &str,
    ) -> Result<ClientRegistration, CloudError>;

    /// Begin a device authorization for `start_url`.
    async fn start_device_authorization(
        &self,
        region: &str,
        registration: &ClientRegistration,
        start_url: &str,
    ) -> Result<DeviceAuthorizationResponse, CloudError>;

    /// Poll once for the token belonging to `device_code`.
    async fn create_token(
        &self,
        region: &str,
        registration: &ClientRegistration,
        device_code: &str,
    ) -> Result<PollResponse, CloudError>;
}

/// HTTP client for `oidc.{region}.amazonaws.com`.
#[derive(Clone)]
pub struct SsoOidcClient {
    client: Client,
    endpoint_override: Option<String>,
}

impl SsoOidcClient {
    /// Create a client talking to the public regional endpoints.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new() -> Result<Self, CloudError> {
        Ok(Self {
            client: build_client()?,
            endpoint_override: None,
        })
    }

    /// Send every request to `endpoint` instead of the regional default.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    fn endpoint(&self, region: &str) -> String {
        self.endpoint_override
            .clone()
            .unwrap_or_else(|| format!("https://oidc.{region}.amazonaws.com"))
    }

    async fn post<B: serde::Serialize + Sync, T: serde::de::DeserializeOwned>(
        &self,
        region: &str,
        path: &str,
        body: &B,
    ) -> Result<T, CloudError> {
        let url = join(&self.endpoint(region), path);
        debug!(url = %url, "SSO OIDC request");
        let response = self.client.post(&url).json(body).send().await?;
        handle_response(response).await
    }
}

#[async_trait]
impl FederationClient for SsoOidcClient {
    async fn register_client(
        &self,
        region: &str,
        client_name: &str,
    ) -> Result<ClientRegistration, CloudError> {
        let body = RegisterClientRequest {
            client_name,
            client_type: "public",
            scopes: None,
        };
        self.post(region, "/client/register", &body).await
    }

    async fn start_device_authorization(
        &self,
        region: &str,
        registration: &ClientRegistration,
        start_url: &str,
    ) -> Result<DeviceAuthorizationResponse, CloudError> {
        let body = StartDeviceAuthorizationRequest {
            client_id: &registration.client_id,
            client_secret: &registration.client_secret,
            start_url,
        };
        self.post(region, "/device_authorization", &body).await
    }

    async fn create_token(
        &self,
        region: &str,
        registration: &ClientRegistration,
        device_code: &str,
    ) -> Result<PollResponse, CloudError> {
        let body = CreateTokenRequest {
            client_id: &registration.client_id,
            client_secret: &registration.client_secret,
            grant_type: DEVICE_CODE_GRANT,
            device_code,
        };
        let url = join(&self.endpoint(region), "/token");
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            let grant: TokenGrant = serde_json::from_str(&text)?;
            return Ok(PollResponse::Granted(grant));
        }

        if let Some(pending) = poll_state_from_error(&text) {
            debug!(state = ?pending, "Device authorization not granted yet");
            return Ok(pending);
        }

        Err(error_from_body(status.as_u16(), &text))
    }
}

/// Recognise the non-terminal and terminal OAuth errors of the token endpoint.
fn poll_state_from_error(text: &str) -> Option<PollResponse> {
    if let Ok(body) = serde_json::from_str::<OAuthErrorBody>(text) {
        let state = match body.error.as_str() {
            "authorization_pending" => Some(PollResponse::Pending),
            "slow_down" => Some(PollResponse::SlowDown),
            "expired_token" => Some(PollResponse::Expired),
            "access_denied" => Some(PollResponse::Denied),
            _ => None,
        };
        if state.is_some() {
            return state;
        }
        debug!(error = %body.error, description = ?body.error_description, "Unrecognised OAuth error");
    }

    let body: AwsErrorBody = serde_json::from_str(text).ok()?;
    match body.code()? {
        "AuthorizationPendingException" => Some(PollResponse::Pending),
        "SlowDownException" => Some(PollResponse::SlowDown),
        "ExpiredTokenException" => Some(PollResponse::Expired),
        "AccessDeniedException" => Some(PollResponse::Denied),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_state_from_oauth_error() {
        assert!(matches!(
            poll_state_from_error(r#"{"error":"authorization_pending"}"#),
            Some(PollResponse::Pending)
        ));
        assert!(matches!(
            poll_state_from_error(r#"{"error":"slow_down","error_description":"wait"}"#),
            Some(PollResponse::SlowDown)
        ));
        assert!(matches!(
            poll_state_from_error(r#"{"error":"access_denied"}"#),
            Some(PollResponse::Denied)
        ));
    }

    #[test]
    fn test_poll_state_from_aws_error_type() {
        assert!(matches!(
            poll_state_from_error(r#"{"__type":"ExpiredTokenException","message":"gone"}"#),
            Some(PollResponse::Expired)
        ));
        assert!(poll_state_from_error(r#"{"error":"invalid_client"}"#).is_none());
        assert!(poll_state_from_error("not json").is_none());
    }
}
