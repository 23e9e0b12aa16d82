//! Request and response models for the SSO OIDC, SSO portal and EKS APIs.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// SSO OIDC types
// ============================================================================

/// Client registration returned by `RegisterClient`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegistration {
    /// Client identifier.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
    /// Issue time, seconds since epoch.
    #[serde(default)]
    pub client_id_issued_at: i64,
    /// Secret expiry, seconds since epoch. Zero means no expiry was reported.
    #[serde(default)]
    pub client_secret_expires_at: i64,
}

impl ClientRegistration {
    /// Whether the client secret is no longer usable at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.client_secret_expires_at > 0 && now.timestamp() >= self.client_secret_expires_at
    }
}

/// Body of `RegisterClient`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegisterClientRequest<'a> {
    pub client_name: &'a str,
    pub client_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<&'a [String]>,
}

/// Body of `StartDeviceAuthorization`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartDeviceAuthorizationRequest<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub start_url: &'a str,
}

/// Response of `StartDeviceAuthorization`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuthorizationResponse {
    /// Code the client polls with.
    pub device_code: String,
    /// Code the user confirms in the browser.
    pub user_code: String,
    /// Verification page.
    pub verification_uri: String,
    /// Verification page with the user code pre-filled.
    pub verification_uri_complete: String,
    /// Seconds until the device code expires.
    pub expires_in: u64,
    /// Minimum seconds between token polls.
    #[serde(default)]
    pub interval: Option<u64>,
}

/// Body of `CreateToken`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateTokenRequest<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub grant_type: &'a str,
    pub device_code: &'a str,
}

/// Successful `CreateToken` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    /// Bearer token for the SSO portal.
    pub access_token: String,
    /// Seconds until the access token expires.
    pub expires_in: u64,
    /// Refresh token, if the client was registered with refresh scopes.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token type (normally `Bearer`).
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Outcome of a single token poll.
#[derive(Debug, Clone)]
pub enum PollResponse {
    /// The user approved the request.
    Granted(TokenGrant),
    /// The user has not acted yet.
    Pending,
    /// The client is polling too fast.
    SlowDown,
    /// The device code expired.
    Expired,
    /// The user rejected the request.
    Denied,
}

/// OAuth error body returned with HTTP 400 by `CreateToken`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

// ============================================================================
// SSO portal types
// ============================================================================

/// An AWS account visible to the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    /// 12-digit account id.
    pub account_id: String,
    /// Display name.
    #[serde(default)]
    pub account_name: Option<String>,
    /// Root email address.
    #[serde(default)]
    pub email_address: Option<String>,
}

/// A permission set (role) the user can assume in an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleInfo {
    /// Role name.
    pub role_name: String,
    /// Account the role belongs to.
    pub account_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListAccountsResponse {
    #[serde(default)]
    pub account_list: Vec<AccountInfo>,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListAccountRolesResponse {
    #[serde(default)]
    pub role_list: Vec<RoleInfo>,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetRoleCredentialsResponse {
    pub role_credentials: RoleCredentials,
}

/// Temporary credentials for an assumed role.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleCredentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token.
    pub session_token: String,
    /// Expiry, milliseconds since epoch.
    pub expiration: i64,
}

impl RoleCredentials {
    /// Expiry as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.expiration)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether the credentials are unusable at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

impl std::fmt::Debug for RoleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

// ============================================================================
// EKS types
// ============================================================================

/// EKS cluster information.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EksCluster {
    /// Cluster name.
    pub name: String,
    /// Cluster ARN.
    pub arn: String,
    /// Kubernetes version.
    #[serde(default)]
    pub version: Option<String>,
    /// Cluster status.
    #[serde(default)]
    pub status: Option<String>,
    /// API server endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Cluster CA bundle.
    #[serde(default)]
    pub certificate_authority: Option<CertificateAuthority>,
    /// Tags.
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Base64 encoded cluster CA.
#[derive(Debug, Clone, Deserialize)]
pub struct CertificateAuthority {
    /// PEM bundle, base64 encoded.
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListClustersResponse {
    #[serde(default)]
    pub clusters: Vec<String>,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DescribeClusterResponse {
    pub cluster: EksCluster,
}

/// AWS JSON error body (`__type` or `code` plus `message`).
#[derive(Debug, Default, Deserialize)]
pub(crate) struct AwsErrorBody {
    #[serde(rename = "__type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, alias = "Message")]
    pub message: Option<String>,
}

impl AwsErrorBody {
    /// Service error code with any `prefix#` namespace stripped.
    pub fn code(&self) -> Option<&str> {
        self.error_type
            .as_deref()
            .or(self.code.as_deref())
            .map(|c| c.rsplit('#').next().unwrap_or(c))
            .map(|c| c.split(':').next().unwrap_or(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_credentials_expiry() {
        let creds = RoleCredentials {
            access_key_id: "ASIA".into(),
            secret_access_key: "secret".into(),
            session_token: "token".into(),
            expiration: 1_700_000_000_000,
        };
        let before = Utc.timestamp_opt(1_699_999_999, 0).unwrap();
        let after = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert!(!creds.is_expired_at(before));
        assert!(creds.is_expired_at(after));
        assert!(!format!("{creds:?}").contains("secret\""));
    }

    #[test]
    fn test_aws_error_code_strips_namespace() {
        let body: AwsErrorBody = serde_json::from_str(
            r#"{"__type":"com.amazonaws.eks#ResourceNotFoundException","message":"nope"}"#,
        )
        .unwrap();
        assert_eq!(body.code(), Some("ResourceNotFoundException"));
    }

    #[test]
    fn test_registration_without_expiry_never_expires() {
        let reg = ClientRegistration {
            client_id: "id".into(),
            client_secret: "secret".into(),
            client_id_issued_at: 0,
            client_secret_expires_at: 0,
        };
        assert!(!reg.is_expired_at(Utc::now()));
    }
}
