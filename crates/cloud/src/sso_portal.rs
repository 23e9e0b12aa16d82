//! SSO portal client: accounts, roles and role credentials for a bearer token.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::CloudError;
use crate::http::{build_client, handle_response, join};
use crate::models::{
    AccountInfo, GetRoleCredentialsResponse, ListAccountRolesResponse, ListAccountsResponse,
    RoleCredentials, RoleInfo,
};

/// Header carrying the SSO access token.
const BEARER_HEADER: &str = "x-amz-sso_bearer_token";

/// Page size requested from list operations.
const PAGE_SIZE: &str = "100";

/// Operations against the SSO portal.
#[async_trait]
pub trait PortalApi: Send + Sync {
    /// List every account visible to `access_token`.
    async fn list_accounts(
        &self,
        region: &str,
        access_token: &str,
    ) -> Result<Vec<AccountInfo>, CloudError>;

    /// List the roles the user may assume in `account_id`.
    async fn list_account_roles(
        &self,
        region: &str,
        access_token: &str,
        account_id: &str,
    ) -> Result<Vec<RoleInfo>, CloudError>;

    /// Exchange the access token for temporary role credentials.
    async fn get_role_credentials(
        &self,
        region: &str,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials, CloudError>;
}

/// HTTP client for `portal.sso.{region}.amazonaws.com`.
#[derive(Clone)]
pub struct SsoPortalClient {
    client: Client,
    endpoint_override: Option<String>,
}

impl SsoPortalClient {
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
            .unwrap_or_else(|| format!("https://portal.sso.{region}.amazonaws.com"))
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        region: &str,
        access_token: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CloudError> {
        let url = join(&self.endpoint(region), path);
        debug!(url = %url, "SSO portal request");
        let response = self
            .client
            .get(&url)
            .header(BEARER_HEADER, access_token)
            .query(query)
            .send()
            .await?;
        handle_response(response).await
    }
}

#[async_trait]
impl PortalApi for SsoPortalClient {
    async fn list_accounts(
        &self,
        region: &str,
        access_token: &str,
    ) -> Result<Vec<AccountInfo>, CloudError> {
        let mut accounts = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut query = vec![("max_result", PAGE_SIZE)];
            if let Some(token) = next_token.as_deref() {
                query.push(("next_token", token));
            }

            let page: ListAccountsResponse = self
                .get(region, access_token, "/assignment/accounts", &query)
                .await?;
            accounts.extend(page.account_list);

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        debug!(count = accounts.len(), "Listed SSO accounts");
        Ok(accounts)
    }

    async fn list_account_roles(
        &self,
        region: &str,
        access_token: &str,
        account_id: &str,
    ) -> Result<Vec<RoleInfo>, CloudError> {
        let mut roles = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut query = vec![("account_id", account_id), ("max_result", PAGE_SIZE)];
            if let Some(token) = next_token.as_deref() {
                query.push(("next_token", token));
            }

            let page: ListAccountRolesResponse = self
                .get(region, access_token, "/assignment/roles", &query)
                .await?;
            roles.extend(page.role_list);

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        debug!(account = %account_id, count = roles.len(), "Listed account roles");
        Ok(roles)
    }

    async fn get_role_credentials(
        &self,
        region: &str,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials, CloudError> {
        let response: GetRoleCredentialsResponse = self
            .get(
                region,
                access_token,
                "/federation/credentials",
                &[("account_id", account_id), ("role_name", role_name)],
            )
            .await?;
        Ok(response.role_credentials)
    }
}
