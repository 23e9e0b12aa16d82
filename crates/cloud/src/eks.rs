//! EKS client: list and describe clusters with SigV4-signed requests.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::CloudError;
use crate::http::{build_client, handle_response, join};
use crate::models::{DescribeClusterResponse, EksCluster, ListClustersResponse, RoleCredentials};
use crate::sigv4::{sign, SigningParams};

const SERVICE: &str = "eks";
const PAGE_SIZE: &str = "100";

/// Cluster inventory operations.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Names of every cluster in `region`.
    async fn list_clusters(
        &self,
        region: &str,
        credentials: &RoleCredentials,
    ) -> Result<Vec<String>, CloudError>;

    /// Full description of cluster `name`.
    async fn describe_cluster(
        &self,
        region: &str,
        credentials: &RoleCredentials,
        name: &str,
    ) -> Result<EksCluster, CloudError>;
}

/// HTTP client for `eks.{region}.amazonaws.com`.
#[derive(Clone)]
pub struct EksClient {
    client: Client,
    endpoint_override: Option<String>,
}

impl EksClient {
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
            .unwrap_or_else(|| format!("https://eks.{region}.amazonaws.com"))
    }

    async fn signed_get<T: serde::de::DeserializeOwned>(
        &self,
        region: &str,
        credentials: &RoleCredentials,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CloudError> {
        let mut url = Url::parse(&join(&self.endpoint(region), path))
            .map_err(|e| CloudError::Config(format!("invalid EKS endpoint: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        let params = SigningParams {
            credentials,
            region,
            service: SERVICE,
            time: Utc::now(),
        };
        let headers = sign("GET", &url, &[], b"", &params)?;

        debug!(url = %url, "EKS request");
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        handle_response(request.send().await?).await
    }
}

#[async_trait]
impl ClusterApi for EksClient {
    async fn list_clusters(
        &self,
        region: &str,
        credentials: &RoleCredentials,
    ) -> Result<Vec<String>, CloudError> {
        let mut clusters = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut query = vec![("maxResults", PAGE_SIZE)];
            if let Some(token) = next_token.as_deref() {
                query.push(("nextToken", token));
            }

            let page: ListClustersResponse = self
                .signed_get(region, credentials, "/clusters", &query)
                .await?;
            clusters.extend(page.clusters);

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        debug!(region = %region, count = clusters.len(), "Listed EKS clusters");
        Ok(clusters)
    }

    async fn describe_cluster(
        &self,
        region: &str,
        credentials: &RoleCredentials,
        name: &str,
    ) -> Result<EksCluster, CloudError> {
        let path = format!("/clusters/{name}");
        let response: DescribeClusterResponse = self
            .signed_get(region, credentials, &path, &[])
            .await?;
        Ok(response.cluster)
    }
}
