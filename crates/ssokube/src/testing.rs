//! Test doubles for the remote APIs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use ssokube_cloud::{
    AccountInfo, ClientRegistration, CloudError, ClusterApi, DeviceAuthorizationResponse,
    EksCluster, FederationClient, PollResponse, PortalApi, RoleCredentials, RoleInfo, TokenGrant,
};
use tokio::time::Instant;

use crate::auth::{
    Authenticator, CredentialRefreshGuard, DeviceAuthorization, FederationToken, SessionStore,
    TokenCache, VerificationPrompt,
};
use crate::identity::FederationParams;

/// Scripted federation endpoint that records when each poll arrives.
pub(crate) struct ScriptedFederation {
    pub expires_in: u64,
    pub interval: Option<u64>,
    pub responses: Mutex<VecDeque<PollResponse>>,
    pub polls: Mutex<Vec<Instant>>,
    pub registrations: Mutex<usize>,
    pub authorizations: Mutex<usize>,
}

impl ScriptedFederation {
    pub(crate) fn new(expires_in: u64, interval: Option<u64>, responses: Vec<PollResponse>) -> Self {
        Self {
            expires_in,
            interval,
            responses: Mutex::new(responses.into()),
            polls: Mutex::new(Vec::new()),
            registrations: Mutex::new(0),
            authorizations: Mutex::new(0),
        }
    }

    pub(crate) fn granted(token: &str) -> PollResponse {
        PollResponse::Granted(TokenGrant {
            access_token: token.to_string(),
            expires_in: 3600,
            refresh_token: None,
            token_type: Some("Bearer".into()),
        })
    }
}

#[async_trait]
impl FederationClient for ScriptedFederation {
    async fn register_client(
        &self,
        _region: &str,
        client_name: &str,
    ) -> std::result::Result<ClientRegistration, CloudError> {
        *self.registrations.lock().unwrap() += 1;
        Ok(ClientRegistration {
            client_id: format!("{client_name}-id"),
            client_secret: "secret".into(),
            client_id_issued_at: 0,
            client_secret_expires_at: 0,
        })
    }

    async fn start_device_authorization(
        &self,
        _region: &str,
        _registration: &ClientRegistration,
        _start_url: &str,
    ) -> std::result::Result<DeviceAuthorizationResponse, CloudError> {
        *self.authorizations.lock().unwrap() += 1;
        Ok(DeviceAuthorizationResponse {
            device_code: "device".into(),
            user_code: "ABCD-EFGH".into(),
            verification_uri: "https://device.example".into(),
            verification_uri_complete: "https://device.example?user_code=ABCD-EFGH".into(),
            expires_in: self.expires_in,
            interval: self.interval,
        })
    }

    async fn create_token(
        &self,
        _region: &str,
        _registration: &ClientRegistration,
        _device_code: &str,
    ) -> std::result::Result<PollResponse, CloudError> {
        self.polls.lock().unwrap().push(Instant::now());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PollResponse::Pending))
    }
}


/// Records every prompt instead of printing it.
#[derive(Default)]
pub(crate) struct RecordingPrompt {
    pub shown: Mutex<Vec<String>>,
}

impl VerificationPrompt for RecordingPrompt {
    fn show(&self, authorization: &DeviceAuthorization) {
        self.shown
            .lock()
            .unwrap()
            .push(authorization.user_code.clone());
    }
}

pub(crate) fn federation_params() -> FederationParams {
    FederationParams {
        start_url: "https://corp.awsapps.com/start".into(),
        region: "eu-west-1".into(),
    }
}

pub(crate) fn valid_token(params: &FederationParams) -> FederationToken {
    FederationToken {
        start_url: params.start_url.clone(),
        region: params.region.clone(),
        access_token: "cached-token".into(),
        expires_at: Utc::now() + chrono::Duration::hours(1),
        refresh_token: None,
    }
}

/// SSO portal with a fixed account and role inventory.
///
/// Issued credentials carry `"{account}-{role}"` as access key id so fake
/// cluster APIs can tell which account a call is for.
#[derive(Default)]
pub(crate) struct FakePortal {
    pub accounts: Vec<AccountInfo>,
    pub roles: HashMap<String, Vec<String>>,
    pub account_calls: AtomicUsize,
    pub role_calls: AtomicUsize,
    pub credential_calls: AtomicUsize,
}

impl FakePortal {
    pub(crate) fn with_accounts(accounts: Vec<(&str, Vec<&str>)>) -> Self {
        Self {
            accounts: accounts
                .iter()
                .map(|(id, _)| AccountInfo {
                    account_id: (*id).to_string(),
                    account_name: Some(format!("account-{id}")),
                    email_address: None,
                })
                .collect(),
            roles: accounts
                .iter()
                .map(|(id, roles)| {
                    (
                        (*id).to_string(),
                        roles.iter().map(|r| (*r).to_string()).collect(),
                    )
                })
                .collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl PortalApi for FakePortal {
    async fn list_accounts(
        &self,
        _region: &str,
        _access_token: &str,
    ) -> std::result::Result<Vec<AccountInfo>, CloudError> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.accounts.clone())
    }

    async fn list_account_roles(
        &self,
        _region: &str,
        _access_token: &str,
        account_id: &str,
    ) -> std::result::Result<Vec<RoleInfo>, CloudError> {
        self.role_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .roles
            .get(account_id)
            .map(|roles| {
                roles
                    .iter()
                    .map(|r| RoleInfo {
                        role_name: r.clone(),
                        account_id: account_id.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_role_credentials(
        &self,
        _region: &str,
        _access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> std::result::Result<RoleCredentials, CloudError> {
        self.credential_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RoleCredentials {
            access_key_id: format!("{account_id}-{role_name}"),
            secret_access_key: "secret".into(),
            session_token: "session".into(),
            expiration: (Utc::now() + chrono::Duration::hours(1)).timestamp_millis(),
        })
    }
}

/// How a fake cluster endpoint misbehaves.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    Unauthorized,
    Transient,
}

/// EKS stand-in keyed by (account, region).
#[derive(Default)]
pub(crate) struct FakeClusters {
    pub inventory: HashMap<(String, String), Vec<String>>,
    pub failures: HashMap<(String, String), Failure>,
    pub list_calls: Mutex<HashMap<(String, String), usize>>,
}

impl FakeClusters {
    pub(crate) fn add(&mut self, account: &str, region: &str, clusters: &[&str]) {
        self.inventory.insert(
            (account.to_string(), region.to_string()),
            clusters.iter().map(|c| (*c).to_string()).collect(),
        );
    }

    pub(crate) fn fail(&mut self, account: &str, region: &str, failure: Failure) {
        self.failures
            .insert((account.to_string(), region.to_string()), failure);
    }

    pub(crate) fn calls(&self, account: &str, region: &str) -> usize {
        self.list_calls
            .lock()
            .unwrap()
            .get(&(account.to_string(), region.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn account_of(credentials: &RoleCredentials) -> String {
        credentials
            .access_key_id
            .split('-')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl ClusterApi for FakeClusters {
    async fn list_clusters(
        &self,
        region: &str,
        credentials: &RoleCredentials,
    ) -> std::result::Result<Vec<String>, CloudError> {
        let key = (Self::account_of(credentials), region.to_string());
        *self.list_calls.lock().unwrap().entry(key.clone()).or_default() += 1;
        match self.failures.get(&key) {
            Some(Failure::Unauthorized) => {
                Err(CloudError::Unauthorized("security token expired".into()))
            }
            Some(Failure::Transient) => Err(CloudError::Throttled("rate exceeded".into())),
            None => Ok(self.inventory.get(&key).cloned().unwrap_or_default()),
        }
    }

    async fn describe_cluster(
        &self,
        region: &str,
        credentials: &RoleCredentials,
        name: &str,
    ) -> std::result::Result<EksCluster, CloudError> {
        let account = Self::account_of(credentials);
        Ok(EksCluster {
            name: name.to_string(),
            arn: format!("arn:aws:eks:{region}:{account}:cluster/{name}"),
            version: Some("1.29".into()),
            status: Some("ACTIVE".into()),
            endpoint: Some(format!("https://{name}.{region}.eks.amazonaws.com")),
            certificate_authority: None,
            tags: HashMap::new(),
        })
    }
}

/// A guard whose token cache already holds a valid SSO token.
pub(crate) async fn guard_with_cached_token(
    dir: &std::path::Path,
    portal: Arc<dyn PortalApi>,
) -> (Arc<CredentialRefreshGuard>, Arc<ScriptedFederation>) {
    let cache = Arc::new(TokenCache::new(dir));
    cache.save(&valid_token(&federation_params())).await.unwrap();
    let federation = Arc::new(ScriptedFederation::new(600, Some(1), Vec::new()));
    let authenticator = Arc::new(Authenticator::new(
        federation.clone(),
        cache,
        Arc::new(RecordingPrompt::default()),
    ));
    let guard = Arc::new(CredentialRefreshGuard::new(
        authenticator,
        portal,
        Arc::new(SessionStore::new()),
    ));
    (guard, federation)
}
