//! SSO sign-in: cached tokens first, device authorization otherwise.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use chrono::Utc;
use ssokube_cloud::{ClientRegistration, FederationClient};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::cache::TokenCache;
use super::session::{DeviceAuthSession, FederationToken, VerificationPrompt};
use crate::error::{Error, Result};
use crate::identity::FederationParams;

/// Client name sent when registering with the OIDC endpoint.
pub const CLIENT_NAME: &str = "ssokube";

/// Obtains SSO tokens, at most one handshake per endpoint at a time.
pub struct Authenticator {
    client: Arc<dyn FederationClient>,
    cache: Arc<TokenCache>,
    prompt: Arc<dyn VerificationPrompt>,
    registrations: Mutex<HashMap<FederationParams, ClientRegistration>>,
    refresh_locks: std::sync::Mutex<HashMap<FederationParams, Arc<Mutex<()>>>>,
}

impl Authenticator {
    #[must_use]
    pub fn new(
        client: Arc<dyn FederationClient>,
        cache: Arc<TokenCache>,
        prompt: Arc<dyn VerificationPrompt>,
    ) -> Self {
        Self {
            client,
            cache,
            prompt,
            registrations: Mutex::new(HashMap::new()),
            refresh_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// The cached token for `params`, without signing in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthExpired`] when no valid token is cached.
    pub async fn current_token(&self, params: &FederationParams) -> Result<FederationToken> {
        self.cache
            .load(params)
            .await?
            .ok_or_else(|| Error::AuthExpired(params.start_url.clone()))
    }

    /// A valid token for `params`, signing in interactively if needed.
    ///
    /// Concurrent callers for the same endpoint wait for a single handshake.
    ///
    /// # Errors
    ///
    /// Returns the handshake failure ([`Error::Denied`], [`Error::Expired`],
    /// a request error) or a cache write failure.
    pub async fn ensure_token(
        &self,
        params: &FederationParams,
        cancel: &CancellationToken,
    ) -> Result<FederationToken> {
        if let Some(token) = self.cache.load(params).await? {
            return Ok(token);
        }

        let lock = self.lock_for(params);
        let _guard = lock.lock().await;

        if let Some(token) = self.cache.load(params).await? {
            debug!(start_url = %params.start_url, "Token refreshed by another task");
            return Ok(token);
        }

        self.login(params, cancel).await
    }

    /// Run a device-authorization handshake and cache the token.
    ///
    /// # Errors
    ///
    /// Returns the handshake failure or a cache write failure.
    pub async fn login(
        &self,
        params: &FederationParams,
        cancel: &CancellationToken,
    ) -> Result<FederationToken> {
        let registration = self.registration(params).await?;
        let mut session = DeviceAuthSession::new(self.client.as_ref(), params, registration);

        let authorization = session.start().await?;
        self.prompt.show(&authorization);

        let token = session.poll_for_token(&authorization, cancel).await?;
        let path = self.cache.save(&token).await?;
        info!(start_url = %params.start_url, cache = %path.display(), "Signed in");
        Ok(token)
    }

    /// Forget the cached token for `params`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache file cannot be removed.
    pub async fn invalidate(&self, params: &FederationParams) -> Result<bool> {
        self.cache.remove(params).await
    }

    async fn registration(&self, params: &FederationParams) -> Result<ClientRegistration> {
        let mut registrations = self.registrations.lock().await;
        if let Some(existing) = registrations.get(params) {
            if !existing.is_expired_at(Utc::now()) {
                return Ok(existing.clone());
            }
            debug!(region = %params.region, "Client registration expired, registering again");
        }

        let registration = self
            .client
            .register_client(&params.region, CLIENT_NAME)
            .await?;
        debug!(region = %params.region, client_id = %registration.client_id, "Registered OIDC client");
        registrations.insert(params.clone(), registration.clone());
        Ok(registration)
    }

    fn lock_for(&self, params: &FederationParams) -> Arc<Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(params.clone()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use ssokube_cloud::PollResponse;

    use super::*;
    use crate::testing::{federation_params as params, RecordingPrompt, ScriptedFederation};

    #[tokio::test(start_paused = true)]
    async fn test_login_caches_token_and_reuses_registration() {
        let dir = tempfile::tempdir().unwrap();
        let federation = Arc::new(ScriptedFederation::new(
            600,
            Some(1),
            vec![
                ScriptedFederation::granted("first"),
                ScriptedFederation::granted("second"),
            ],
        ));
        let prompt = Arc::new(RecordingPrompt::default());
        let auth = Authenticator::new(
            federation.clone(),
            Arc::new(TokenCache::new(dir.path())),
            prompt.clone(),
        );
        let cancel = CancellationToken::new();

        let token = auth.login(&params(), &cancel).await.unwrap();
        assert_eq!(token.access_token, "first");
        assert_eq!(auth.current_token(&params()).await.unwrap().access_token, "first");

        auth.login(&params(), &cancel).await.unwrap();
        assert_eq!(*federation.registrations.lock().unwrap(), 1);
        assert_eq!(prompt.shown.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_token_skips_handshake_when_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(TokenCache::new(dir.path()));
        cache
            .save(&FederationToken {
                start_url: params().start_url,
                region: params().region,
                access_token: "cached".into(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
                refresh_token: None,
            })
            .await
            .unwrap();

        let federation = Arc::new(ScriptedFederation::new(600, Some(1), Vec::new()));
        let auth = Authenticator::new(
            federation.clone(),
            cache,
            Arc::new(RecordingPrompt::default()),
        );

        let token = auth
            .ensure_token(&params(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(token.access_token, "cached");
        assert_eq!(*federation.authorizations.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_ensure_token_runs_one_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let federation = Arc::new(ScriptedFederation::new(
            600,
            Some(1),
            vec![PollResponse::Pending, ScriptedFederation::granted("shared")],
        ));
        let auth = Arc::new(Authenticator::new(
            federation.clone(),
            Arc::new(TokenCache::new(dir.path())),
            Arc::new(RecordingPrompt::default()),
        ));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let auth = Arc::clone(&auth);
            handles.push(tokio::spawn(async move {
                auth.ensure_token(&params(), &CancellationToken::new())
                    .await
                    .unwrap()
                    .access_token
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "shared");
        }
        assert_eq!(*federation.authorizations.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_current_token_without_cache_is_auth_expired() {
        let dir = tempfile::tempdir().unwrap();
        let auth = Authenticator::new(
            Arc::new(ScriptedFederation::new(600, None, Vec::new())),
            Arc::new(TokenCache::new(dir.path())),
            Arc::new(RecordingPrompt::default()),
        );
        let err = auth.current_token(&params()).await.unwrap_err();
        assert!(err.is_auth_failure());
    }
}
