//! Attempt, refresh credentials on an auth failure, attempt once more.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError};

use ssokube_cloud::{FailureClass, PortalApi, RoleCredentials};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::authenticator::Authenticator;
use super::store::SessionStore;
use crate::error::{Error, Result};
use crate::identity::{FederationParams, Identity, RoleTarget};

/// Wraps every remote operation with one round of credential recovery.
pub struct CredentialRefreshGuard {
    authenticator: Arc<Authenticator>,
    portal: Arc<dyn PortalApi>,
    sessions: Arc<SessionStore>,
    refresh_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CredentialRefreshGuard {
    #[must_use]
    pub fn new(
        authenticator: Arc<Authenticator>,
        portal: Arc<dyn PortalApi>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            authenticator,
            portal,
            sessions,
            refresh_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Run `op`; on an auth failure refresh credentials for `identity` and
    /// run it exactly once more. `op` runs at most twice.
    ///
    /// An identity without federation settings cannot be refreshed and the
    /// original error is returned.
    ///
    /// # Errors
    ///
    /// Returns the non-auth failure of the first attempt, the refresh
    /// failure, or the result of the second attempt.
    pub async fn with_auth<O, F, Fut>(
        &self,
        identity: &Identity,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<O>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<O>>,
    {
        let first = match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_auth_failure() => return Err(e),
            Err(e) => e,
        };

        let Some(params) = identity.federation_params() else {
            debug!(identity = %identity.name, "No federation settings, cannot refresh");
            return Err(first);
        };

        let rejected = matches!(first, Error::Cloud(_));
        info!(identity = %identity.name, error = %first, "Refreshing credentials");
        self.refresh(identity, params, rejected, cancel).await?;

        op().await
    }

    /// Bring credentials for `identity` up to date.
    ///
    /// `rejected` means the remote side refused credentials we still
    /// considered valid, so they are replaced even if they look current.
    async fn refresh(
        &self,
        identity: &Identity,
        params: &FederationParams,
        rejected: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let lock = self.lock_for(&identity.name);
        let _guard = lock.lock().await;

        let Some(role) = &identity.role else {
            if rejected {
                self.authenticator.invalidate(params).await?;
            }
            self.authenticator.ensure_token(params, cancel).await?;
            return Ok(());
        };

        if !rejected && self.sessions.has_valid(identity) {
            debug!(identity = %identity.name, "Session refreshed by another task");
            return Ok(());
        }

        let credentials = self.fetch_role_credentials(params, role, cancel).await?;
        self.sessions.store(identity, credentials);
        Ok(())
    }

    async fn fetch_role_credentials(
        &self,
        params: &FederationParams,
        role: &RoleTarget,
        cancel: &CancellationToken,
    ) -> Result<RoleCredentials> {
        let token = self.authenticator.ensure_token(params, cancel).await?;
        match self
            .portal
            .get_role_credentials(
                &params.region,
                &token.access_token,
                &role.account_id,
                &role.role_name,
            )
            .await
        {
            Ok(credentials) => Ok(credentials),
            Err(e) if e.class() == FailureClass::Unauthorized => {
                warn!(start_url = %params.start_url, "SSO token rejected, signing in again");
                self.authenticator.invalidate(params).await?;
                let token = self.authenticator.ensure_token(params, cancel).await?;
                Ok(self
                    .portal
                    .get_role_credentials(
                        &params.region,
                        &token.access_token,
                        &role.account_id,
                        &role.role_name,
                    )
                    .await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }
}
