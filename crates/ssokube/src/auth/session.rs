//! Device-authorization handshake.
//!
//! A [`DeviceAuthSession`] walks
//! `Registered -> AuthorizationStarted -> Polling` and ends in
//! `TokenObtained`, `Expired` or `Denied`. Polling waits `interval` before
//! every request, backs off by [`SLOW_DOWN_STEP`] on `slow_down`, and never
//! sends a request at or after the authorization deadline.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ssokube_cloud::{ClientRegistration, FederationClient, PollResponse, TokenGrant};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::identity::FederationParams;

/// Poll interval used when the server does not send one.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Interval increase applied on every `slow_down` response.
pub const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Registered,
    AuthorizationStarted,
    Polling,
    TokenObtained,
    Expired,
    Denied,
}

impl SessionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::TokenObtained | Self::Expired | Self::Denied)
    }
}

/// An in-progress device authorization. Never persisted.
#[derive(Debug, Clone)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub interval: Duration,
    pub expires_at: Instant,
}

/// SSO access token for one (start URL, region) pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederationToken {
    pub start_url: String,
    pub region: String,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl FederationToken {
    /// Build a token from a grant received at `now`.
    #[must_use]
    pub fn from_grant(params: &FederationParams, grant: TokenGrant, now: DateTime<Utc>) -> Self {
        let lifetime = chrono::Duration::seconds(i64::try_from(grant.expires_in).unwrap_or(0));
        Self {
            start_url: params.start_url.clone(),
            region: params.region.clone(),
            access_token: grant.access_token,
            expires_at: now + lifetime,
            refresh_token: grant.refresh_token,
        }
    }

    /// Usable only while `now < expires_at`.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for FederationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationToken")
            .field("start_url", &self.start_url)
            .field("region", &self.region)
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Shows the verification URL and code to the user.
pub trait VerificationPrompt: Send + Sync {
    fn show(&self, authorization: &DeviceAuthorization);
}

/// One device-authorization handshake against a federation endpoint.
pub struct DeviceAuthSession<'a> {
    client: &'a dyn FederationClient,
    params: &'a FederationParams,
    registration: ClientRegistration,
    state: SessionState,
}

impl<'a> DeviceAuthSession<'a> {
    /// Start from an existing client registration.
    #[must_use]
    pub fn new(
        client: &'a dyn FederationClient,
        params: &'a FederationParams,
        registration: ClientRegistration,
    ) -> Self {
        Self {
            client,
            params,
            registration,
            state: SessionState::Registered,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Request a device code.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is not freshly registered or the
    /// request fails.
    pub async fn start(&mut self) -> Result<DeviceAuthorization> {
        if self.state != SessionState::Registered {
            return Err(Error::Internal(format!(
                "cannot start device authorization in state {:?}",
                self.state
            )));
        }

        let response = self
            .client
            .start_device_authorization(
                &self.params.region,
                &self.registration,
                &self.params.start_url,
            )
            .await?;

        self.state = SessionState::AuthorizationStarted;
        debug!(user_code = %response.user_code, expires_in = response.expires_in, "Device authorization started");

        Ok(DeviceAuthorization {
            device_code: response.device_code,
            user_code: response.user_code,
            verification_uri: response.verification_uri,
            verification_uri_complete: response.verification_uri_complete,
            interval: response
                .interval
                .filter(|s| *s > 0)
                .map_or(DEFAULT_POLL_INTERVAL, Duration::from_secs),
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        })
    }

    /// Poll until the user approves, denies, or the code expires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Expired`], [`Error::Denied`], [`Error::Cancelled`],
    /// or a non-transient request failure.
    pub async fn poll_for_token(
        &mut self,
        authorization: &DeviceAuthorization,
        cancel: &CancellationToken,
    ) -> Result<FederationToken> {
        if self.state != SessionState::AuthorizationStarted {
            return Err(Error::Internal(format!(
                "cannot poll in state {:?}",
                self.state
            )));
        }
        self.state = SessionState::Polling;

        let mut interval = authorization.interval;
        loop {
            let next_poll = Instant::now() + interval;
            if next_poll >= authorization.expires_at {
                self.state = SessionState::Expired;
                info!("Device authorization expired before approval");
                return Err(Error::Expired);
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = sleep_until(next_poll) => {}
            }

            let response = match self
                .client
                .create_token(
                    &self.params.region,
                    &self.registration,
                    &authorization.device_code,
                )
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let e = Error::from(e);
                    if e.kind() == ErrorKind::Transient {
                        warn!(error = %e, "Token poll failed, polling again");
                        continue;
                    }
                    return Err(e);
                }
            };

            match response {
                PollResponse::Granted(grant) => {
                    self.state = SessionState::TokenObtained;
                    info!(start_url = %self.params.start_url, "Device authorization approved");
                    return Ok(FederationToken::from_grant(self.params, grant, Utc::now()));
                }
                PollResponse::Pending => {
                    debug!("Authorization pending");
                }
                PollResponse::SlowDown => {
                    interval += SLOW_DOWN_STEP;
                    debug!(interval = ?interval, "Server asked to slow down");
                }
                PollResponse::Expired => {
                    self.state = SessionState::Expired;
                    return Err(Error::Expired);
                }
                PollResponse::Denied => {
                    self.state = SessionState::Denied;
                    return Err(Error::Denied);
                }
            }
        }
    }
}
