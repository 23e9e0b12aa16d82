//! CLI commands.
//!
//! Each command is a `clap::Args` struct with an async `run`. Commands share
//! a [`Context`] holding the loaded configuration, the remote clients and
//! the credential refresh guard.

pub mod contexts;
pub mod discover;
pub mod login;
pub mod logout;
pub mod sync;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use ssokube_cloud::{ClusterApi, EksClient, PortalApi, SsoOidcClient, SsoPortalClient};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::auth::{Authenticator, CredentialRefreshGuard, SessionStore, TokenCache};
use crate::config::{AppConfig, OrchestratorConfig, OrchestratorSettings};
use crate::discovery::{DiscoveryRequest, RoleSelector};
use crate::error::Error;
use crate::identity::{Identity, IdentityKind};
use crate::ui::{self, TerminalPrompt};

/// How a command run ended, mapped to the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Everything, or at least one task, succeeded.
    Success,
    /// Every task failed.
    Failed,
}

impl Outcome {
    #[must_use]
    pub fn from_overall_failure(failed: bool) -> Self {
        if failed {
            Self::Failed
        } else {
            Self::Success
        }
    }
}

/// Shared state for one CLI invocation.
pub struct Context {
    pub config: AppConfig,
    pub guard: Arc<CredentialRefreshGuard>,
    pub portal: Arc<dyn PortalApi>,
    pub clusters: Arc<dyn ClusterApi>,
    /// Fires on Ctrl-C.
    pub cancel: CancellationToken,
}

impl Context {
    /// Build clients and the credential stack from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client or the cache directory cannot be
    /// set up.
    pub fn new(config: AppConfig, open_browser: bool) -> Result<Self> {
        let cache_dir = config.cache_dir()?;
        debug!(cache = %cache_dir.display(), "Using token cache");

        let oidc = Arc::new(SsoOidcClient::new().context("Failed to create SSO OIDC client")?);
        let portal: Arc<dyn PortalApi> =
            Arc::new(SsoPortalClient::new().context("Failed to create SSO portal client")?);
        let clusters: Arc<dyn ClusterApi> =
            Arc::new(EksClient::new().context("Failed to create EKS client")?);

        let authenticator = Arc::new(Authenticator::new(
            oidc,
            Arc::new(TokenCache::new(cache_dir)),
            Arc::new(TerminalPrompt { open_browser }),
        ));
        let guard = Arc::new(CredentialRefreshGuard::new(
            authenticator,
            Arc::clone(&portal),
            Arc::new(SessionStore::new()),
        ));

        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ui::print_warning("Interrupted, cancelling remaining tasks");
                on_signal.cancel();
            }
        });

        Ok(Self {
            config,
            guard,
            portal,
            clusters,
            cancel,
        })
    }

    /// Resolve `name`, or the configured default identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if no identity is named or it is not
    /// configured.
    pub fn identity(&self, name: Option<&str>) -> Result<Arc<Identity>, Error> {
        let name = name
            .or(self.config.default_identity.as_deref())
            .ok_or_else(|| {
                Error::Configuration(
                    "no identity given: pass --identity or set default_identity".to_string(),
                )
            })?;
        Ok(Arc::new(Identity::from_config(&self.config, name)?))
    }

    /// Make sure a valid SSO token exists for `identity` before fanning out,
    /// so the interactive sign-in does not run inside a task deadline.
    ///
    /// # Errors
    ///
    /// Returns the sign-in failure.
    pub async fn sign_in(&self, identity: &Identity) -> Result<(), Error> {
        let Some(params) = identity.federation_params() else {
            return Ok(());
        };
        self.guard
            .authenticator()
            .ensure_token(params, &self.cancel)
            .await?;
        Ok(())
    }
}

/// Scope and tuning flags shared by `discover` and `sync`.
#[derive(Args, Debug, Clone, Default)]
pub struct ScopeArgs {
    /// Identity to sign in with (defaults to `default_identity`)
    #[arg(short, long, env = "SSOKUBE_IDENTITY")]
    pub identity: Option<String>,

    /// Account to scan (repeatable; default: every visible account)
    #[arg(long = "account", value_name = "ID")]
    pub accounts: Vec<String>,

    /// Region to scan (repeatable)
    #[arg(long = "region", value_name = "REGION")]
    pub regions: Vec<String>,

    /// Role name prefix, in priority order (repeatable)
    #[arg(long = "role-prefix", value_name = "PREFIX", conflicts_with = "role")]
    pub role_prefixes: Vec<String>,

    /// Exact role name to use in every account
    #[arg(long, value_name = "NAME")]
    pub role: Option<String>,

    /// Maximum concurrent tasks
    #[arg(long, value_name = "N")]
    pub max_workers: Option<usize>,

    /// Minimum delay between task dispatches
    #[arg(long, value_name = "MS")]
    pub dispatch_delay_ms: Option<u64>,

    /// Retries for transient failures
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Per-task deadline
    #[arg(long, value_name = "SECS")]
    pub task_timeout_secs: Option<u64>,

    /// Deadline for the whole run
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,
}

/// Everything a discovery run needs, after merging flags over the file.
#[derive(Debug, Clone)]
pub struct ResolvedScope {
    pub identity: Arc<Identity>,
    pub request: DiscoveryRequest,
    pub orchestrator: OrchestratorConfig,
}

impl ScopeArgs {
    /// Orchestrator settings from the file with flag overrides applied.
    #[must_use]
    pub fn settings(&self, base: &OrchestratorSettings) -> OrchestratorSettings {
        let mut settings = base.clone();
        if let Some(v) = self.max_workers {
            settings.max_workers = v;
        }
        if let Some(v) = self.dispatch_delay_ms {
            settings.dispatch_delay_ms = v;
        }
        if let Some(v) = self.max_retries {
            settings.max_retries = v;
        }
        if let Some(v) = self.task_timeout_secs {
            settings.per_task_timeout_secs = v;
        }
        if let Some(v) = self.timeout_secs {
            settings.overall_timeout_secs = v;
        }
        settings
    }

    /// Merge flags over configuration and validate the result.
    ///
    /// Role flags replace the configured role selection as a whole. An
    /// assumed-role identity scans its own account with its own role unless
    /// told otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for any invalid or contradictory
    /// setting.
    pub fn resolve(&self, ctx: &Context) -> Result<ResolvedScope, Error> {
        let config = &ctx.config;
        let identity = ctx.identity(self.identity.as_deref())?;
        let orchestrator = OrchestratorConfig::new(&self.settings(&config.orchestrator))?;

        let (prefixes, role) = if self.role_prefixes.is_empty() && self.role.is_none() {
            (config.role_prefixes.clone(), config.role.clone())
        } else {
            (self.role_prefixes.clone(), self.role.clone())
        };
        let mut accounts = if self.accounts.is_empty() {
            config.accounts.clone()
        } else {
            self.accounts.clone()
        };

        let (source, selector) = match (identity.kind, &identity.role, &identity.source) {
            (IdentityKind::AssumedRole, Some(target), Some(source)) => {
                if accounts.is_empty() {
                    accounts.push(target.account_id.clone());
                }
                let selector = if prefixes.is_empty() && role.is_none() {
                    RoleSelector::Explicit(target.role_name.clone())
                } else {
                    RoleSelector::from_options(&prefixes, role.as_deref())?
                };
                (Arc::clone(source), selector)
            }
            _ => (
                Arc::clone(&identity),
                RoleSelector::from_options(&prefixes, role.as_deref())?,
            ),
        };

        let mut regions = if self.regions.is_empty() {
            config.regions.clone()
        } else {
            self.regions.clone()
        };
        if regions.is_empty() {
            regions.push(identity.region.clone());
        }

        Ok(ResolvedScope {
            identity,
            request: DiscoveryRequest {
                source,
                accounts,
                regions,
                selector,
            },
            orchestrator,
        })
    }
}
