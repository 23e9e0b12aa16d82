//! Cluster discovery across accounts and regions.
//!
//! Discovery runs in two phases through the worker pool. With a prefix
//! selector, roles are first resolved once per account. Every resolved
//! account is then scanned in every requested region. Each remote call is
//! retried for transient failures inside the credential refresh guard.

use std::collections::HashMap;
use std::sync::Arc;

use ssokube_cloud::{ClusterApi, EksCluster, PortalApi, RoleInfo};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::CredentialRefreshGuard;
use crate::error::{Error, ErrorKind, Result};
use crate::identity::{FederationParams, Identity, IdentityKind};
use crate::pool::{AggregateReport, TaskKey, TaskOutcome, WorkerPool};
use crate::retry::RetryPolicy;

/// Which permission set to use in each account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleSelector {
    /// First role whose name starts with one of these, in priority order.
    Prefixes(Vec<String>),
    /// Exactly this role in every account.
    Explicit(String),
}

impl RoleSelector {
    /// Build a selector from prefix and role options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when both or neither are given.
    pub fn from_options(prefixes: &[String], role: Option<&str>) -> Result<Self> {
        match (prefixes.is_empty(), role) {
            (false, Some(_)) => Err(Error::Configuration(
                "role prefixes and an explicit role are mutually exclusive".to_string(),
            )),
            (true, Some(role)) if role.trim().is_empty() => {
                Err(Error::Configuration("role name must not be empty".to_string()))
            }
            (true, Some(role)) => Ok(Self::Explicit(role.to_string())),
            (false, None) => Ok(Self::Prefixes(prefixes.to_vec())),
            (true, None) => Err(Error::Configuration(
                "no role selection: set role prefixes or a role name".to_string(),
            )),
        }
    }

    /// Pick a role from `roles`.
    #[must_use]
    pub fn select<'a>(&self, roles: &'a [RoleInfo]) -> Option<&'a str> {
        match self {
            Self::Explicit(name) => roles
                .iter()
                .find(|r| &r.role_name == name)
                .map(|r| r.role_name.as_str()),
            Self::Prefixes(prefixes) => prefixes.iter().find_map(|prefix| {
                roles
                    .iter()
                    .find(|r| r.role_name.starts_with(prefix.as_str()))
                    .map(|r| r.role_name.as_str())
            }),
        }
    }
}

impl std::fmt::Display for RoleSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prefixes(prefixes) => write!(f, "prefixes [{}]", prefixes.join(", ")),
            Self::Explicit(role) => write!(f, "role {role}"),
        }
    }
}

/// One (account, region) scan.
#[derive(Debug, Clone)]
pub struct DiscoveryTask {
    pub account_id: String,
    pub region: String,
    /// Assumed-role identity used for the scan.
    pub identity: Arc<Identity>,
}

impl TaskKey for DiscoveryTask {
    fn task_key(&self) -> String {
        format!("{}/{}", self.account_id, self.region)
    }
}

/// Role lookup for one account.
#[derive(Debug, Clone)]
struct RoleLookup {
    account_id: String,
}

impl TaskKey for RoleLookup {
    fn task_key(&self) -> String {
        self.account_id.clone()
    }
}

/// A discovered cluster, tagged with where it was found.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Cluster ARN.
    pub id: String,
    pub name: String,
    pub account_id: String,
    pub account_name: Option<String>,
    pub region: String,
    /// Identity the cluster was discovered with.
    pub owner_identity: Arc<Identity>,
    pub endpoint: Option<String>,
    /// Base64 CA bundle.
    pub certificate_authority: Option<String>,
    pub version: Option<String>,
    pub status: Option<String>,
}

impl Resource {
    fn from_cluster(cluster: EksCluster, task: &DiscoveryTask, account_name: Option<&str>) -> Self {
        Self {
            id: cluster.arn,
            name: cluster.name,
            account_id: task.account_id.clone(),
            account_name: account_name.map(str::to_string),
            region: task.region.clone(),
            owner_identity: Arc::clone(&task.identity),
            endpoint: cluster.endpoint,
            certificate_authority: cluster.certificate_authority.and_then(|ca| ca.data),
            version: cluster.version,
            status: cluster.status,
        }
    }
}

/// What one (account, region) scan produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStatus {
    Found(usize),
    Empty,
    Failed(ErrorKind),
}

/// Found, empty and failed scan counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryCounts {
    pub found: usize,
    pub empty: usize,
    pub failed: usize,
}

impl std::fmt::Display for DiscoveryCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} with clusters, {} empty, {} failed",
            self.found, self.empty, self.failed
        )
    }
}

/// Merged clusters and the per-scan report.
#[derive(Debug)]
pub struct Discovery {
    /// Clusters from every successful scan, grouped by account.
    pub resources: Vec<Resource>,
    pub report: AggregateReport<DiscoveryTask, Vec<Resource>>,
}

impl Discovery {
    fn from_report(report: AggregateReport<DiscoveryTask, Vec<Resource>>) -> Self {
        let mut resources: Vec<Resource> = report
            .successes()
            .flat_map(|(_, found)| found.iter().cloned())
            .collect();
        resources.sort_by(|a, b| {
            (&a.account_id, &a.region, &a.name).cmp(&(&b.account_id, &b.region, &b.name))
        });
        Self { resources, report }
    }

    /// Status of every scan, keyed by `account/region`.
    pub fn statuses(&self) -> impl Iterator<Item = (String, DiscoveryStatus)> + '_ {
        self.report.outcomes().iter().map(|outcome| {
            let status = match &outcome.result {
                Ok(found) if found.is_empty() => DiscoveryStatus::Empty,
                Ok(found) => DiscoveryStatus::Found(found.len()),
                Err(e) => DiscoveryStatus::Failed(e.kind()),
            };
            (outcome.key(), status)
        })
    }

    #[must_use]
    pub fn counts(&self) -> DiscoveryCounts {
        self.statuses()
            .fold(DiscoveryCounts::default(), |mut counts, (_, status)| {
                match status {
                    DiscoveryStatus::Found(_) => counts.found += 1,
                    DiscoveryStatus::Empty => counts.empty += 1,
                    DiscoveryStatus::Failed(_) => counts.failed += 1,
                }
                counts
            })
    }

    /// True iff no scan returned a usable result. Empty scans are usable.
    #[must_use]
    pub fn overall_failure(&self) -> bool {
        self.report.overall_failure()
    }
}

/// What to scan.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    /// Federated identity whose SSO session is used for every account.
    pub source: Arc<Identity>,
    /// Accounts to scan. Empty means every account the SSO user can see.
    pub accounts: Vec<String>,
    pub regions: Vec<String>,
    pub selector: RoleSelector,
}

/// Fans cluster listing out over accounts x regions.
pub struct DiscoveryPipeline {
    guard: Arc<CredentialRefreshGuard>,
    portal: Arc<dyn PortalApi>,
    clusters: Arc<dyn ClusterApi>,
    pool: WorkerPool,
    retry: RetryPolicy,
}

impl DiscoveryPipeline {
    #[must_use]
    pub fn new(
        guard: Arc<CredentialRefreshGuard>,
        portal: Arc<dyn PortalApi>,
        clusters: Arc<dyn ClusterApi>,
        pool: WorkerPool,
    ) -> Self {
        let retry = RetryPolicy::from_config(pool.config());
        Self {
            guard,
            portal,
            clusters,
            pool,
            retry,
        }
    }

    /// Discover clusters.
    ///
    /// Scan failures are kept in the report and never fail the call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] before scheduling anything when no
    /// region is given or the source identity is not federated, and the
    /// account listing failure when accounts had to be enumerated.
    pub async fn discover(
        &self,
        request: &DiscoveryRequest,
        cancel: &CancellationToken,
    ) -> Result<Discovery> {
        if request.regions.is_empty() {
            return Err(Error::Configuration(
                "at least one region is required".to_string(),
            ));
        }
        // Task identities are assumed from the source, so it must hold the SSO session itself.
        let params = match request.source.kind {
            IdentityKind::Federated => request.source.federation_params().cloned(),
            IdentityKind::LongLived | IdentityKind::AssumedRole => None,
        }
        .ok_or_else(|| {
            Error::Configuration(format!(
                "identity '{}' is {}; discovery needs a federated identity",
                request.source.name, request.source.kind
            ))
        })?;

        let (account_ids, account_names) = self.accounts(request, &params, cancel).await?;
        info!(
            accounts = account_ids.len(),
            regions = request.regions.len(),
            selector = %request.selector,
            "Starting discovery"
        );

        let (resolved, unresolved) = self
            .resolve_roles(request, &params, &account_ids, cancel)
            .await;

        let mut tasks = Vec::new();
        for (account_id, role_name) in &resolved {
            let identity = Arc::new(Identity::assume(&request.source, account_id, role_name));
            for region in &request.regions {
                tasks.push(DiscoveryTask {
                    account_id: account_id.clone(),
                    region: region.clone(),
                    identity: Arc::clone(&identity),
                });
            }
        }

        let guard = Arc::clone(&self.guard);
        let clusters = Arc::clone(&self.clusters);
        let retry = self.retry;
        let names = Arc::new(account_names);
        let mut report = self
            .pool
            .run(tasks, cancel, move |task: DiscoveryTask, token| {
                let guard = Arc::clone(&guard);
                let clusters = Arc::clone(&clusters);
                let names = Arc::clone(&names);
                async move {
                    let (guard, clusters, retry, token) = (&*guard, &*clusters, &retry, &token);
                    let task_ref = &task;
                    let account_name = names.get(&task.account_id).map(String::as_str);
                    guard
                        .with_auth(&task.identity, token, move || {
                            retry.execute(token, move || {
                                scan(guard, clusters, task_ref, account_name)
                            })
                        })
                        .await
                }
            })
            .await;

        for (account_id, error) in unresolved {
            for region in &request.regions {
                report.push(TaskOutcome {
                    input: DiscoveryTask {
                        account_id: account_id.clone(),
                        region: region.clone(),
                        identity: Arc::clone(&request.source),
                    },
                    result: Err(Error::RoleResolution {
                        account_id: account_id.clone(),
                        kind: error.kind(),
                        message: error.to_string(),
                    }),
                });
            }
        }

        let discovery = Discovery::from_report(report);
        info!(
            clusters = discovery.resources.len(),
            scans = %discovery.counts(),
            "Discovery finished"
        );
        Ok(discovery)
    }

    /// Requested accounts, or every account visible to the SSO user.
    async fn accounts(
        &self,
        request: &DiscoveryRequest,
        params: &FederationParams,
        cancel: &CancellationToken,
    ) -> Result<(Vec<String>, HashMap<String, String>)> {
        if !request.accounts.is_empty() {
            return Ok((request.accounts.clone(), HashMap::new()));
        }

        let (guard, portal, retry) = (&*self.guard, &*self.portal, &self.retry);
        let accounts = guard
            .with_auth(&request.source, cancel, move || {
                retry.execute(cancel, move || async move {
                    let token = guard.authenticator().current_token(params).await?;
                    Ok::<_, Error>(
                        portal
                            .list_accounts(&params.region, &token.access_token)
                            .await?,
                    )
                })
            })
            .await?;

        debug!(count = accounts.len(), "Listed accounts");
        let names = accounts
            .iter()
            .filter_map(|a| Some((a.account_id.clone(), a.account_name.clone()?)))
            .collect();
        Ok((accounts.into_iter().map(|a| a.account_id).collect(), names))
    }

    /// Resolve one role per account. Returns resolved `(account, role)` pairs
    /// and the failure for every account that has no usable role.
    async fn resolve_roles(
        &self,
        request: &DiscoveryRequest,
        params: &FederationParams,
        account_ids: &[String],
        cancel: &CancellationToken,
    ) -> (Vec<(String, String)>, Vec<(String, Error)>) {
        if let RoleSelector::Explicit(role) = &request.selector {
            let resolved = account_ids
                .iter()
                .map(|account_id| (account_id.clone(), role.clone()))
                .collect();
            return (resolved, Vec::new());
        }

        let lookups: Vec<RoleLookup> = account_ids
            .iter()
            .map(|account_id| RoleLookup {
                account_id: account_id.clone(),
            })
            .collect();

        let guard = Arc::clone(&self.guard);
        let portal = Arc::clone(&self.portal);
        let source = Arc::clone(&request.source);
        let params = Arc::new(params.clone());
        let retry = self.retry;
        let report = self
            .pool
            .run(lookups, cancel, move |lookup: RoleLookup, token| {
                let guard = Arc::clone(&guard);
                let portal = Arc::clone(&portal);
                let source = Arc::clone(&source);
                let params = Arc::clone(&params);
                async move {
                    let (guard, portal, params, retry, token) =
                        (&*guard, &*portal, &*params, &retry, &token);
                    let account_id = lookup.account_id.as_str();
                    guard
                        .with_auth(&source, token, move || {
                            retry.execute(token, move || async move {
                                let sso = guard.authenticator().current_token(params).await?;
                                Ok::<_, Error>(
                                    portal
                                        .list_account_roles(
                                            &params.region,
                                            &sso.access_token,
                                            account_id,
                                        )
                                        .await?,
                                )
                            })
                        })
                        .await
                }
            })
            .await;

        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        for outcome in report.into_outcomes() {
            let account_id = outcome.input.account_id;
            match outcome.result {
                Ok(roles) => match request.selector.select(&roles) {
                    Some(role) => {
                        debug!(account = %account_id, role, "Resolved role");
                        resolved.push((account_id, role.to_string()));
                    }
                    None => {
                        warn!(account = %account_id, selector = %request.selector, "No matching role");
                        unresolved.push((
                            account_id,
                            Error::Configuration(format!(
                                "no role matches {}",
                                request.selector
                            )),
                        ));
                    }
                },
                Err(e) => unresolved.push((account_id, e)),
            }
        }
        (resolved, unresolved)
    }
}

async fn scan(
    guard: &CredentialRefreshGuard,
    clusters: &dyn ClusterApi,
    task: &DiscoveryTask,
    account_name: Option<&str>,
) -> Result<Vec<Resource>> {
    let credentials = guard.sessions().credentials_for(&task.identity)?;
    let names = clusters.list_clusters(&task.region, &credentials).await?;

    let mut resources = Vec::with_capacity(names.len());
    for name in names {
        let cluster = clusters
            .describe_cluster(&task.region, &credentials, &name)
            .await?;
        resources.push(Resource::from_cluster(cluster, task, account_name));
    }
    debug!(
        account = %task.account_id,
        region = %task.region,
        clusters = resources.len(),
        "Scanned region"
    );
    Ok(resources)
}
