//! Local configuration for discovered clusters.
//!
//! [`ConfigProvisioner`] runs one apply task per resource through the worker
//! pool. Every task is retried for transient failures inside the credential
//! refresh guard, the same way discovery scans are.

mod aws_profile;
mod command;
mod kubeconfig;
mod native;
mod writer;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use aws_profile::ProfileSection;
pub use command::AwsCliApplier;
pub use kubeconfig::{ClusterArn, ContextInfo, KubeEntry, Kubeconfig};
pub use native::KubeconfigApplier;
pub use writer::ConfigWriter;

use crate::auth::CredentialRefreshGuard;
use crate::discovery::Resource;
use crate::error::Result;
use crate::identity::Identity;
use crate::pool::{AggregateReport, TaskKey, WorkerPool};
use crate::retry::RetryPolicy;

/// Result of applying one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedContext {
    /// Context name written.
    pub context: String,
    pub resource_id: String,
    /// AWS profile the context authenticates with.
    pub profile: String,
    /// Whether anything on disk changed.
    pub changed: bool,
}

/// Writes local configuration for one resource.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigApplier: Send + Sync {
    /// Context name `apply` would write.
    fn context_name(&self, resource: &Resource, identity: &Identity) -> String;

    /// Apply configuration for `resource`, authenticating as `identity`.
    async fn apply(&self, resource: &Resource, identity: &Identity) -> Result<AppliedContext>;
}

/// One resource to apply.
#[derive(Debug, Clone)]
pub struct ProvisionTask {
    pub resource: Resource,
    /// Identity the written configuration authenticates with.
    pub identity: Arc<Identity>,
}

impl TaskKey for ProvisionTask {
    fn task_key(&self) -> String {
        self.resource.id.clone()
    }
}

/// A context that a dry run would write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedContext {
    pub context: String,
    pub resource_id: String,
    pub profile: String,
}

/// Fans configuration writes out over resources.
pub struct ConfigProvisioner {
    applier: Arc<dyn ConfigApplier>,
    guard: Arc<CredentialRefreshGuard>,
    pool: WorkerPool,
    retry: RetryPolicy,
}

impl ConfigProvisioner {
    #[must_use]
    pub fn new(
        applier: Arc<dyn ConfigApplier>,
        guard: Arc<CredentialRefreshGuard>,
        pool: WorkerPool,
    ) -> Self {
        let retry = RetryPolicy::from_config(pool.config());
        Self {
            applier,
            guard,
            pool,
            retry,
        }
    }

    /// Pair every resource with the identity its configuration uses:
    /// `override_identity` if given, else the identity that found it.
    #[must_use]
    pub fn tasks(
        resources: Vec<Resource>,
        override_identity: Option<&Arc<Identity>>,
    ) -> Vec<ProvisionTask> {
        resources
            .into_iter()
            .map(|resource| {
                let identity = override_identity.map_or_else(
                    || Arc::clone(&resource.owner_identity),
                    Arc::clone,
                );
                ProvisionTask { resource, identity }
            })
            .collect()
    }

    /// What [`Self::apply`] would write, without writing anything.
    #[must_use]
    pub fn plan(
        &self,
        resources: Vec<Resource>,
        override_identity: Option<&Arc<Identity>>,
    ) -> Vec<PlannedContext> {
        Self::tasks(resources, override_identity)
            .into_iter()
            .map(|task| PlannedContext {
                context: self.applier.context_name(&task.resource, &task.identity),
                resource_id: task.resource.id,
                profile: task.identity.name.clone(),
            })
            .collect()
    }

    /// Apply configuration for every resource.
    ///
    /// Per-resource failures are kept in the report. The report's summary is
    /// available whatever the outcome.
    pub async fn apply(
        &self,
        resources: Vec<Resource>,
        override_identity: Option<&Arc<Identity>>,
        cancel: &CancellationToken,
    ) -> AggregateReport<ProvisionTask, AppliedContext> {
        let tasks = Self::tasks(resources, override_identity);
        info!(resources = tasks.len(), "Provisioning local configuration");

        let applier = Arc::clone(&self.applier);
        let guard = Arc::clone(&self.guard);
        let retry = self.retry;
        let report = self
            .pool
            .run(tasks, cancel, move |task: ProvisionTask, token| {
                let applier = Arc::clone(&applier);
                let guard = Arc::clone(&guard);
                async move {
                    let (applier, retry, token) = (&*applier, &retry, &token);
                    let (resource, identity) = (&task.resource, &*task.identity);
                    guard
                        .with_auth(identity, token, move || {
                            retry.execute(token, move || applier.apply(resource, identity))
                        })
                        .await
                }
            })
            .await;

        info!(summary = %report.summary(), "Provisioning finished");
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ssokube_cloud::CloudError;

    use super::*;
    use crate::config::{OrchestratorConfig, OrchestratorSettings};
    use crate::error::Error;
    use crate::testing::{federation_params, guard_with_cached_token, FakePortal};

    fn resource(name: &str, owner: &Arc<Identity>) -> Resource {
        Resource {
            id: format!("arn:aws:eks:eu-west-1:111111111111:cluster/{name}"),
            name: name.to_string(),
            account_id: "111111111111".into(),
            account_name: None,
            region: "eu-west-1".into(),
            owner_identity: Arc::clone(owner),
            endpoint: Some(format!("https://{name}")),
            certificate_authority: None,
            version: None,
            status: None,
        }
    }

    fn owner() -> Arc<Identity> {
        let params = federation_params();
        let corp = Arc::new(Identity::federated("corp", params.start_url, params.region));
        Arc::new(Identity::assume(&corp, "111111111111", "Admin"))
    }

    fn pool() -> WorkerPool {
        WorkerPool::new(
            OrchestratorConfig::new(&OrchestratorSettings {
                max_workers: 2,
                dispatch_delay_ms: 0,
                max_retries: 1,
                backoff_base_ms: 1,
                backoff_max_ms: 1,
                ..OrchestratorSettings::default()
            })
            .unwrap(),
        )
    }

    fn applied(resource: &Resource, identity: &Identity) -> AppliedContext {
        AppliedContext {
            context: resource.name.clone(),
            resource_id: resource.id.clone(),
            profile: identity.name.clone(),
            changed: true,
        }
    }

    #[tokio::test]
    async fn test_partial_failure_is_not_overall_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (guard, _) = guard_with_cached_token(dir.path(), Arc::new(FakePortal::default())).await;

        let mut applier = MockConfigApplier::new();
        applier.expect_apply().returning(|resource, identity| {
            if resource.name == "broken" {
                Err(Error::Provision("no endpoint".into()))
            } else {
                Ok(applied(resource, identity))
            }
        });

        let provisioner = ConfigProvisioner::new(Arc::new(applier), guard, pool());
        let owner = owner();
        let resources = vec![
            resource("alpha", &owner),
            resource("broken", &owner),
            resource("gamma", &owner),
        ];

        let report = provisioner
            .apply(resources, None, &CancellationToken::new())
            .await;
        let summary = report.summary();
        assert_eq!((summary.succeeded, summary.failed, summary.total), (2, 1, 3));
        assert!(!report.overall_failure());
        let broken = report
            .get("arn:aws:eks:eu-west-1:111111111111:cluster/broken")
            .unwrap();
        assert!(broken.result.is_err());
    }

    #[tokio::test]
    async fn test_all_failed_still_produces_summary() {
        let dir = tempfile::tempdir().unwrap();
        let (guard, _) = guard_with_cached_token(dir.path(), Arc::new(FakePortal::default())).await;

        let mut applier = MockConfigApplier::new();
        applier
            .expect_apply()
            .times(2)
            .returning(|_, _| Err(Error::Provision("disk full".into())));

        let provisioner = ConfigProvisioner::new(Arc::new(applier), guard, pool());
        let owner = owner();
        let report = provisioner
            .apply(
                vec![resource("a", &owner), resource("b", &owner)],
                None,
                &CancellationToken::new(),
            )
            .await;
        assert!(report.overall_failure());
        assert_eq!(report.summary().failed, 2);
    }

    #[tokio::test]
    async fn test_override_identity_is_used_for_every_resource() {
        let dir = tempfile::tempdir().unwrap();
        let (guard, _) = guard_with_cached_token(dir.path(), Arc::new(FakePortal::default())).await;

        let mut applier = MockConfigApplier::new();
        applier
            .expect_apply()
            .withf(|_, identity| identity.name == "ops")
            .times(2)
            .returning(|resource, identity| Ok(applied(resource, identity)));

        let provisioner = ConfigProvisioner::new(Arc::new(applier), guard, pool());
        let owner = owner();
        let ops = Arc::new(Identity::long_lived("ops", "eu-west-1"));
        let report = provisioner
            .apply(
                vec![resource("a", &owner), resource("b", &owner)],
                Some(&ops),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(report.succeeded(), 2);
        assert!(report.successes().all(|(_, ctx)| ctx.profile == "ops"));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (guard, _) = guard_with_cached_token(dir.path(), Arc::new(FakePortal::default())).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut applier = MockConfigApplier::new();
        applier.expect_apply().returning(move |resource, identity| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::from(CloudError::Transient("503".into())))
            } else {
                Ok(applied(resource, identity))
            }
        });

        let provisioner = ConfigProvisioner::new(Arc::new(applier), guard, pool());
        let owner = owner();
        let report = provisioner
            .apply(vec![resource("a", &owner)], None, &CancellationToken::new())
            .await;
        assert_eq!(report.succeeded(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_plan_uses_owner_or_override() {
        let dir = tempfile::tempdir().unwrap();
        let (guard, _) = guard_with_cached_token(dir.path(), Arc::new(FakePortal::default())).await;

        let mut applier = MockConfigApplier::new();
        applier
            .expect_context_name()
            .returning(|resource, identity| format!("{}@{}", resource.name, identity.name));
        applier.expect_apply().never();

        let provisioner = ConfigProvisioner::new(Arc::new(applier), guard, pool());
        let owner = owner();
        let planned = provisioner.plan(vec![resource("a", &owner)], None);
        assert_eq!(planned[0].context, "a@corp-111111111111-Admin");

        let ops = Arc::new(Identity::long_lived("ops", "eu-west-1"));
        let planned = provisioner.plan(vec![resource("a", &owner)], Some(&ops));
        assert_eq!(planned[0].context, "a@ops");
        assert_eq!(planned[0].profile, "ops");
    }
}
