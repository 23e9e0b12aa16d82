//! `ssokube sync`: discover clusters and write kubeconfig contexts for them.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use super::discover::discover;
use super::{Context, Outcome, ScopeArgs};
use crate::config::{ApplierKind, OrchestratorConfig};
use crate::pool::WorkerPool;
use crate::provision::{
    AwsCliApplier, ConfigApplier, ConfigProvisioner, ConfigWriter, KubeconfigApplier,
};
use crate::ui;

#[derive(Args, Debug, Clone)]
pub struct SyncCommand {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Write every context with this identity instead of the one that found it
    #[arg(long, value_name = "NAME")]
    pub override_identity: Option<String>,

    /// Show the contexts that would be written and stop
    #[arg(long)]
    pub dry_run: bool,

    /// How to write contexts: native or aws-cli
    #[arg(long, value_name = "KIND")]
    pub applier: Option<ApplierKind>,

    /// kubeconfig to update
    #[arg(long, value_name = "PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Context name template
    #[arg(long, value_name = "TEMPLATE")]
    pub alias_template: Option<String>,
}

impl SyncCommand {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        // Validate everything local before signing in.
        let override_identity = self
            .override_identity
            .as_deref()
            .map(|name| ctx.identity(Some(name)))
            .transpose()?;
        let orchestrator =
            OrchestratorConfig::new(&self.scope.settings(&ctx.config.orchestrator))?;
        let applier = self.build_applier(ctx)?;

        let discovery = discover(ctx, &self.scope).await?;
        ui::print_discovery(&discovery);
        let discovery_failed = discovery.overall_failure();
        if discovery.resources.is_empty() {
            return Ok(Outcome::from_overall_failure(discovery_failed));
        }

        let provisioner = ConfigProvisioner::new(
            applier,
            Arc::clone(&ctx.guard),
            WorkerPool::new(orchestrator),
        );

        if self.dry_run {
            let planned = provisioner.plan(discovery.resources, override_identity.as_ref());
            ui::print_plan(&planned);
            return Ok(Outcome::from_overall_failure(discovery_failed));
        }

        ui::print_section("Writing kubeconfig contexts");
        let report = provisioner
            .apply(discovery.resources, override_identity.as_ref(), &ctx.cancel)
            .await;
        ui::print_provision(&report);
        for (_, applied) in report.successes().filter(|(_, applied)| applied.changed) {
            ui::print_kv(&applied.context, &applied.resource_id);
        }

        Ok(Outcome::from_overall_failure(
            discovery_failed || report.overall_failure(),
        ))
    }

    fn build_applier(&self, ctx: &Context) -> Result<Arc<dyn ConfigApplier>> {
        let kubeconfig = match &self.kubeconfig {
            Some(path) => path.clone(),
            None => ctx.config.kubeconfig_path()?,
        };
        let writer = Arc::new(ConfigWriter::new(
            kubeconfig,
            ctx.config.aws_config_path()?,
        ));
        let template = self
            .alias_template
            .clone()
            .unwrap_or_else(|| ctx.config.provision.alias_template.clone());

        let applier: Arc<dyn ConfigApplier> =
            match self.applier.unwrap_or(ctx.config.provision.applier) {
                ApplierKind::Native => Arc::new(KubeconfigApplier::new(writer, template)),
                ApplierKind::AwsCli => Arc::new(AwsCliApplier::new(writer, template)),
            };
        Ok(applier)
    }
}
