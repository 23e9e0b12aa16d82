//! `ssokube discover`: list clusters without touching local configuration.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::info;

use super::{Context, Outcome, ScopeArgs};
use crate::discovery::{Discovery, DiscoveryPipeline};
use crate::pool::WorkerPool;
use crate::ui;

#[derive(Args, Debug, Clone)]
pub struct DiscoverCommand {
    #[command(flatten)]
    pub scope: ScopeArgs,
}

impl DiscoverCommand {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let discovery = discover(ctx, &self.scope).await?;
        ui::print_discovery(&discovery);
        Ok(Outcome::from_overall_failure(discovery.overall_failure()))
    }
}

/// Sign in once, then fan out over every (account, region) pair.
pub(crate) async fn discover(ctx: &Context, scope: &ScopeArgs) -> Result<Discovery> {
    let resolved = scope.resolve(ctx)?;
    ui::print_step(&format!(
        "Discovering clusters as {} in {}",
        resolved.request.source.name,
        resolved.request.regions.join(", ")
    ));

    ctx.sign_in(&resolved.request.source).await?;

    let pipeline = DiscoveryPipeline::new(
        Arc::clone(&ctx.guard),
        Arc::clone(&ctx.portal),
        Arc::clone(&ctx.clusters),
        WorkerPool::new(resolved.orchestrator),
    );
    let discovery = pipeline.discover(&resolved.request, &ctx.cancel).await?;
    info!(counts = %discovery.counts(), "Discovery finished");
    Ok(discovery)
}
