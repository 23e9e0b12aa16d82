//! `ssokube contexts`: list kubeconfig contexts and where they point.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::{Context, Outcome};
use crate::provision::ConfigWriter;
use crate::ui;

#[derive(Args, Debug, Clone)]
pub struct ContextsCommand {
    /// kubeconfig to read
    #[arg(long, value_name = "PATH")]
    pub kubeconfig: Option<PathBuf>,
}

impl ContextsCommand {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let kubeconfig = match &self.kubeconfig {
            Some(path) => path.clone(),
            None => ctx.config.kubeconfig_path()?,
        };
        let writer = ConfigWriter::new(kubeconfig, ctx.config.aws_config_path()?);
        let contexts = writer.read_kubeconfig().await?.contexts_info();
        ui::print_contexts(&contexts);
        Ok(Outcome::Success)
    }
}
