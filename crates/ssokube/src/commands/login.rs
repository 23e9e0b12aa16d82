//! `ssokube login`: sign in through IAM Identity Center and cache the token.

use anyhow::{bail, Result};
use clap::Args;

use super::{Context, Outcome};
use crate::ui;

#[derive(Args, Debug, Clone)]
pub struct LoginCommand {
    /// Identity to sign in with (defaults to `default_identity`)
    #[arg(short, long, env = "SSOKUBE_IDENTITY")]
    pub identity: Option<String>,

    /// Sign in again even if a valid token is cached
    #[arg(long)]
    pub force: bool,
}

impl LoginCommand {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let identity = ctx.identity(self.identity.as_deref())?;
        let Some(params) = identity.federation_params() else {
            bail!(crate::Error::Configuration(format!(
                "identity '{}' is {} and has nothing to sign in to",
                identity.name, identity.kind
            )));
        };

        let authenticator = ctx.guard.authenticator();
        let token = if self.force {
            authenticator.login(params, &ctx.cancel).await?
        } else {
            authenticator.ensure_token(params, &ctx.cancel).await?
        };

        ui::print_success(&format!("Signed in as {}", identity.name));
        ui::print_kv("Start URL", &token.start_url);
        ui::print_kv("Expires", &token.expires_at.to_rfc3339());
        Ok(Outcome::Success)
    }
}
