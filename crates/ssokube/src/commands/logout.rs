//! `ssokube logout`: forget the cached token for an identity.

use anyhow::{bail, Result};
use clap::Args;

use super::{Context, Outcome};
use crate::ui;

#[derive(Args, Debug, Clone)]
pub struct LogoutCommand {
    /// Identity to sign out (defaults to `default_identity`)
    #[arg(short, long, env = "SSOKUBE_IDENTITY")]
    pub identity: Option<String>,
}

impl LogoutCommand {
    pub async fn run(&self, ctx: &Context) -> Result<Outcome> {
        let identity = ctx.identity(self.identity.as_deref())?;
        let Some(params) = identity.federation_params() else {
            bail!(crate::Error::Configuration(format!(
                "identity '{}' is {} and has no SSO session",
                identity.name, identity.kind
            )));
        };

        if ctx.guard.authenticator().invalidate(params).await? {
            ui::print_success(&format!("Signed out of {}", params.start_url));
        } else {
            ui::print_info(&format!("No cached token for {}", params.start_url));
        }
        Ok(Outcome::Success)
    }
}
