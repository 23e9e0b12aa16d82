//! Applies resources by running `aws eks update-kubeconfig`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::aws_profile::ProfileSection;
use super::kubeconfig::render_alias;
use super::writer::ConfigWriter;
use super::{AppliedContext, ConfigApplier};
use crate::discovery::Resource;
use crate::error::{Error, Result};
use crate::identity::Identity;

/// External applier. Only the exit status and stderr of the command matter.
pub struct AwsCliApplier {
    program: String,
    writer: Arc<ConfigWriter>,
    alias_template: String,
}

impl AwsCliApplier {
    #[must_use]
    pub fn new(writer: Arc<ConfigWriter>, alias_template: impl Into<String>) -> Self {
        Self::with_program("aws", writer, alias_template)
    }

    /// Use `program` instead of `aws`.
    #[must_use]
    pub fn with_program(
        program: impl Into<String>,
        writer: Arc<ConfigWriter>,
        alias_template: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            writer,
            alias_template: alias_template.into(),
        }
    }
}

#[async_trait]
impl ConfigApplier for AwsCliApplier {
    fn context_name(&self, resource: &Resource, identity: &Identity) -> String {
        render_alias(&self.alias_template, resource, &identity.name)
    }

    async fn apply(&self, resource: &Resource, identity: &Identity) -> Result<AppliedContext> {
        if let Some(profile) = ProfileSection::for_identity(identity, &identity.region) {
            self.writer.upsert_profile(&profile).await?;
        }
        let alias = self.context_name(resource, identity);
        let alias_arg = alias.as_str();

        self.writer
            .run_exclusive(|kubeconfig| async move {
                let kubeconfig = kubeconfig.display().to_string();
                let args = [
                    "eks",
                    "update-kubeconfig",
                    "--name",
                    resource.name.as_str(),
                    "--region",
                    resource.region.as_str(),
                    "--alias",
                    alias_arg,
                    "--profile",
                    identity.name.as_str(),
                    "--kubeconfig",
                    kubeconfig.as_str(),
                ];
                debug!(program = %self.program, ?args, "Running external applier");

                let output = Command::new(&self.program)
                    .args(args)
                    .output()
                    .await
                    .map_err(|e| Error::Provision(format!("failed to run {}: {e}", self.program)))?;

                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let stderr = stderr.trim();
                    return Err(Error::Provision(if stderr.is_empty() {
                        format!("{} exited with {}", self.program, output.status)
                    } else {
                        format!("{} failed: {stderr}", self.program)
                    }));
                }
                Ok(())
            })
            .await?;

        info!(context = %alias, cluster = %resource.id, "Applied kubeconfig context with aws cli");
        Ok(AppliedContext {
            context: alias,
            resource_id: resource.id.clone(),
            profile: identity.name.clone(),
            changed: true,
        })
    }
}
