//! Writes kubeconfig entries and AWS profiles directly.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::aws_profile::ProfileSection;
use super::kubeconfig::{render_alias, KubeEntry};
use super::writer::ConfigWriter;
use super::{AppliedContext, ConfigApplier};
use crate::discovery::Resource;
use crate::error::{Error, Result};
use crate::identity::Identity;

/// Applies resources by editing the kubeconfig through a [`ConfigWriter`].
pub struct KubeconfigApplier {
    writer: Arc<ConfigWriter>,
    alias_template: String,
}

impl KubeconfigApplier {
    #[must_use]
    pub fn new(writer: Arc<ConfigWriter>, alias_template: impl Into<String>) -> Self {
        Self {
            writer,
            alias_template: alias_template.into(),
        }
    }
}

#[async_trait]
impl ConfigApplier for KubeconfigApplier {
    fn context_name(&self, resource: &Resource, identity: &Identity) -> String {
        render_alias(&self.alias_template, resource, &identity.name)
    }

    async fn apply(&self, resource: &Resource, identity: &Identity) -> Result<AppliedContext> {
        if resource.endpoint.is_none() {
            return Err(Error::Provision(format!(
                "cluster {} has no API endpoint yet (status {})",
                resource.name,
                resource.status.as_deref().unwrap_or("unknown")
            )));
        }

        if let Some(profile) = ProfileSection::for_identity(identity, &identity.region) {
            self.writer.upsert_profile(&profile).await?;
        }

        let entry = KubeEntry::new(resource, &identity.name, &self.alias_template);
        let ((), changed) = self
            .writer
            .update_kubeconfig(|config| {
                config.upsert(&entry);
                Ok(())
            })
            .await?;

        info!(
            context = %entry.context,
            cluster = %resource.id,
            profile = %identity.name,
            changed,
            "Applied kubeconfig context"
        );
        Ok(AppliedContext {
            context: entry.context,
            resource_id: resource.id.clone(),
            profile: identity.name.clone(),
            changed,
        })
    }
}
