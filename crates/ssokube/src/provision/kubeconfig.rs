//! Structured kubeconfig model.
//!
//! Only the fields ssokube reads or writes are typed. Everything else is kept
//! in `extra` maps so a rewrite does not drop settings added by other tools.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::discovery::Resource;
use crate::error::{Error, Result};

const KUBECONFIG_API_VERSION: &str = "v1";
const EXEC_API_VERSION: &str = "client.authentication.k8s.io/v1beta1";

/// A kubeconfig file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub clusters: Vec<NamedCluster>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub users: Vec<NamedUser>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub contexts: Vec<NamedContext>,
    #[serde(
        rename = "current-context",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub current_context: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_api_version() -> String {
    KUBECONFIG_API_VERSION.to_string()
}

fn default_kind() -> String {
    "Config".to_string()
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Default for Kubeconfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            clusters: Vec::new(),
            users: Vec::new(),
            contexts: Vec::new(),
            current_context: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(
        rename = "certificate-authority-data",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub certificate_authority_data: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    pub user: UserEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecConfig>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Credential plugin invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// The parts of an EKS cluster ARN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterArn {
    pub region: String,
    pub account_id: String,
    pub name: String,
}

impl ClusterArn {
    /// Parse `arn:<partition>:eks:<region>:<account>:cluster/<name>`.
    #[must_use]
    pub fn parse(arn: &str) -> Option<Self> {
        let mut parts = arn.splitn(6, ':');
        if parts.next()? != "arn" {
            return None;
        }
        let _partition = parts.next()?;
        if parts.next()? != "eks" {
            return None;
        }
        let region = parts.next()?;
        let account_id = parts.next()?;
        let name = parts.next()?.strip_prefix("cluster/")?;
        if region.is_empty() || account_id.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self {
            region: region.to_string(),
            account_id: account_id.to_string(),
            name: name.to_string(),
        })
    }
}

/// Metadata recovered for one context. Anything not present is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInfo {
    pub name: String,
    pub current: bool,
    pub cluster: Option<String>,
    pub region: Option<String>,
    pub account_id: Option<String>,
    pub profile: Option<String>,
    pub server: Option<String>,
}

/// What to write for one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeEntry {
    /// Cluster and user entry name (the cluster ARN).
    pub id: String,
    pub context: String,
    pub cluster_name: String,
    pub region: String,
    pub server: Option<String>,
    pub certificate_authority_data: Option<String>,
    /// AWS profile the exec plugin signs in with.
    pub profile: String,
}

impl KubeEntry {
    #[must_use]
    pub fn new(resource: &Resource, profile: &str, alias_template: &str) -> Self {
        Self {
            id: resource.id.clone(),
            context: render_alias(alias_template, resource, profile),
            cluster_name: resource.name.clone(),
            region: resource.region.clone(),
            server: resource.endpoint.clone(),
            certificate_authority_data: resource.certificate_authority.clone(),
            profile: profile.to_string(),
        }
    }
}

/// Expand `{account_id}`, `{account_name}`, `{region}`, `{cluster}` and
/// `{profile}` in `template`.
#[must_use]
pub fn render_alias(template: &str, resource: &Resource, profile: &str) -> String {
    template
        .replace("{account_id}", &resource.account_id)
        .replace(
            "{account_name}",
            resource.account_name.as_deref().unwrap_or(&resource.account_id),
        )
        .replace("{region}", &resource.region)
        .replace("{cluster}", &resource.name)
        .replace("{profile}", profile)
}

impl Kubeconfig {
    /// Parse kubeconfig YAML. Blank input is an empty config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] on malformed YAML.
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| Error::Parse {
            what: "kubeconfig".to_string(),
            message: e.to_string(),
        })
    }

    /// Serialize to YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Add or replace the cluster, user and context for `entry`.
    ///
    /// Settings on existing entries that ssokube does not manage are kept.
    pub fn upsert(&mut self, entry: &KubeEntry) {
        match self.clusters.iter_mut().find(|c| c.name == entry.id) {
            Some(existing) => {
                existing.cluster.server.clone_from(&entry.server);
                existing
                    .cluster
                    .certificate_authority_data
                    .clone_from(&entry.certificate_authority_data);
            }
            None => self.clusters.push(NamedCluster {
                name: entry.id.clone(),
                cluster: ClusterEntry {
                    server: entry.server.clone(),
                    certificate_authority_data: entry.certificate_authority_data.clone(),
                    extra: BTreeMap::new(),
                },
            }),
        }

        let exec = ExecConfig {
            api_version: EXEC_API_VERSION.to_string(),
            command: "aws".to_string(),
            args: vec![
                "--region".to_string(),
                entry.region.clone(),
                "eks".to_string(),
                "get-token".to_string(),
                "--cluster-name".to_string(),
                entry.cluster_name.clone(),
                "--output".to_string(),
                "json".to_string(),
            ],
            env: vec![EnvVar {
                name: "AWS_PROFILE".to_string(),
                value: entry.profile.clone(),
            }],
            extra: BTreeMap::new(),
        };
        match self.users.iter_mut().find(|u| u.name == entry.id) {
            Some(existing) => existing.user.exec = Some(exec),
            None => self.users.push(NamedUser {
                name: entry.id.clone(),
                user: UserEntry {
                    exec: Some(exec),
                    extra: BTreeMap::new(),
                },
            }),
        }

        match self.contexts.iter_mut().find(|c| c.name == entry.context) {
            Some(existing) => {
                existing.context.cluster.clone_from(&entry.id);
                existing.context.user.clone_from(&entry.id);
            }
            None => self.contexts.push(NamedContext {
                name: entry.context.clone(),
                context: ContextEntry {
                    cluster: entry.id.clone(),
                    user: entry.id.clone(),
                    namespace: None,
                    extra: BTreeMap::new(),
                },
            }),
        }
    }

    /// Metadata for every context, in file order.
    #[must_use]
    pub fn contexts_info(&self) -> Vec<ContextInfo> {
        self.contexts
            .iter()
            .map(|ctx| {
                let arn = ClusterArn::parse(&ctx.context.cluster);
                let profile = self
                    .users
                    .iter()
                    .find(|u| u.name == ctx.context.user)
                    .and_then(|u| u.user.exec.as_ref())
                    .and_then(|exec| exec.env.iter().find(|v| v.name == "AWS_PROFILE"))
                    .map(|v| v.value.clone());
                let server = self
                    .clusters
                    .iter()
                    .find(|c| c.name == ctx.context.cluster)
                    .and_then(|c| c.cluster.server.clone());
                let (cluster, region, account_id) = match arn {
                    Some(arn) => (Some(arn.name), Some(arn.region), Some(arn.account_id)),
                    None if ctx.context.cluster.is_empty() => (None, None, None),
                    None => (Some(ctx.context.cluster.clone()), None, None),
                };
                ContextInfo {
                    name: ctx.name.clone(),
                    current: self.current_context.as_deref() == Some(ctx.name.as_str()),
                    cluster,
                    region,
                    account_id,
                    profile,
                    server,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::identity::Identity;

    fn resource() -> Resource {
        let corp = Arc::new(Identity::federated("corp", "https://x", "eu-west-1"));
        Resource {
            id: "arn:aws:eks:eu-west-1:111111111111:cluster/alpha".into(),
            name: "alpha".into(),
            account_id: "111111111111".into(),
            account_name: Some("prod".into()),
            region: "eu-west-1".into(),
            owner_identity: Arc::new(Identity::assume(&corp, "111111111111", "Admin")),
            endpoint: Some("https://alpha.eks.amazonaws.com".into()),
            certificate_authority: Some("Q0EK".into()),
            version: Some("1.29".into()),
            status: Some("ACTIVE".into()),
        }
    }

    const EXISTING: &str = r"
apiVersion: v1
kind: Config
preferences:
  colors: true
clusters:
- name: kind-local
  cluster:
    server: https://127.0.0.1:6443
    insecure-skip-tls-verify: true
users:
- name: kind-local
  user:
    token: abc
contexts:
- name: kind-local
  context:
    cluster: kind-local
    user: kind-local
    namespace: dev
current-context: kind-local
";

    #[test]
    fn test_upsert_preserves_unmanaged_entries() {
        let mut config = Kubeconfig::parse(EXISTING).unwrap();
        config.upsert(&KubeEntry::new(&resource(), "corp-111111111111-Admin", "{account_name}/{cluster}"));

        let reparsed = Kubeconfig::parse(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(reparsed.clusters.len(), 2);
        assert_eq!(reparsed.contexts.len(), 2);
        assert!(reparsed.extra.contains_key("preferences"));
        let local = &reparsed.clusters[0].cluster;
        assert!(local.extra.contains_key("insecure-skip-tls-verify"));
        assert!(reparsed.users[0].user.extra.contains_key("token"));
        assert_eq!(reparsed.current_context.as_deref(), Some("kind-local"));

        let ctx = reparsed.contexts.iter().find(|c| c.name == "prod/alpha").unwrap();
        assert_eq!(ctx.context.cluster, resource().id);
    }

    #[test]
    fn test_upsert_twice_replaces_in_place() {
        let mut config = Kubeconfig::default();
        let mut entry = KubeEntry::new(&resource(), "p1", "{cluster}");
        config.upsert(&entry);
        entry.server = Some("https://moved".into());
        entry.profile = "p2".into();
        config.upsert(&entry);

        assert_eq!(config.clusters.len(), 1);
        assert_eq!(config.users.len(), 1);
        assert_eq!(config.contexts.len(), 1);
        assert_eq!(config.clusters[0].cluster.server.as_deref(), Some("https://moved"));
        let exec = config.users[0].user.exec.as_ref().unwrap();
        assert_eq!(exec.env[0].value, "p2");
        assert!(exec.args.contains(&"get-token".to_string()));
    }

    #[test]
    fn test_context_info_recovers_metadata() {
        let mut config = Kubeconfig::parse(EXISTING).unwrap();
        config.upsert(&KubeEntry::new(&resource(), "corp-111111111111-Admin", "{account_id}:{region}:{cluster}"));
        config.current_context = Some("111111111111:eu-west-1:alpha".into());

        let infos = config.contexts_info();
        let local = &infos[0];
        assert_eq!(local.cluster.as_deref(), Some("kind-local"));
        assert_eq!(local.region, None);
        assert_eq!(local.profile, None);
        assert!(!local.current);

        let eks = &infos[1];
        assert!(eks.current);
        assert_eq!(eks.cluster.as_deref(), Some("alpha"));
        assert_eq!(eks.region.as_deref(), Some("eu-west-1"));
        assert_eq!(eks.account_id.as_deref(), Some("111111111111"));
        assert_eq!(eks.profile.as_deref(), Some("corp-111111111111-Admin"));
    }

    #[test]
    fn test_blank_and_sparse_files_parse() {
        assert_eq!(Kubeconfig::parse("  \n").unwrap(), Kubeconfig::default());
        let sparse = Kubeconfig::parse("apiVersion: v1\nclusters: null\ncontexts:\n").unwrap();
        assert!(sparse.clusters.is_empty());
        assert!(sparse.contexts_info().is_empty());
        assert!(Kubeconfig::parse("clusters: [").is_err());
    }

    #[test]
    fn test_cluster_arn_parse() {
        let arn = ClusterArn::parse("arn:aws-cn:eks:cn-north-1:123:cluster/a/b").unwrap();
        assert_eq!(arn.region, "cn-north-1");
        assert_eq!(arn.name, "a/b");
        assert!(ClusterArn::parse("arn:aws:ec2:us-east-1:123:instance/i-1").is_none());
        assert!(ClusterArn::parse("kind-local").is_none());
    }
}
