//! Named credential configurations.

use std::sync::Arc;

use crate::config::{AppConfig, IdentityConfig};
use crate::error::{Error, Result};

/// How an identity obtains credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    /// Static credentials managed outside ssokube.
    LongLived,
    /// An IAM Identity Center user.
    Federated,
    /// A permission set assumed through a federated identity.
    AssumedRole,
}

impl std::fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LongLived => write!(f, "long-lived"),
            Self::Federated => write!(f, "federated"),
            Self::AssumedRole => write!(f, "assumed-role"),
        }
    }
}

/// Where an identity signs in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FederationParams {
    /// SSO start URL.
    pub start_url: String,
    /// Region of the Identity Center instance.
    pub region: String,
}

/// Account and permission set of an assumed role.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleTarget {
    pub account_id: String,
    pub role_name: String,
}

/// A named credential configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Name, also used as the AWS profile name.
    pub name: String,
    /// Kind of credentials.
    pub kind: IdentityKind,
    /// Default region for API calls.
    pub region: String,
    /// Federation settings carried by this identity itself.
    pub federation: Option<FederationParams>,
    /// Account and role, for assumed roles.
    pub role: Option<RoleTarget>,
    /// The identity an assumed role was derived from.
    pub source: Option<Arc<Identity>>,
}

impl Identity {
    /// A federated identity.
    #[must_use]
    pub fn federated(
        name: impl Into<String>,
        start_url: impl Into<String>,
        sso_region: impl Into<String>,
    ) -> Self {
        let sso_region = sso_region.into();
        Self {
            name: name.into(),
            kind: IdentityKind::Federated,
            region: sso_region.clone(),
            federation: Some(FederationParams {
                start_url: start_url.into(),
                region: sso_region,
            }),
            role: None,
            source: None,
        }
    }

    /// A long-lived identity that cannot be refreshed.
    #[must_use]
    pub fn long_lived(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: IdentityKind::LongLived,
            region: region.into(),
            federation: None,
            role: None,
            source: None,
        }
    }

    /// Derive an assumed-role identity for `account_id` and `role_name`.
    #[must_use]
    pub fn assume(source: &Arc<Self>, account_id: &str, role_name: &str) -> Self {
        Self {
            name: format!("{}-{account_id}-{role_name}", source.name),
            kind: IdentityKind::AssumedRole,
            region: source.region.clone(),
            federation: None,
            role: Some(RoleTarget {
                account_id: account_id.to_string(),
                role_name: role_name.to_string(),
            }),
            source: Some(Arc::clone(source)),
        }
    }

    /// Federation settings, inherited from the source identity for assumed
    /// roles. Only one level of indirection is followed.
    #[must_use]
    pub fn federation_params(&self) -> Option<&FederationParams> {
        self.federation
            .as_ref()
            .or_else(|| self.source.as_ref().and_then(|s| s.federation.as_ref()))
    }

    /// Resolve a named identity from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the name, or an assumed role's
    /// source, is not configured.
    pub fn from_config(config: &AppConfig, name: &str) -> Result<Self> {
        let entry = config.identities.get(name).ok_or_else(|| {
            Error::Configuration(format!("identity '{name}' is not configured"))
        })?;

        match entry {
            IdentityConfig::LongLived { region } => Ok(Self::long_lived(name, region.clone())),
            IdentityConfig::Federated {
                start_url,
                sso_region,
                region,
            } => {
                let mut identity = Self::federated(name, start_url.clone(), sso_region.clone());
                if let Some(region) = region {
                    identity.region.clone_from(region);
                }
                Ok(identity)
            }
            IdentityConfig::AssumedRole {
                source,
                account_id,
                role_name,
                region,
            } => {
                let source_identity = match config.identities.get(source) {
                    Some(IdentityConfig::AssumedRole { .. }) => {
                        return Err(Error::Configuration(format!(
                            "identity '{name}' has assumed-role source '{source}'; \
                             the source must be federated or long-lived"
                        )));
                    }
                    Some(_) => Arc::new(Self::from_config(config, source)?),
                    None => {
                        return Err(Error::Configuration(format!(
                            "identity '{name}' refers to unknown source '{source}'"
                        )));
                    }
                };
                let mut identity = Self::assume(&source_identity, account_id, role_name);
                identity.name = name.to_string();
                if let Some(region) = region {
                    identity.region.clone_from(region);
                }
                Ok(identity)
            }
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}
