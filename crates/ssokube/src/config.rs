//! Configuration types.
//!
//! [`AppConfig`] is the TOML file a user keeps under
//! `$XDG_CONFIG_HOME/ssokube/config.toml`. [`OrchestratorConfig`] is the
//! validated, immutable tuning value handed to every orchestration call.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default alias for generated kubeconfig contexts.
pub const DEFAULT_ALIAS_TEMPLATE: &str = "{account_id}:{region}:{cluster}";

/// Default path of the configuration file.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ssokube").join("config.toml"))
}

/// Default directory for cached SSO tokens.
#[must_use]
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("ssokube").join("sso"))
}

/// Default kubeconfig path: first entry of `$KUBECONFIG`, else `~/.kube/config`.
#[must_use]
pub fn default_kubeconfig_path() -> Option<PathBuf> {
    if let Some(paths) = std::env::var_os("KUBECONFIG") {
        if let Some(first) = std::env::split_paths(&paths).find(|p| !p.as_os_str().is_empty()) {
            return Some(first);
        }
    }
    dirs::home_dir().map(|h| h.join(".kube").join("config"))
}

/// Default AWS shared config path (`~/.aws/config`).
#[must_use]
pub fn default_aws_config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("AWS_CONFIG_FILE") {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|h| h.join(".aws").join("config"))
}

/// Which applier writes local configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ApplierKind {
    /// Structured kubeconfig rewrite in-process.
    #[default]
    Native,
    /// `aws eks update-kubeconfig` as an external process.
    AwsCli,
}

impl std::fmt::Display for ApplierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::AwsCli => write!(f, "aws-cli"),
        }
    }
}

impl std::str::FromStr for ApplierKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "aws-cli" | "awscli" => Ok(Self::AwsCli),
            _ => Err(Error::Configuration(format!(
                "Unknown applier: {s}. Supported: native, aws-cli"
            ))),
        }
    }
}

/// An identity as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum IdentityConfig {
    /// Static credentials managed outside ssokube (an existing AWS profile).
    LongLived {
        /// Default region.
        region: String,
    },
    /// Signs in through IAM Identity Center.
    Federated {
        /// SSO start URL, e.g. `https://my-org.awsapps.com/start`.
        start_url: String,
        /// Region of the Identity Center instance.
        sso_region: String,
        /// Default region for API calls. Falls back to `sso_region`.
        #[serde(default)]
        region: Option<String>,
    },
    /// A role assumed through a federated source identity.
    AssumedRole {
        /// Name of the identity whose SSO session is used.
        source: String,
        /// Account the role lives in.
        account_id: String,
        /// Permission set name.
        role_name: String,
        /// Default region. Falls back to the source's region.
        #[serde(default)]
        region: Option<String>,
    },
}

/// Orchestrator tuning as written in the file or passed on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Maximum concurrent tasks.
    pub max_workers: usize,
    /// Minimum spacing between task dispatches, in milliseconds.
    pub dispatch_delay_ms: u64,
    /// Deadline for a single task, in seconds.
    pub per_task_timeout_secs: u64,
    /// Deadline for a whole run, in seconds.
    pub overall_timeout_secs: u64,
    /// Retries after the first attempt for retryable failures.
    pub max_retries: u32,
    /// First backoff delay, in milliseconds.
    pub backoff_base_ms: u64,
    /// Backoff cap, in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_workers: 8,
            dispatch_delay_ms: 50,
            per_task_timeout_secs: 120,
            overall_timeout_secs: 900,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// Validated orchestration tuning. Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    max_workers: usize,
    dispatch_delay: Duration,
    per_task_timeout: Duration,
    overall_timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl OrchestratorConfig {
    /// Validate settings into a config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a bound is violated.
    pub fn new(settings: &OrchestratorSettings) -> Result<Self> {
        if settings.max_workers == 0 {
            return Err(Error::Configuration(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if settings.per_task_timeout_secs == 0 || settings.overall_timeout_secs == 0 {
            return Err(Error::Configuration(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if settings.per_task_timeout_secs > settings.overall_timeout_secs {
            return Err(Error::Configuration(format!(
                "per_task_timeout_secs ({}) exceeds overall_timeout_secs ({})",
                settings.per_task_timeout_secs, settings.overall_timeout_secs
            )));
        }
        if settings.backoff_max_ms < settings.backoff_base_ms {
            return Err(Error::Configuration(
                "backoff_max_ms must not be below backoff_base_ms".to_string(),
            ));
        }

        Ok(Self::from_settings(settings))
    }

    fn from_settings(settings: &OrchestratorSettings) -> Self {
        Self {
            max_workers: settings.max_workers,
            dispatch_delay: Duration::from_millis(settings.dispatch_delay_ms),
            per_task_timeout: Duration::from_secs(settings.per_task_timeout_secs),
            overall_timeout: Duration::from_secs(settings.overall_timeout_secs),
            max_retries: settings.max_retries,
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            backoff_max: Duration::from_millis(settings.backoff_max_ms),
        }
    }

    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    #[must_use]
    pub fn dispatch_delay(&self) -> Duration {
        self.dispatch_delay
    }

    #[must_use]
    pub fn per_task_timeout(&self) -> Duration {
        self.per_task_timeout
    }

    #[must_use]
    pub fn overall_timeout(&self) -> Duration {
        self.overall_timeout
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_settings(&OrchestratorSettings::default())
    }
}

/// Local file locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Token cache directory.
    pub cache_dir: Option<PathBuf>,
    /// kubeconfig to write.
    pub kubeconfig: Option<PathBuf>,
    /// AWS shared config file to write profiles into.
    pub aws_config: Option<PathBuf>,
}

/// Provisioning options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Context name template. Placeholders: `{account_id}`, `{region}`,
    /// `{cluster}`, `{profile}`.
    pub alias_template: String,
    /// Applier used by `sync`.
    pub applier: ApplierKind,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            alias_template: DEFAULT_ALIAS_TEMPLATE.to_string(),
            applier: ApplierKind::Native,
        }
    }
}

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Identity used when `--identity` is not given.
    pub default_identity: Option<String>,
    /// Accounts to scan. Empty means every account visible to the SSO user.
    pub accounts: Vec<String>,
    /// Regions to scan.
    pub regions: Vec<String>,
    /// Role name prefixes, in priority order.
    pub role_prefixes: Vec<String>,
    /// Explicit role name. Mutually exclusive with `role_prefixes`.
    pub role: Option<String>,
    /// Orchestrator tuning.
    pub orchestrator: OrchestratorSettings,
    /// File locations.
    pub paths: PathsConfig,
    /// Provisioning options.
    pub provision: ProvisionConfig,
    /// Named identities.
    pub identities: BTreeMap<String, IdentityConfig>,
}

impl AppConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one the default location is
    /// used and a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_config_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if required {
                return Err(Error::Configuration(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(
            path = %path.display(),
            identities = config.identities.len(),
            "Loaded config"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] on malformed input.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Parse {
            what: "config.toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Token cache directory, explicit or default.
    ///
    /// # Errors
    ///
    /// Returns an error if no cache directory can be determined.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        self.paths
            .cache_dir
            .clone()
            .or_else(default_cache_dir)
            .ok_or_else(|| Error::Configuration("cannot determine cache directory".to_string()))
    }

    /// kubeconfig path, explicit or default.
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn kubeconfig_path(&self) -> Result<PathBuf> {
        self.paths
            .kubeconfig
            .clone()
            .or_else(default_kubeconfig_path)
            .ok_or_else(|| Error::Configuration("cannot determine kubeconfig path".to_string()))
    }

    /// AWS config path, explicit or default.
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn aws_config_path(&self) -> Result<PathBuf> {
        self.paths
            .aws_config
            .clone()
            .or_else(default_aws_config_path)
            .ok_or_else(|| Error::Configuration("cannot determine AWS config path".to_string()))
    }
}
