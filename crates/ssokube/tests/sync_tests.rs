//! End-to-end provisioning through the public API.
//!
//! Remote clients are constructed but never reached: the SSO token is
//! pre-seeded in the cache and appliers only touch local files.

#![allow(clippy::doc_markdown)]

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use ssokube::auth::{
    Authenticator, CredentialRefreshGuard, FederationToken, SessionStore, TokenCache,
};
use ssokube::commands::contexts::ContextsCommand;
use ssokube::commands::login::LoginCommand;
use ssokube::commands::{Context, Outcome};
use ssokube::config::{AppConfig, OrchestratorConfig};
use ssokube::discovery::Resource;
use ssokube::identity::Identity;
use ssokube::pool::WorkerPool;
use ssokube::provision::{ConfigProvisioner, ConfigWriter, Kubeconfig, KubeconfigApplier};
use ssokube::ui::TerminalPrompt;
use ssokube::{Error, ErrorKind};
use ssokube_cloud::{SsoOidcClient, SsoPortalClient};
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
default_identity = "corp"
regions = ["eu-west-1", "us-east-1"]
role_prefixes = ["Admin", "ReadOnly"]

[provision]
alias_template = "{account_name}-{region}-{cluster}"

[orchestrator]
max_workers = 3
dispatch_delay_ms = 0

[identities.corp]
kind = "federated"
start_url = "https://corp.awsapps.com/start"
sso_region = "eu-west-1"

[identities.static]
kind = "long-lived"
region = "eu-west-1"
"#;

const EXISTING_KUBECONFIG: &str = r"apiVersion: v1
kind: Config
clusters:
- name: minikube
  cluster:
    server: https://192.168.49.2:8443
users:
- name: minikube
  user:
    client-certificate: /home/dev/.minikube/client.crt
contexts:
- name: minikube
  context:
    cluster: minikube
    user: minikube
current-context: minikube
";

fn config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::from_toml(CONFIG).unwrap();
    config.paths.cache_dir = Some(dir.join("cache"));
    config.paths.kubeconfig = Some(dir.join("kubeconfig"));
    config.paths.aws_config = Some(dir.join("aws-config"));
    config
}

async fn guard(config: &AppConfig) -> Arc<CredentialRefreshGuard> {
    let corp = Identity::from_config(config, "corp").unwrap();
    let params = corp.federation_params().unwrap();
    let cache = Arc::new(TokenCache::new(config.cache_dir().unwrap()));
    cache
        .save(&FederationToken {
            start_url: params.start_url.clone(),
            region: params.region.clone(),
            access_token: "token".into(),
            expires_at: Utc::now() + Duration::hours(1),
            refresh_token: None,
        })
        .await
        .unwrap();

    let authenticator = Arc::new(Authenticator::new(
        Arc::new(SsoOidcClient::new().unwrap()),
        cache,
        Arc::new(TerminalPrompt { open_browser: false }),
    ));
    Arc::new(CredentialRefreshGuard::new(
        authenticator,
        Arc::new(SsoPortalClient::new().unwrap()),
        Arc::new(SessionStore::new()),
    ))
}

fn resources(owner: &Arc<Identity>) -> Vec<Resource> {
    [("prod", "eu-west-1"), ("prod", "us-east-1"), ("staging", "eu-west-1")]
        .into_iter()
        .map(|(name, region)| Resource {
            id: format!("arn:aws:eks:{region}:111111111111:cluster/{name}"),
            name: name.to_string(),
            account_id: "111111111111".into(),
            account_name: Some("platform".into()),
            region: region.to_string(),
            owner_identity: Arc::clone(owner),
            endpoint: Some(format!("https://{name}.{region}.eks.amazonaws.com")),
            certificate_authority: Some("Q0EK".into()),
            version: Some("1.31".into()),
            status: Some("ACTIVE".into()),
        })
        .collect()
}

fn provisioner(config: &AppConfig, guard: Arc<CredentialRefreshGuard>) -> ConfigProvisioner {
    let writer = Arc::new(ConfigWriter::new(
        config.kubeconfig_path().unwrap(),
        config.aws_config_path().unwrap(),
    ));
    ConfigProvisioner::new(
        Arc::new(KubeconfigApplier::new(
            writer,
            config.provision.alias_template.clone(),
        )),
        guard,
        WorkerPool::new(OrchestratorConfig::new(&config.orchestrator).unwrap()),
    )
}

fn backups(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.unwrap().file_name().into_string().ok())
        .filter(|name| name.starts_with("kubeconfig.") && name.ends_with(".bak"))
        .collect()
}

#[tokio::test]
async fn test_sync_merges_into_existing_kubeconfig() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    std::fs::write(config.kubeconfig_path().unwrap(), EXISTING_KUBECONFIG).unwrap();

    let corp = Arc::new(Identity::from_config(&config, "corp").unwrap());
    let owner = Arc::new(Identity::assume(&corp, "111111111111", "AdminAccess"));
    let provisioner = provisioner(&config, guard(&config).await);

    let report = provisioner
        .apply(resources(&owner), None, &CancellationToken::new())
        .await;
    assert_eq!(report.succeeded(), 3);
    assert!(!report.overall_failure());

    let content = std::fs::read_to_string(config.kubeconfig_path().unwrap()).unwrap();
    let kubeconfig = Kubeconfig::parse(&content).unwrap();
    let mut names: Vec<String> = kubeconfig
        .contexts_info()
        .into_iter()
        .map(|ctx| ctx.name)
        .collect();
    names.sort();
    assert_eq!(
        names,
        [
            "minikube",
            "platform-eu-west-1-prod",
            "platform-eu-west-1-staging",
            "platform-us-east-1-prod",
        ]
    );
    assert_eq!(kubeconfig.current_context.as_deref(), Some("minikube"));
    assert!(content.contains("client-certificate: /home/dev/.minikube/client.crt"));

    let aws = std::fs::read_to_string(config.aws_config_path().unwrap()).unwrap();
    assert!(aws.contains("[profile corp-111111111111-AdminAccess]"));
    assert!(aws.contains("sso_start_url = https://corp.awsapps.com/start"));

    assert_eq!(backups(dir.path()).len(), 1);
}

#[tokio::test]
async fn test_second_sync_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let corp = Arc::new(Identity::from_config(&config, "corp").unwrap());
    let owner = Arc::new(Identity::assume(&corp, "111111111111", "AdminAccess"));
    let guard = guard(&config).await;

    let first = provisioner(&config, Arc::clone(&guard))
        .apply(resources(&owner), None, &CancellationToken::new())
        .await;
    assert!(first.successes().all(|(_, applied)| applied.changed));
    let written = std::fs::read_to_string(config.kubeconfig_path().unwrap()).unwrap();

    let second = provisioner(&config, guard)
        .apply(resources(&owner), None, &CancellationToken::new())
        .await;
    assert_eq!(second.succeeded(), 3);
    assert!(second.successes().all(|(_, applied)| !applied.changed));
    assert_eq!(
        std::fs::read_to_string(config.kubeconfig_path().unwrap()).unwrap(),
        written
    );
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let corp = Arc::new(Identity::from_config(&config, "corp").unwrap());
    let owner = Arc::new(Identity::assume(&corp, "111111111111", "AdminAccess"));

    let planned = provisioner(&config, guard(&config).await).plan(resources(&owner), None);
    assert_eq!(planned.len(), 3);
    assert_eq!(planned[0].context, "platform-eu-west-1-prod");
    assert_eq!(planned[0].profile, "corp-111111111111-AdminAccess");
    assert!(!config.kubeconfig_path().unwrap().exists());
    assert!(!config.aws_config_path().unwrap().exists());
}

#[tokio::test]
async fn test_contexts_command_reads_kubeconfig() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let kubeconfig = config.kubeconfig_path().unwrap();
    std::fs::write(&kubeconfig, EXISTING_KUBECONFIG).unwrap();

    let ctx = Context::new(config, false).unwrap();
    let outcome = ContextsCommand {
        kubeconfig: Some(kubeconfig),
    }
    .run(&ctx)
    .await
    .unwrap();
    assert_eq!(outcome, Outcome::Success);
}

#[tokio::test]
async fn test_login_with_long_lived_identity_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Context::new(config(dir.path()), false).unwrap();

    let err = LoginCommand {
        identity: Some("static".into()),
        force: false,
    }
    .run(&ctx)
    .await
    .unwrap_err();
    let kind = err.downcast_ref::<Error>().map(Error::kind);
    assert_eq!(kind, Some(ErrorKind::Configuration));
}

#[tokio::test]
async fn test_login_reuses_cached_token() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    guard(&config).await;
    let ctx = Context::new(config, false).unwrap();

    let outcome = LoginCommand {
        identity: None,
        force: false,
    }
    .run(&ctx)
    .await
    .unwrap();
    assert_eq!(outcome, Outcome::Success);
}
