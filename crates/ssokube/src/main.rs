//! ssokube CLI.
//!
//! Signs in through AWS IAM Identity Center, finds EKS clusters across every
//! reachable account and region, and writes kubeconfig contexts for them.

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use ssokube::commands::contexts::ContextsCommand;
use ssokube::commands::discover::DiscoverCommand;
use ssokube::commands::login::LoginCommand;
use ssokube::commands::logout::LogoutCommand;
use ssokube::commands::sync::SyncCommand;
use ssokube::commands::{Context, Outcome};
use ssokube::config::AppConfig;
use ssokube::{ui, Error, ErrorKind};
use tracing_subscriber::EnvFilter;

/// ssokube - EKS kubeconfig sync through IAM Identity Center.
#[derive(Parser)]
#[command(
    name = "ssokube",
    version,
    about = "Sync EKS clusters into kubeconfig through IAM Identity Center",
    long_about = "Sign in once through AWS IAM Identity Center, discover EKS clusters\n\
                  in every account and region you can reach, and write kubeconfig\n\
                  contexts for them.\n\n\
                  Exit status: 0 on success or partial success, 1 when every task\n\
                  failed, 2 on configuration errors."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (default: ~/.config/ssokube/config.toml)
    #[arg(long, global = true, env = "SSOKUBE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print the verification URL instead of opening a browser.
    #[arg(long, global = true)]
    no_browser: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
#[allow(clippy::large_enum_variant)]
enum Commands {
    /// Sign in and cache the SSO token.
    Login(LoginCommand),

    /// Remove the cached SSO token.
    Logout(LogoutCommand),

    /// List clusters across accounts and regions.
    Discover(DiscoverCommand),

    /// Discover clusters and write kubeconfig contexts for them.
    ///
    /// Existing files are backed up once per run before the first write.
    Sync(SyncCommand),

    /// List kubeconfig contexts with their account, region and profile.
    Contexts(ContextsCommand),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match run(cli).await {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(Outcome::Failed) => ExitCode::from(1),
        Err(e) => {
            ui::print_error(&format!("{e:#}"));
            ExitCode::from(exit_status(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<Outcome> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let ctx = Context::new(config, !cli.no_browser)?;

    match cli.command {
        Commands::Login(cmd) => cmd.run(&ctx).await,
        Commands::Logout(cmd) => cmd.run(&ctx).await,
        Commands::Discover(cmd) => cmd.run(&ctx).await,
        Commands::Sync(cmd) => cmd.run(&ctx).await,
        Commands::Contexts(cmd) => cmd.run(&ctx).await,
    }
}

/// 2 for configuration errors anywhere in the chain, 1 otherwise.
fn exit_status(error: &anyhow::Error) -> u8 {
    let configuration = error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<Error>())
        .any(|e| e.kind() == ErrorKind::Configuration);
    if configuration {
        2
    } else {
        1
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info,ssokube=debug,ssokube_cloud=debug")
        } else {
            EnvFilter::new("warn,ssokube=info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
