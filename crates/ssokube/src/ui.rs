//! Console output helpers.
//!
//! Everything user-facing goes to stdout through these functions. Logs go to
//! stderr through `tracing`.

use colored::Colorize;

use crate::auth::{DeviceAuthorization, VerificationPrompt};
use crate::discovery::{Discovery, DiscoveryStatus};
use crate::error::Error;
use crate::pool::{AggregateReport, RunSummary, TaskKey};
use crate::provision::{ContextInfo, PlannedContext};

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_black());
    println!("{}", title.cyan().bold());
    println!("{}", "═".repeat(70).bright_black());
    println!();
}

/// Print a step indicator with message.
pub fn print_step(message: &str) {
    println!("{} {}", "▶".cyan(), message.bold());
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a key-value pair.
pub fn print_kv(key: &str, value: &str) {
    println!("  {}: {}", key.bright_black(), value);
}

/// Shows the device code on the terminal and tries to open a browser.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt {
    pub open_browser: bool,
}

impl VerificationPrompt for TerminalPrompt {
    fn show(&self, authorization: &DeviceAuthorization) {
        print_section("Sign in to AWS IAM Identity Center");
        println!("  Open this URL and confirm the code:");
        println!();
        println!("  {}", authorization.verification_uri_complete.cyan().underline());
        println!();
        print_kv("Code", &authorization.user_code.bold().to_string());
        print_kv("Or visit", &authorization.verification_uri);
        println!();

        if self.open_browser {
            open_browser(&authorization.verification_uri_complete);
        }
        print_info("Waiting for approval...");
    }
}

fn open_browser(url: &str) {
    let program = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "windows") {
        "explorer"
    } else {
        "xdg-open"
    };
    if let Err(e) = std::process::Command::new(program)
        .arg(url)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
    {
        tracing::debug!(program, error = %e, "Could not open browser");
    }
}

/// Print one line per failed task.
pub fn print_failures<'a, I: TaskKey + 'a>(failures: impl Iterator<Item = (&'a I, &'a Error)>) {
    for (input, error) in failures {
        println!(
            "  {} {} {} {}",
            "✗".red(),
            input.task_key().bold(),
            format!("[{}]", error.kind()).bright_black(),
            error
        );
    }
}

/// Print the run summary line.
pub fn print_summary(label: &str, summary: RunSummary, timed_out: bool) {
    let line = format!("{label}: {summary}");
    if summary.total > 0 && summary.succeeded == 0 {
        print_error(&line);
    } else if summary.failed > 0 {
        print_warning(&line);
    } else {
        print_success(&line);
    }
    if timed_out {
        print_warning("Run deadline reached, unfinished tasks were cancelled");
    }
}

/// Print discovered clusters and per-scan status.
pub fn print_discovery(discovery: &Discovery) {
    print_section("Discovered clusters");
    if discovery.resources.is_empty() {
        print_info("No clusters found");
    }
    let mut current_account = None;
    for resource in &discovery.resources {
        if current_account != Some(resource.account_id.as_str()) {
            current_account = Some(resource.account_id.as_str());
            let label = match &resource.account_name {
                Some(name) => format!("{} ({name})", resource.account_id),
                None => resource.account_id.clone(),
            };
            println!("{}", label.cyan().bold());
        }
        println!(
            "  {} {} {} {}",
            "•".cyan(),
            resource.name.bold(),
            resource.region.bright_black(),
            resource.status.as_deref().unwrap_or("").bright_black()
        );
    }

    let empty: Vec<String> = discovery
        .statuses()
        .filter(|(_, status)| *status == DiscoveryStatus::Empty)
        .map(|(key, _)| key)
        .collect();
    if !empty.is_empty() {
        println!();
        print_info(&format!("No clusters in: {}", empty.join(", ")));
    }

    if discovery.report.failed() > 0 {
        println!();
        print_warning("Failed scans:");
        print_failures(discovery.report.failures());
    }
    println!();
    print_summary(
        &format!("Scans ({})", discovery.counts()),
        discovery.report.summary(),
        discovery.report.timed_out(),
    );
}

/// Print the outcome of a provisioning run.
pub fn print_provision<I: TaskKey, O>(report: &AggregateReport<I, O>) {
    if report.failed() > 0 {
        print_warning("Failed resources:");
        print_failures(report.failures());
    }
    print_summary("Contexts", report.summary(), report.timed_out());
}

/// Print what a dry run would write.
pub fn print_plan(planned: &[PlannedContext]) {
    print_section("Dry run: contexts that would be written");
    for plan in planned {
        println!(
            "  {} {} {} {}",
            "•".cyan(),
            plan.context.bold(),
            "→".bright_black(),
            plan.resource_id
        );
        println!("      {} {}", "profile".bright_black(), plan.profile);
    }
    println!();
    print_info(&format!("{} contexts, nothing written", planned.len()));
}

/// Print kubeconfig contexts with recovered metadata.
pub fn print_contexts(contexts: &[ContextInfo]) {
    if contexts.is_empty() {
        print_info("No contexts in kubeconfig");
        return;
    }
    for ctx in contexts {
        let marker = if ctx.current { "*".green().bold() } else { " ".normal() };
        println!("{marker} {}", ctx.name.bold());
        let fields = [
            ("cluster", &ctx.cluster),
            ("account", &ctx.account_id),
            ("region", &ctx.region),
            ("profile", &ctx.profile),
            ("server", &ctx.server),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                println!("    {}: {}", key.bright_black(), value);
            }
        }
    }
}
