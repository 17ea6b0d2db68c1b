//! JStratusD Client - Entry Point
//!
//! Command-line front end for deployments: sign in, list and inspect
//! deployments, follow their build logs and rebuild, cancel or delete them.

use std::collections::{BTreeMap, HashMap};
use std::env;

use colored::{ColoredString, Colorize};

use jsd_client::app::options::ClientOptions;
use jsd_client::app::state::AppState;
use jsd_client::errors::ClientError;
use jsd_client::logs::{init_logging, LogOptions};
use jsd_client::models::branch::default_branch;
use jsd_client::models::deployment::{Deployment, DeploymentStatus};
use jsd_client::storage::layout::StorageLayout;
use jsd_client::utils::version_info;
use jsd_client::workers::mutations::NewDeployment;
use jsd_client::workers::poller::TailEvent;

use tracing::{error, info};

const LOGIN_HINT: &str = "Run: jsd --login --email=<email> --password=<password>";

const USAGE: &str = "Usage:
  jsd --login --email=<email> --password=<password>
  jsd --register --name=<name> --email=<email> --password=<password>
  jsd --verify --email=<email> --otp=<code> --password=<password>
  jsd --forgot-password --email=<email>
  jsd --reset-password --email=<email> --otp=<code> --password=<new password>
  jsd --logout
  jsd --list
  jsd --show=<id>
  jsd --tail=<id>
  jsd --rebuild=<id> | --cancel=<id> | --delete=<id>
  jsd --branches=<repoUrl>
  jsd --create --repo=<repoUrl> --name=<project> [--branch=<branch>] [--secret=KEY:VALUE]
  jsd --version
Options:
  --home=<dir>   storage directory (default ~/.jstratusd)";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();
    let mut secrets: BTreeMap<String, String> = BTreeMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            if clean_key == "secret" {
                if let Some((name, secret)) = value.split_once(':') {
                    secrets.insert(name.to_string(), secret.to_string());
                }
                continue;
            }
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return;
    }

    if cli_args.is_empty() || cli_args.contains_key("help") {
        println!("{}", USAGE);
        return;
    }

    // Resolve storage and settings
    let layout = cli_args
        .get("home")
        .map(StorageLayout::new)
        .unwrap_or_default();
    if let Err(e) = layout.setup().await {
        eprintln!("Unable to prepare {}: {e}", layout.base_dir.display());
        std::process::exit(1);
    }

    let settings = match layout.load_settings().await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read settings file: {e}");
            std::process::exit(1);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_to_file.then(|| layout.logs_dir()),
        ..Default::default()
    };
    let log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = ClientOptions::from_settings(&settings, layout);
    info!(version = %version.version, "Running JStratusD client with options: {:?}", options);

    let state = match AppState::init(&options).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to start the client: {e}");
            eprintln!("{} {}", "error:".red(), e.user_message());
            std::process::exit(1);
        }
    };

    let result = dispatch(&state, &options, &cli_args, secrets).await;
    state.shutdown().await;

    match result {
        Err(e) if e.is_unauthorized() || state.session_expired() => {
            eprintln!("{}", e.user_message().as_str().yellow());
            eprintln!("{}", LOGIN_HINT);
        }
        Err(e) => eprintln!("{} {}", "error:".red(), e.user_message()),
        // A tail cut short by the guard finishes quietly; the session is gone all the same.
        Ok(()) if state.session_expired() => eprintln!("{}", LOGIN_HINT),
        Ok(()) => return,
    }
    drop(log_guard);
    std::process::exit(1);
}

async fn dispatch(
    state: &AppState,
    options: &ClientOptions,
    cli_args: &HashMap<String, String>,
    secrets: BTreeMap<String, String>,
) -> Result<(), ClientError> {
    if cli_args.contains_key("login") {
        let email = required(cli_args, "email")?;
        let password = required(cli_args, "password")?;
        let session = state.auth.login(email, password).await?;
        match session.user_id() {
            Some(user_id) => println!("{} as {}", "Logged in".green(), user_id),
            None => println!("{}", "Logged in".green()),
        }
        return Ok(());
    }

    if cli_args.contains_key("register") {
        let email = required(cli_args, "email")?;
        state
            .auth
            .register(required(cli_args, "name")?, email, required(cli_args, "password")?)
            .await?;
        println!("Verification code sent to {}", email);
        println!("Confirm it with: jsd --verify --email={} --otp=<code> --password=<password>", email);
        return Ok(());
    }

    if cli_args.contains_key("verify") {
        let session = state
            .auth
            .verify_email(
                required(cli_args, "email")?,
                required(cli_args, "otp")?,
                required(cli_args, "password")?,
            )
            .await?;
        println!("{} {}", "Email verified.".green(), "Logged in".green());
        if let Some(user_id) = session.user_id() {
            println!("user {}", user_id);
        }
        return Ok(());
    }

    if cli_args.contains_key("forgot-password") {
        let email = required(cli_args, "email")?;
        state.auth.request_password_reset(email).await?;
        println!("Reset code sent to {}", email);
        return Ok(());
    }

    if cli_args.contains_key("reset-password") {
        state
            .auth
            .reset_password(
                required(cli_args, "email")?,
                required(cli_args, "otp")?,
                required(cli_args, "password")?,
            )
            .await?;
        println!("Password updated. {}", LOGIN_HINT);
        return Ok(());
    }

    if cli_args.contains_key("logout") {
        state.logout().await?;
        println!("Logged out");
        return Ok(());
    }

    if !state.credentials.get().is_authenticated() {
        return Err(ClientError::Unauthorized("not logged in".to_string()));
    }

    if cli_args.contains_key("list") {
        let deployments = state.cache.list().await?;
        if deployments.is_empty() {
            println!("No deployments yet");
        }
        for deployment in &deployments {
            println!(
                "{:<38} {:<12} {:<24} {}",
                deployment.id,
                paint(&deployment.status),
                deployment.name,
                deployment.created_at.format("%Y-%m-%d %H:%M")
            );
        }
        return Ok(());
    }

    if let Some(id) = cli_args.get("show") {
        let deployment = state.cache.get(id).await?;
        print_deployment(&deployment, &options.backend_base_url);
        return Ok(());
    }

    if let Some(id) = cli_args.get("tail") {
        return tail(state, id).await;
    }

    if let Some(id) = cli_args.get("rebuild") {
        state.cache.get(id).await?;
        state.mutations.rebuild(id).await?;
        println!("Rebuild of {} requested", id);
        return Ok(());
    }

    if let Some(id) = cli_args.get("cancel") {
        state.cache.get(id).await?;
        state.mutations.cancel(id).await?;
        println!("Cancel of {} requested", id);
        return Ok(());
    }

    if let Some(id) = cli_args.get("delete") {
        state.cache.get(id).await?;
        state.mutations.delete(id).await?;
        println!("Deployment {} deleted", id);
        return Ok(());
    }

    if let Some(repo_url) = cli_args.get("branches") {
        let branches = state.mutations.branches(repo_url).await?;
        let default = default_branch(&branches).map(str::to_string);
        for branch in &branches {
            if Some(branch) == default.as_ref() {
                println!("{} {}", branch, "(default)".dimmed());
            } else {
                println!("{}", branch);
            }
        }
        return Ok(());
    }

    if cli_args.contains_key("create") {
        let deployment = NewDeployment {
            repo_url: required(cli_args, "repo")?.to_string(),
            project_name: required(cli_args, "name")?.to_string(),
            branch: cli_args.get("branch").cloned(),
            secrets,
        };
        let id = state.mutations.create(deployment).await?;
        println!("Deployment {} created", id);
        println!("Follow it with: jsd --tail={}", id);
        return Ok(());
    }

    println!("{}", USAGE);
    Ok(())
}

async fn tail(state: &AppState, id: &str) -> Result<(), ClientError> {
    let mut log_tail = state.poller.watch(id);

    loop {
        tokio::select! {
            event = log_tail.next() => match event {
                Some(TailEvent::Status(deployment)) => {
                    println!("{} {} ({})", "status".bold(), paint(&deployment.status), deployment.name);
                    if deployment.status == DeploymentStatus::Queued {
                        println!("{}", "Waiting for the build to start...".dimmed());
                    }
                }
                Some(TailEvent::Logs(entries)) => {
                    for entry in entries {
                        println!("{} {}", entry.display_time().dimmed(), entry.content);
                    }
                }
                Some(TailEvent::Ended(status)) => {
                    println!("{} {}", "finished".bold(), paint(&status));
                    return Ok(());
                }
                Some(TailEvent::Error(e)) => {
                    if e.is_unauthorized() {
                        return Err(e);
                    }
                    eprintln!("{} {}", "warning:".yellow(), e.user_message());
                }
                Some(TailEvent::Removed) => {
                    println!("Deployment {} no longer exists", id);
                    return Ok(());
                }
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                state.poller.stop(id);
                return Ok(());
            }
        }
    }
}

fn print_deployment(deployment: &Deployment, base_url: &str) {
    println!("{:<10} {}", "id".bold(), deployment.id);
    println!("{:<10} {}", "name".bold(), deployment.name);
    println!("{:<10} {}", "status".bold(), paint(&deployment.status));
    println!("{:<10} {}", "branch".bold(), deployment.branch);
    if let Some(repo) = &deployment.repository_url {
        println!("{:<10} {}", "repo".bold(), repo);
    }
    println!("{:<10} {}", "created".bold(), deployment.created_at.to_rfc3339());
    if let Some(url) = deployment.public_url(base_url) {
        println!("{:<10} {}", "url".bold(), url.as_str().underline());
    }
}

fn paint(status: &DeploymentStatus) -> ColoredString {
    let label = status.label();
    match status {
        DeploymentStatus::Queued => label.blue(),
        DeploymentStatus::Building => label.yellow(),
        DeploymentStatus::Ready => label.green(),
        DeploymentStatus::Failed | DeploymentStatus::TimedOut => label.red(),
        DeploymentStatus::Cancelled => label.dimmed(),
        DeploymentStatus::Unknown(_) => label.normal(),
    }
}

fn required<'a>(cli_args: &'a HashMap<String, String>, key: &str) -> Result<&'a str, ClientError> {
    cli_args
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty() && *v != "true")
        .ok_or_else(|| ClientError::Validation(format!("--{}=<value> is required", key)))
}
