mod commands;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trackmove::{Backend, Collection, RetryingBackend, SyncOptions};
use trackmove_remote::{RemoteBackend, RemoteBackendConfig};
use trackmove_store::ActivityStore;

use crate::config::{AppConfig, BackendEntry, BackendType};

#[derive(Parser)]
#[command(name = "trackmove")]
#[command(about = "Compare and synchronize GPS activities between backends")]
struct Cli {
    /// Config file (defaults to ~/.config/trackmove/backends.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the activities of a backend
    List {
        /// Backend label from the config file
        backend: String,
    },
    /// Show which activities two backends have in common
    Diff { left: String, right: String },
    /// Copy activities missing in the target from the source
    Sync {
        source: String,
        target: String,
        /// Show what would be copied without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Remove each activity from the source once its copy is verified
        #[arg(long)]
        remove_after_copy: bool,
        /// Copy matched activities again, replacing the target copy
        #[arg(long)]
        overwrite_matched: bool,
        /// Compare routes of every match, not only ambiguous ones
        #[arg(long)]
        verify_routes: bool,
    },
}

/// Logs go to stderr so command output stays clean on stdout.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn build_backend(entry: &BackendEntry) -> Result<Arc<dyn Backend>> {
    match &entry.backend_type {
        BackendType::Store { path } => {
            let path = match path {
                Some(path) => path.clone(),
                None => config::default_store_path(&entry.label)
                    .context("could not determine data directory")?,
            };
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create directory: {}", dir.display()))?;
            }
            let store = ActivityStore::open(&path, &entry.label)
                .with_context(|| format!("failed to open store at {}", path.display()))?;
            Ok(Arc::new(store))
        }
        BackendType::Remote {
            url,
            username,
            token_env,
            unsupported,
        } => {
            let token = match token_env {
                Some(var) => Some(
                    std::env::var(var)
                        .with_context(|| format!("[{}] needs ${var} to be set", entry.label))?,
                ),
                None => None,
            };
            Ok(Arc::new(RemoteBackend::new(RemoteBackendConfig {
                label: entry.label.clone(),
                base_url: url.clone(),
                username: username.clone(),
                token,
                unsupported: unsupported.clone(),
            })))
        }
    }
}

fn open_collection(config: &AppConfig, label: &str) -> Result<Collection> {
    let entry = config.backend(label).with_context(|| {
        let known: Vec<&str> = config.backends.iter().map(|b| b.label.as_str()).collect();
        format!("unknown backend [{label}] (configured: {})", known.join(", "))
    })?;
    let backend = build_backend(entry)?;
    let retrying = RetryingBackend::new(backend, config.retry.policy());
    Ok(Collection::new(Arc::new(retrying)))
}

/// Cancel the token on the first Ctrl-C. The unit in flight still finishes.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping after the current activity");
            cancel.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let app_config = config::load_config(cli.config.as_deref());

    match cli.command {
        Command::List { backend } => {
            let mut collection = open_collection(&app_config, &backend)?;
            commands::list::run(&mut collection).await
        }
        Command::Diff { left, right } => {
            let mut left = open_collection(&app_config, &left)?;
            let mut right = open_collection(&app_config, &right)?;
            commands::diff::run(&mut left, &mut right, &app_config.matching.policy()).await
        }
        Command::Sync {
            source,
            target,
            dry_run,
            remove_after_copy,
            overwrite_matched,
            verify_routes,
        } => {
            if source == target {
                anyhow::bail!("source and target must differ");
            }
            let mut source = open_collection(&app_config, &source)?;
            let mut target = open_collection(&app_config, &target)?;

            let mut policy = app_config.matching.policy();
            policy.verify_routes = verify_routes;
            let options = SyncOptions {
                dry_run,
                remove_after_copy,
                skip_matched: !overwrite_matched,
                policy,
            };

            let cancel = cancel_on_ctrl_c();
            commands::sync::run(&mut source, &mut target, &options, &cancel).await
        }
    }
}
