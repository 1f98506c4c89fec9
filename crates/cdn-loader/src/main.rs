// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! cdn-loader - Entry point for the loader binary
//!
//! Runs in the directory holding the `cdn-X.Y.Z` bundles, keeps the newest
//! one running and updates it from GitHub Releases.

use anyhow::Context;
use cdn_loader::config::CONFIG_FILE;
use cdn_loader::{GithubReleases, Upgrader, load_config};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Self-updating supervisor for versioned CDN bundles")]
struct Args {
    /// Directory holding the version directories (defaults to the current directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Config file (defaults to <root>/cdn_loader.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single update cycle and exit
    #[arg(long)]
    once: bool,

    /// Override the periodic check interval (seconds)
    #[arg(long)]
    check_interval: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cdn_loader=info")),
        )
        .init();

    let args = Args::parse();

    let root = match args.root {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to resolve working directory")?,
    };
    let config_path = args.config.unwrap_or_else(|| root.join(CONFIG_FILE));

    let mut config = load_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    if let Some(secs) = args.check_interval {
        config.check_interval_secs = secs;
    }
    info!(
        "Loaded config: repo={}/{}, check_interval={}s",
        config.repo_owner, config.repo_name, config.check_interval_secs
    );

    let source = GithubReleases::new(&config)?;
    let mut upgrader = Upgrader::new(&root, &config, source);

    if args.once {
        let outcome = upgrader.check_and_update().await;
        info!("Cycle finished: {outcome:?}");
        upgrader.shutdown().await;
        return Ok(());
    }

    upgrader.run(shutdown_signal()).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Interrupt received"),
        () = terminate => info!("SIGTERM received"),
    }
}
