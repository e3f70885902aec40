//! `mailmirror` - one-way incremental IMAP to mbox mirror.
//!
//! Connects to an IMAP4rev1 server, opens one folder read-only and streams
//! every message newer than the persisted checkpoint into a local mbox file
//! or a delivery command, then waits in IDLE for server pushes.

mod config;
mod lock;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailmirror_core::{Engine, Sink};

use config::Config;
use lock::DirLock;

/// mbox file name inside the target directory.
const MBOX_FILE: &str = "mbox";

#[derive(Debug, Parser)]
#[command(
    name = "mailmirror",
    version,
    about = "One-way incremental IMAP to mbox mirror"
)]
struct Cli {
    /// Target directory holding the config file and the mirror state.
    directory: PathBuf,
}

fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Failed to install rustls crypto provider");
        std::process::exit(1);
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mailmirror=info,mailmirror_core=info,mailmirror_imap=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    run(cli)
}

#[tokio::main]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.directory)?;

    let _lock = DirLock::acquire(&cli.directory)
        .with_context(|| format!("cannot lock {}", cli.directory.display()))?;

    let sink = match &config.command {
        Some(command) => Sink::command(command)?,
        None => Sink::mbox(&cli.directory.join(MBOX_FILE)),
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let mut engine = Engine::new(config.mirror, &cli.directory, sink, shutdown);
    engine.run().await?;

    info!("shutdown complete");
    Ok(())
}

/// Cancels the token on INT or TERM.
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!(error = %e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                shutdown.cancel();
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
            _ = term.recv() => info!("termination requested, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received, shutting down");
    }

    shutdown.cancel();
}
