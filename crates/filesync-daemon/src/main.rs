//! filesync-daemon: keeps several local directories in sync through the
//! peer file-sync protocol.
//!
//! Each directory joins one in-process session as its own participant, with
//! a native store and a watcher feeding the coordinator.

use anyhow::{Context, Result, bail};
use clap::Parser;
use filesync_core::{ConflictStrategy, now_millis};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use filesync_daemon::config::{self, Overrides};
use filesync_daemon::session::LocalSession;
use filesync_daemon::watcher::FileWatcher;

#[derive(Parser, Debug)]
#[command(name = "filesync-daemon")]
#[command(about = "Peer file sync daemon")]
struct Args {
    /// Directory to sync (repeat for each participant)
    #[arg(short, long = "dir", required = true)]
    dirs: Vec<PathBuf>,

    /// JSON file with sync options
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between sync cycles (overrides the config file)
    #[arg(long)]
    interval: Option<u64>,

    /// Conflict resolution strategy (prefer-latest, prefer-local or notify)
    #[arg(long)]
    strategy: Option<ConflictStrategy>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,filesync_daemon=debug,filesync_core=debug"
    } else {
        "info,filesync_daemon=info,filesync_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.dirs.len() < 2 {
        bail!("at least two directories are needed to sync anything");
    }

    let overrides = Overrides {
        interval_seconds: args.interval,
        strategy: args.strategy,
    };
    let sync_config = config::load(args.config.as_deref(), &overrides)?;
    info!("Starting filesync-daemon");
    info!(
        "Auto-sync every {}s, strategy {}",
        sync_config.auto_sync_interval_seconds, sync_config.conflict_resolution_strategy
    );

    let mut session = LocalSession::new(sync_config);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut watchers = Vec::with_capacity(args.dirs.len());

    for dir in &args.dirs {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {dir:?}"))?;
        let index = session
            .join(dir.clone(), now_millis())
            .await
            .with_context(|| format!("opening {dir:?}"))?;
        let watcher = FileWatcher::new(index, dir.clone(), event_tx.clone())
            .with_context(|| format!("watching {dir:?}"))?;
        watchers.push(watcher);
    }
    info!("Syncing {} directories. Press Ctrl+C to stop.", watchers.len());

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                session.tick(now_millis()).await;
            }

            Some(event) = event_rx.recv() => {
                debug!("{:?} {} in directory #{}", event.kind, event.path, event.source);
                session.local_change(event.source, now_millis()).await;
            }

            Some(signal) = session.next_signal() => {
                if let Err(e) = session.handle(signal, now_millis()).await {
                    error!("Failed to handle {:?}: {}", signal, e);
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    session.shutdown(now_millis()).await;
    for status in session.statuses().await {
        debug!("Final status: {:?}", status);
    }
    drop(watchers);
    info!("Shutting down");
    Ok(())
}
