//! PaperTrail binary
//!
//! `engine` runs the tick loop and is the only process that writes the
//! shared store. `monitor` follows the same store read-only. `store` serves
//! the shared blob.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use papertrail::config::{AppConfig, LoggingConfig};
use papertrail::oracle::{FeedClient, FeedEvent, PriceFeed, ReconnectPolicy};
use papertrail::paper_trading::PaperTradingEngine;
use papertrail::server::{start_control_server, start_store_server, ControlCommand};
use papertrail::store::{spawn_writer, StoreClient, StoreState, StoreSynchronizer, SyncRole};

const SUMMARY_INTERVAL_SECS: u64 = 60;

#[derive(Parser)]
#[command(name = "papertrail")]
#[command(about = "Paper-position tracker with a shared snapshot store", long_about = None)]
struct Cli {
    /// Base config file, without extension
    #[arg(long, default_value = "config/default")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading engine (sole writer of the shared store)
    Engine,
    /// Follow the shared store read-only and log the exits it expects
    Monitor {
        /// Seconds between store polls
        #[arg(long, default_value_t = 5)]
        poll_secs: u64,
    },
    /// Serve the shared store
    Store {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;
    setup_logging(&config.logging);

    info!("⚙️ Config: {}", config.digest());

    match cli.command {
        Commands::Engine => run_engine(config).await,
        Commands::Monitor { poll_secs } => run_monitor(config, poll_secs).await,
        Commands::Store { port, data_dir } => {
            let port = port.unwrap_or(config.server.port);
            let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(&config.server.data_dir));
            tokio::select! {
                result = start_store_server(port, data_dir) => result,
                _ = shutdown_signal() => {
                    info!("🛑 [STORE] Shutting down");
                    Ok(())
                }
            }
        }
    }
}

fn setup_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to create SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

fn spawn_feed(config: &AppConfig) -> mpsc::Receiver<FeedEvent> {
    let (tx, rx) = mpsc::channel(1024);
    let mut feed = FeedClient::new(config.feed.url.clone(), ReconnectPolicy::from(&config.feed));
    tokio::spawn(async move {
        if let Err(e) = feed.connect(tx).await {
            error!(error = %e, "[FEED] Feed task ended");
        }
    });
    rx
}

fn log_feed_event(event: &FeedEvent) {
    match event {
        FeedEvent::Tick(_) => {}
        FeedEvent::Connected(source) => info!(source = %source, "[FEED] Connected"),
        FeedEvent::Disconnected(source) => warn!(source = %source, "[FEED] Disconnected"),
        FeedEvent::Error(source, e) => debug!(source = %source, error = %e, "[FEED] Error"),
    }
}

/// Fetch the remote snapshot off the loop, adopting its version; `None` on failure
fn spawn_load(sync: StoreSynchronizer, tx: mpsc::Sender<Option<StoreState>>) {
    tokio::spawn(async move {
        let loaded = match sync.load().await {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, "[STORE] Load failed, keeping local state");
                None
            }
        };
        let _ = tx.send(loaded).await;
    });
}

async fn run_engine(config: AppConfig) -> Result<()> {
    let client = StoreClient::new(&config.store.url, config.store.timeout_ms)
        .context("Failed to build store client")?;
    let sync = StoreSynchronizer::new(client, SyncRole::Writer);
    let mut engine = PaperTradingEngine::from_config(&config);

    match sync.health().await {
        Ok(health) => info!(
            version = health.version,
            trades = health.total_trades,
            active = health.active_trade_count,
            "✅ [STORE] Store reachable"
        ),
        Err(e) => warn!(error = %e, "[STORE] Store unreachable, continuing with local state"),
    }
    match sync.load().await {
        Ok(state) => {
            engine.restore(state);
            info!("{}", engine.summary_string());
        }
        Err(e) => warn!(error = %e, "[STORE] Initial load failed, starting empty"),
    }

    let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot());
    let (conflict_tx, mut conflict_rx) = mpsc::channel(4);
    let writer = spawn_writer(sync.clone(), snapshot_rx, conflict_tx);

    let (reload_tx, mut reload_rx) = mpsc::channel(1);
    let mut reload_pending = false;

    let (control_tx, mut control_rx) = mpsc::channel(16);
    let control_port = config.engine.control_port;
    tokio::spawn(async move {
        if let Err(e) = start_control_server(control_port, control_tx).await {
            error!(error = %e, "[ENGINE] Control endpoint stopped");
        }
    });

    let mut feed_rx = spawn_feed(&config);

    let mut ticker = tokio::time::interval(Duration::from_millis(config.engine.tick_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut summary = tokio::time::interval(Duration::from_secs(SUMMARY_INTERVAL_SECS));
    summary.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!(assets = ?engine.assets(), "🚀 [ENGINE] Running");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            Some(event) = feed_rx.recv() => {
                log_feed_event(&event);
                if let FeedEvent::Tick(tick) = event {
                    engine.ingest(&tick, Utc::now());
                }
            }

            _ = ticker.tick() => {
                let report = engine.on_tick(Utc::now());
                if report.state_changed() && !reload_pending {
                    let _ = snapshot_tx.send(engine.snapshot());
                }
            }

            Some(command) = control_rx.recv() => match command {
                ControlCommand::Close { request, reply } => {
                    let result = engine.manual_close(&request, Utc::now());
                    if result.is_ok() && !reload_pending {
                        let _ = snapshot_tx.send(engine.snapshot());
                    }
                    let _ = reply.send(result);
                }
                ControlCommand::Stats { reply } => {
                    let _ = reply.send(engine.stats());
                }
            },

            Some(conflict) = conflict_rx.recv() => {
                if !reload_pending {
                    warn!(
                        local_version = conflict.local,
                        remote_version = conflict.remote,
                        "🔄 [ENGINE] Store moved ahead, rebasing before next push"
                    );
                    reload_pending = true;
                    spawn_load(sync.clone(), reload_tx.clone());
                }
            }

            Some(loaded) = reload_rx.recv() => {
                reload_pending = false;
                // Local state stays authoritative
                if let Some(remote) = loaded {
                    engine.rebase(remote);
                }
                let _ = snapshot_tx.send(engine.snapshot());
            }

            _ = summary.tick() => info!("{}", engine.summary_string()),
        }
    }

    // Let an in-flight push finish, then push the final state once
    drop(snapshot_tx);
    let grace = Duration::from_millis(config.store.timeout_ms);
    if tokio::time::timeout(grace, writer).await.is_err() {
        warn!("[STORE] Writer still busy at shutdown");
    }
    match sync.save(&engine.snapshot()).await {
        Ok(ack) => info!(version = ack.version, "💾 [STORE] Final state saved"),
        Err(e) => warn!(error = %e, "[STORE] Final save failed"),
    }
    info!("{}", engine.summary_string());
    Ok(())
}

async fn run_monitor(config: AppConfig, poll_secs: u64) -> Result<()> {
    let client = StoreClient::new(&config.store.url, config.store.timeout_ms)
        .context("Failed to build store client")?;
    let sync = StoreSynchronizer::new(client, SyncRole::ReadOnly);
    let mut engine = PaperTradingEngine::from_config(&config);

    let (load_tx, mut load_rx) = mpsc::channel(1);
    let mut load_pending = false;
    let mut feed_rx = spawn_feed(&config);

    let mut poll = tokio::time::interval(Duration::from_secs(poll_secs.max(1)));
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticker = tokio::time::interval(Duration::from_millis(config.engine.tick_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_preview = Vec::new();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("👀 [MONITOR] Following store read-only");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            Some(event) = feed_rx.recv() => {
                log_feed_event(&event);
                if let FeedEvent::Tick(tick) = event {
                    engine.ingest(&tick, Utc::now());
                }
            }

            _ = poll.tick() => {
                if !load_pending {
                    load_pending = true;
                    spawn_load(sync.clone(), load_tx.clone());
                }
            }

            Some(loaded) = load_rx.recv() => {
                load_pending = false;
                if let Some(state) = loaded {
                    engine.restore(state);
                }
            }

            _ = ticker.tick() => {
                let preview = engine.preview_exits();
                if preview != last_preview {
                    for (asset, transition) in &preview {
                        info!(asset = %asset, transition = ?transition, "👀 [MONITOR] Expected transition");
                    }
                    last_preview = preview;
                }
            }
        }
    }

    info!("{}", engine.summary_string());
    Ok(())
}
