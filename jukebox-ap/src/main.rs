//! NFC Jukebox (jukebox-ap) - Main entry point
//!
//! Wires the reader thread, tag registry, sink manager, playback controller
//! and HTTP control surface together and runs them until Ctrl-C / SIGTERM.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use jukebox_ap::api::{self, AppContext};
use jukebox_ap::config::{ConfigOverrides, TomlConfig};
use jukebox_ap::playback::{
    run_token_dispatch, CommandPlayer, IdleManager, PlaybackController, SettingsStore,
};
use jukebox_ap::reader::{Pn532, TokenPoller};
use jukebox_ap::registry::TagRegistry;
use jukebox_ap::sink::{Bluetoothctl, LinkStore, ReconcileOutcome, SinkManager};
use jukebox_ap::SharedState;
use jukebox_common::config::{RootFolderInitializer, RootFolderResolver};
use jukebox_common::events::EventBus;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for jukebox-ap
#[derive(Parser, Debug)]
#[command(name = "jukebox-ap")]
#[command(about = "NFC token jukebox with Bluetooth audio output")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "jukebox.toml", env = "JUKEBOX_CONFIG")]
    config: PathBuf,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "JUKEBOX_PORT")]
    port: Option<u16>,

    /// Root folder for tags, link state, settings and music
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Serial device of the PN532 reader (overrides config)
    #[arg(long, env = "JUKEBOX_SERIAL_PORT")]
    serial_port: Option<String>,

    /// Run without reader hardware
    #[arg(long)]
    no_reader: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = ConfigOverrides {
        port: args.port,
        root_folder: args.root_folder.clone(),
        serial_port: args.serial_port.clone(),
    };
    // Parsed before tracing so the configured level applies; errors are
    // reported once the subscriber is up.
    let loaded = TomlConfig::load(&args.config, &overrides);
    let level = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},tower_http=info", level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting jukebox-ap v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = loaded.context("Failed to load configuration")?;

    // Root folder: CLI > env > TOML > OS default
    let root = RootFolderResolver::new()
        .with_cli_arg(overrides.root_folder.clone())
        .with_toml_value(config.root_folder.clone())
        .resolve();
    let layout = RootFolderInitializer::new(root);
    layout
        .ensure_directory_exists()
        .context("Failed to create root folder")?;
    info!("Root folder: {}", layout.root().display());

    // Persisted state
    let events = EventBus::default();
    let state = Arc::new(SharedState::new(events.clone()));
    let registry = Arc::new(TagRegistry::load(layout.tags_path(), events.clone()));
    let settings = Arc::new(SettingsStore::load(layout.settings_path(), events.clone()));

    // Sink manager worker
    let sink = SinkManager::start(
        Box::new(Bluetoothctl::new(config.sink.bluetoothctl.clone())),
        LinkStore::new(layout.link_state_path()),
        config.sink.clone(),
        events.clone(),
    );

    let controller = PlaybackController::new(
        Arc::clone(&registry),
        sink.clone(),
        Arc::new(CommandPlayer::new(config.player.clone())),
        Arc::clone(&settings),
        events.clone(),
    );

    // Reader thread and token dispatch
    let poller_shutdown = Arc::new(AtomicBool::new(false));
    let mut poller_handle = None;
    if args.no_reader {
        warn!("Running without reader hardware (--no-reader)");
    } else {
        let reader = Pn532::open(&config.reader).with_context(|| {
            format!("Failed to open NFC reader on {}", config.reader.serial_port)
        })?;
        let (tx, rx) = mpsc::channel(config.reader.event_queue_capacity);
        let poller = TokenPoller::new(reader, config.reader.clone(), Arc::clone(&state), tx);

        let shutdown = Arc::clone(&poller_shutdown);
        poller_handle = Some(tokio::task::spawn_blocking(move || poller.run(shutdown)));
        tokio::spawn(run_token_dispatch(
            rx,
            controller.clone(),
            config.reader.stop_on_removal,
        ));
        info!(serial_port = %config.reader.serial_port, "Token poller started");
    }

    let idle_task = tokio::spawn(
        IdleManager::new(controller.clone(), Arc::clone(&settings), layout.music_dir()).run(),
    );

    // Startup reconciliation runs alongside everything else
    let reconcile_sink = sink.clone();
    let reconcile_task = tokio::spawn(async move {
        match reconcile_sink.reconcile().await {
            ReconcileOutcome::Exhausted => warn!("Sink reconciliation exhausted"),
            outcome => info!(?outcome, "Sink reconciliation finished"),
        }
    });

    let ctx = AppContext {
        state: Arc::clone(&state),
        registry,
        sink,
        controller: controller.clone(),
        settings,
        music_dir: layout.music_dir(),
    };

    let served = api::run(config.port, ctx, shutdown_signal()).await;

    // Shutdown: reader first so no new tokens arrive, then playback
    poller_shutdown.store(true, Ordering::SeqCst);
    idle_task.abort();
    reconcile_task.abort();
    if let Some(handle) = poller_handle {
        if let Err(e) = handle.await {
            error!("Poller thread panicked: {}", e);
        }
    }
    controller.shutdown().await;

    served.context("HTTP server failed")?;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
