#![forbid(unsafe_code)]

//! `webpier-bridge`: keeps a status board of webpier tunnels in sync with
//! the shared context and the slipway daemon until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use webpier_bridge::reconcile::{Controller, ReconcileEvent, StatusBoard};
use webpier_bridge::{AppError, Result, Settings};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "webpier-bridge", about = "WebPier context and tunnel monitor", version, long_about = None)]
struct Cli {
    /// Path to the TOML settings file.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Override the context home directory.
    #[arg(long)]
    home: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("webpier-bridge bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut settings = match args.settings {
        Some(ref path) => Settings::load_from_path(path)?,
        None => Settings::default(),
    };
    if let Some(home) = args.home {
        settings.home = home;
    }
    info!(home = %settings.home.display(), "settings loaded");

    let controller = Arc::new(Controller::from_settings(&settings)?);
    {
        let store = controller.store();
        let store = store
            .lock()
            .map_err(|_| AppError::Io("context store lock poisoned".into()))?;
        if store.is_initialized() {
            info!(pier = store.get_pier(), "context loaded");
        } else {
            warn!("context not initialized yet, waiting for `webpier-ctl init`");
        }
    }

    let ct = CancellationToken::new();
    let (event_tx, mut event_rx) = mpsc::channel(32);
    let reconciler = controller.spawn_reconciler(event_tx, ct.child_token());

    let mut board_rx = controller.subscribe();
    let watcher_ct = ct.clone();
    let board_watcher = tokio::spawn(async move {
        let mut previous = board_rx.borrow().clone();
        loop {
            tokio::select! {
                () = watcher_ct.cancelled() => break,
                changed = board_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = board_rx.borrow_and_update().clone();
                    log_transitions(&previous, &current);
                    previous = current;
                }
            }
        }
    });

    let event_ct = ct.clone();
    let event_logger = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = event_ct.cancelled() => break,
                event = event_rx.recv() => match event {
                    Some(ReconcileEvent::ContextReloaded) => info!("context reloaded from disk"),
                    Some(ReconcileEvent::Failure { message }) => error!(%message, "tunnel status unavailable"),
                    Some(ReconcileEvent::Recovered) => info!("tunnel status available again"),
                    None => break,
                },
            }
        }
    });

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    reconciler.shutdown().await;
    let _ = board_watcher.await;
    let _ = event_logger.await;

    info!("webpier-bridge shut down");
    Ok(())
}

fn log_transitions(previous: &StatusBoard, current: &StatusBoard) {
    for (handle, status) in current.iter() {
        let before = previous.state(handle);
        if previous.get(handle) != Some(status) {
            info!(
                service = %handle,
                from = %before,
                to = %status.state,
                tunnels = status.tunnels.len(),
                message = %status.message,
                "service status changed"
            );
        }
    }
    for (handle, _) in previous.iter() {
        if current.get(handle).is_none() {
            info!(service = %handle, "service no longer registered");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
