//! Ties the context store, the daemon client, and the status board together.
//!
//! [`Controller`] is constructed once per process and shared by reference
//! (usually behind an `Arc`). Explicit commands update the board
//! optimistically; the [`Reconciler`] replaces those guesses with daemon
//! snapshots on every tick.

pub mod board;
pub mod runner;
pub mod streak;

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

pub use board::{ServiceStatus, StatusBoard};
pub use runner::{ReconcileEvent, Reconciler, ReconcilerHandle};
pub use streak::FailureStreak;

use crate::config::{ReconcileConfig, Settings};
use crate::context::ContextStore;
use crate::ipc::{Handle, IpcClient};
use crate::{AppError, Result};

/// Context store shared between the async runtime and blocking file work.
pub type SharedStore = Arc<Mutex<ContextStore>>;

/// Explicit context object for one bridge process.
#[derive(Debug)]
pub struct Controller {
    store: SharedStore,
    client: Arc<IpcClient>,
    board: watch::Sender<StatusBoard>,
    schedule: ReconcileConfig,
}

impl Controller {
    /// Controller over an opened store and a daemon client.
    #[must_use]
    pub fn new(store: ContextStore, client: IpcClient, schedule: ReconcileConfig) -> Self {
        let (board, _) = watch::channel(StatusBoard::from_services(&store.get_services()));
        Self {
            store: Arc::new(Mutex::new(store)),
            client: Arc::new(client),
            board,
            schedule,
        }
    }

    /// Controller for the home and daemon named by `settings`.
    ///
    /// # Errors
    ///
    /// Errors from [`ContextStore::open`].
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let store = ContextStore::open(settings)?;
        let client = IpcClient::from_settings(settings);
        Ok(Self::new(store, client, settings.reconcile.clone()))
    }

    /// Shared context store.
    #[must_use]
    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    /// Daemon client.
    #[must_use]
    pub fn client(&self) -> &Arc<IpcClient> {
        &self.client
    }

    /// Receiver observing every board change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StatusBoard> {
        self.board.subscribe()
    }

    /// Snapshot of the board.
    #[must_use]
    pub fn board(&self) -> StatusBoard {
        self.board.borrow().clone()
    }

    /// Run `op` against the store on the blocking pool.
    ///
    /// Store operations take file locks and may wait on other processes.
    ///
    /// # Errors
    ///
    /// Whatever `op` returns, or `Io` if the blocking task panicked.
    pub async fn with_store<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ContextStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let mut store = store.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut store)
        })
        .await
        .map_err(|err| AppError::Io(format!("context task failed: {err}")))?
    }

    /// Engage one service and mark it running.
    ///
    /// On failure the service is marked broken with the error message.
    ///
    /// # Errors
    ///
    /// Errors from [`IpcClient::engage_service`].
    pub async fn start_service(&self, handle: &Handle) -> Result<()> {
        match self.client.engage_service(handle).await {
            Ok(()) => {
                info!(service = %handle, "service engaged");
                self.board.send_modify(|board| board.engage(handle));
                Ok(())
            }
            Err(err) => {
                warn!(service = %handle, %err, "failed to engage service");
                self.board.send_modify(|board| board.fail(handle, err.to_string()));
                Err(err)
            }
        }
    }

    /// Unplug one service and mark it asleep.
    ///
    /// On failure the service is marked broken with the error message.
    ///
    /// # Errors
    ///
    /// Errors from [`IpcClient::unplug_service`].
    pub async fn stop_service(&self, handle: &Handle) -> Result<()> {
        match self.client.unplug_service(handle).await {
            Ok(()) => {
                info!(service = %handle, "service unplugged");
                self.board.send_modify(|board| board.unplug(handle));
                Ok(())
            }
            Err(err) => {
                warn!(service = %handle, %err, "failed to unplug service");
                self.board.send_modify(|board| board.fail(handle, err.to_string()));
                Err(err)
            }
        }
    }

    /// Engage every service the daemon starts on its own; the board
    /// learns the outcome on the next review.
    ///
    /// # Errors
    ///
    /// Errors from [`IpcClient::engage_all`].
    pub async fn start_all(&self) -> Result<()> {
        self.client.engage_all().await?;
        info!("all services engaged");
        Ok(())
    }

    /// Unplug every service and mark all of them asleep.
    ///
    /// # Errors
    ///
    /// Errors from [`IpcClient::unplug_all`].
    pub async fn stop_all(&self) -> Result<()> {
        self.client.unplug_all().await?;
        info!("all services unplugged");
        self.board.send_modify(StatusBoard::unplug_all);
        Ok(())
    }

    /// One reconciliation pass: refresh the store, rebuild the board if it
    /// reloaded, then merge a daemon review.
    ///
    /// Returns whether the context was reloaded.
    ///
    /// # Errors
    ///
    /// Store errors from the refresh or client errors from the review.
    pub async fn reconcile_once(&self) -> Result<bool> {
        async {
            let reloaded = self
                .with_store(|store| Ok(store.refresh()?.then(|| store.get_services())))
                .await?;

            if let Some(ref services) = reloaded {
                self.board.send_if_modified(|board| board.rebuild(services));
            }

            let reports = self.client.review_all().await?;
            self.board
                .send_if_modified(|board| board.apply_reviews(reports));

            Ok(reloaded.is_some())
        }
        .instrument(info_span!("reconcile_tick"))
        .await
    }

    /// Start the reconciliation timer using this controller's schedule.
    #[must_use]
    pub fn spawn_reconciler(
        self: &Arc<Self>,
        event_tx: mpsc::Sender<ReconcileEvent>,
        cancel: CancellationToken,
    ) -> ReconcilerHandle {
        Reconciler::new(Arc::clone(self), &self.schedule, event_tx, cancel).spawn()
    }
}
