//! Periodic reconciliation timer.
//!
//! Each tick refreshes the context store and merges a daemon review into
//! the status board. Failures are edge-triggered: only the first failure of
//! a streak is reported, followed by a single recovery event.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::streak::FailureStreak;
use super::Controller;
use crate::config::ReconcileConfig;

/// Events emitted by the reconciler for user-facing surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// Another process changed the context; dependent views were rebuilt.
    ContextReloaded,
    /// First failure of a streak.
    Failure {
        /// Flattened error message.
        message: String,
    },
    /// A tick succeeded after a failure streak.
    Recovered,
}

/// Builder for the reconciliation task.
///
/// Call [`spawn`](Self::spawn) to start the timer.
pub struct Reconciler {
    controller: Arc<Controller>,
    initial_delay: Duration,
    interval: Duration,
    event_tx: mpsc::Sender<ReconcileEvent>,
    cancel: CancellationToken,
}

impl Reconciler {
    /// Construct a reconciler (does not start the timer yet).
    #[must_use]
    pub fn new(
        controller: Arc<Controller>,
        schedule: &ReconcileConfig,
        event_tx: mpsc::Sender<ReconcileEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            controller,
            initial_delay: Duration::from_millis(schedule.initial_delay_ms),
            interval: Duration::from_millis(schedule.interval_ms),
            event_tx,
            cancel,
        }
    }

    /// Spawn the timer task and return a handle for stopping it.
    #[must_use]
    pub fn spawn(self) -> ReconcilerHandle {
        let cancel = self.cancel.clone();
        let join_handle = tokio::spawn(self.run().instrument(info_span!("reconciler")));
        ReconcilerHandle {
            join_handle: Some(join_handle),
            cancel,
        }
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.initial_delay, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut streak = FailureStreak::default();

        info!(
            initial_delay_ms = self.initial_delay.as_millis(),
            interval_ms = self.interval.as_millis(),
            "reconciler started"
        );

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                outcome = self.controller.reconcile_once() => outcome,
            };

            match outcome {
                Ok(reloaded) => {
                    if reloaded {
                        let _ = self.event_tx.send(ReconcileEvent::ContextReloaded).await;
                    }
                    if streak.success() {
                        info!("reconciliation recovered");
                        let _ = self.event_tx.send(ReconcileEvent::Recovered).await;
                    }
                }
                Err(err) => {
                    if streak.failure() {
                        warn!(%err, "reconciliation failed");
                        let _ = self
                            .event_tx
                            .send(ReconcileEvent::Failure {
                                message: err.to_string(),
                            })
                            .await;
                    } else {
                        debug!(failures = streak.count(), %err, "reconciliation still failing");
                    }
                }
            }
        }

        info!("reconciler stopped");
    }
}

/// Handle returned from [`Reconciler::spawn`].
///
/// Dropping the handle stops the timer.
#[derive(Debug)]
pub struct ReconcilerHandle {
    join_handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl ReconcilerHandle {
    /// Stop the timer. Safe to call repeatedly.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether [`stop`](Self::stop) has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the timer and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
