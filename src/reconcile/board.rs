//! Observable per-service tunnel status.
//!
//! Two sources drive transitions: optimistic updates after explicit
//! engage/unplug commands, and daemon review snapshots, which overwrite any
//! optimistic guess on the next tick.

use std::collections::BTreeMap;

use crate::context::ServiceMap;
use crate::ipc::{Handle, Report, ServiceState, Tunnel};

/// Status of one service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Tunnel state.
    pub state: ServiceState,
    /// Last error or daemon note.
    pub message: String,
    /// Live tunnels.
    pub tunnels: Vec<Tunnel>,
}

/// Status of every registered service, keyed by handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusBoard {
    entries: BTreeMap<Handle, ServiceStatus>,
}

impl StatusBoard {
    /// Board with every service in `services` asleep.
    #[must_use]
    pub fn from_services(services: &ServiceMap) -> Self {
        let mut board = Self::default();
        board.rebuild(services);
        board
    }

    /// Track exactly the services in `services`, keeping known statuses.
    ///
    /// Returns whether the set of tracked services changed.
    pub fn rebuild(&mut self, services: &ServiceMap) -> bool {
        let mut next: BTreeMap<Handle, ServiceStatus> = services
            .values()
            .flatten()
            .map(|service| {
                (
                    Handle::new(service.pier.clone(), service.name.clone()),
                    ServiceStatus::default(),
                )
            })
            .collect();

        for (handle, status) in &mut next {
            if let Some(known) = self.entries.get(handle) {
                status.clone_from(known);
            }
        }

        let changed = !next.keys().eq(self.entries.keys());
        self.entries = next;
        changed
    }

    /// Status of one service.
    #[must_use]
    pub fn get(&self, handle: &Handle) -> Option<&ServiceStatus> {
        self.entries.get(handle)
    }

    /// State of one service; untracked services are asleep.
    #[must_use]
    pub fn state(&self, handle: &Handle) -> ServiceState {
        self.get(handle).map(|status| status.state).unwrap_or_default()
    }

    /// All tracked services in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (&Handle, &ServiceStatus)> {
        self.entries.iter()
    }

    /// Number of tracked services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no service is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Optimistic update after a successful engage.
    pub fn engage(&mut self, handle: &Handle) {
        let status = self.entries.entry(handle.clone()).or_default();
        if !matches!(status.state, ServiceState::Lonely | ServiceState::Burden) {
            status.state = ServiceState::Lonely;
        }
        status.message.clear();
    }

    /// Optimistic update after a successful unplug.
    pub fn unplug(&mut self, handle: &Handle) {
        self.entries.insert(handle.clone(), ServiceStatus::default());
    }

    /// Put every tracked service to sleep.
    pub fn unplug_all(&mut self) {
        for status in self.entries.values_mut() {
            *status = ServiceStatus::default();
        }
    }

    /// Mark a service broken with the failure message.
    pub fn fail(&mut self, handle: &Handle, message: impl Into<String>) {
        let status = self.entries.entry(handle.clone()).or_default();
        status.state = ServiceState::Broken;
        status.message = message.into();
        status.tunnels.clear();
    }

    /// Replace every status with the daemon's snapshot.
    ///
    /// Tracked services missing from the snapshot are not running.
    /// Returns whether anything changed.
    pub fn apply_reviews(&mut self, reports: Vec<Report>) -> bool {
        let mut next: BTreeMap<Handle, ServiceStatus> = self
            .entries
            .keys()
            .map(|handle| (handle.clone(), ServiceStatus::default()))
            .collect();

        for report in reports {
            next.insert(
                report.health.handle(),
                ServiceStatus {
                    state: report.health.state,
                    message: report.health.message,
                    tunnels: report.tunnels,
                },
            );
        }

        if next == self.entries {
            return false;
        }
        self.entries = next;
        true
    }
}
