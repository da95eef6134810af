//! Launching the slipway daemon when its socket is unreachable.
//!
//! The daemon is started detached with the context home as its only
//! argument and outlives the launching process. Launches are rate limited
//! by a cooldown so a crash-looping daemon is not restarted on every call.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::Settings;
use crate::{AppError, Result};

/// Connection retry schedule after a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RespawnPolicy {
    /// Connection attempts after a launch.
    pub attempts: u32,
    /// Delay before the first attempt; doubled after each failure.
    pub initial_backoff: Duration,
    /// Upper bound for the delay.
    pub max_backoff: Duration,
    /// Minimum gap between two launches.
    pub cooldown: Duration,
}

impl RespawnPolicy {
    /// Policy from the `[ipc]` settings table.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            attempts: settings.ipc.spawn_attempts,
            initial_backoff: Duration::from_millis(settings.ipc.spawn_backoff_ms),
            max_backoff: Duration::from_millis(settings.ipc.spawn_backoff_max_ms),
            cooldown: Duration::from_millis(settings.ipc.respawn_cooldown_ms),
        }
    }

    /// Delay before connection attempt `attempt` (zero based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Starts the daemon for one context home.
#[derive(Debug)]
pub struct DaemonSupervisor {
    program: PathBuf,
    home: PathBuf,
    policy: RespawnPolicy,
    last_launch: Mutex<Option<Instant>>,
}

impl DaemonSupervisor {
    /// Supervisor launching `program` for `home`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, home: impl Into<PathBuf>, policy: RespawnPolicy) -> Self {
        Self {
            program: program.into(),
            home: home.into(),
            policy,
            last_launch: Mutex::new(None),
        }
    }

    /// Supervisor for the daemon named by `settings`.
    ///
    /// # Errors
    ///
    /// `AppError::Config` if the daemon executable cannot be located.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            settings.daemon_program()?,
            settings.home.clone(),
            RespawnPolicy::from_settings(settings),
        ))
    }

    /// Daemon executable.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Retry schedule used after a launch.
    #[must_use]
    pub fn policy(&self) -> &RespawnPolicy {
        &self.policy
    }

    /// Start the daemon unless one was launched within the cooldown.
    ///
    /// Returns whether a process was started.
    ///
    /// # Errors
    ///
    /// `AppError::Transport` if the executable cannot be started.
    pub fn launch(&self) -> Result<bool> {
        let mut last = self
            .last_launch
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(at) = *last {
            if at.elapsed() < self.policy.cooldown {
                warn!(
                    program = %self.program.display(),
                    "daemon launched recently, waiting for it instead of relaunching"
                );
                return Ok(false);
            }
        }

        let mut command = Command::new(&self.program);
        command
            .arg(&self.home)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut command);

        let mut child = command.spawn().map_err(|err| {
            AppError::Transport(format!(
                "failed to launch {}: {err}",
                self.program.display()
            ))
        })?;
        *last = Some(Instant::now());

        info!(
            program = %self.program.display(),
            home = %self.home.display(),
            pid = child.id(),
            "daemon launched"
        );

        // Reap the child if it exits while this process is still alive.
        std::thread::spawn(move || {
            if let Err(err) = child.wait() {
                warn!(%err, "failed to wait on daemon process");
            }
        });

        Ok(true)
    }
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;

    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}
