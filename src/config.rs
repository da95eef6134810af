//! Bridge settings parsing, validation, and daemon module lookup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::{AppError, Result};

/// Name of the daemon entry in the module configuration file.
pub const DAEMON_MODULE: &str = "slipway";

/// Lock acquisition settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LockConfig {
    /// Maximum wait for a hard or soft lock before giving up.
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// Daemon client and launcher settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct IpcConfig {
    /// Per-request response timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Connection attempts after launching the daemon.
    #[serde(default = "default_spawn_attempts")]
    pub spawn_attempts: u32,
    /// First retry delay after a launch; doubled on each attempt.
    #[serde(default = "default_spawn_backoff_ms")]
    pub spawn_backoff_ms: u64,
    /// Upper bound for the retry delay.
    #[serde(default = "default_spawn_backoff_max_ms")]
    pub spawn_backoff_max_ms: u64,
    /// Minimum gap between two daemon launches.
    #[serde(default = "default_respawn_cooldown_ms")]
    pub respawn_cooldown_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            spawn_attempts: default_spawn_attempts(),
            spawn_backoff_ms: default_spawn_backoff_ms(),
            spawn_backoff_max_ms: default_spawn_backoff_max_ms(),
            respawn_cooldown_ms: default_respawn_cooldown_ms(),
        }
    }
}

/// Reconciliation timer settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReconcileConfig {
    /// Delay before the first tick.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Fixed interval between ticks.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            interval_ms: default_interval_ms(),
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_spawn_attempts() -> u32 {
    5
}

fn default_spawn_backoff_ms() -> u64 {
    100
}

fn default_spawn_backoff_max_ms() -> u64 {
    2_000
}

fn default_respawn_cooldown_ms() -> u64 {
    30_000
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".webpier")
}

fn default_module_config() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/Applications/WebPier.app/Contents/Resources/webpier.conf")
    } else {
        PathBuf::from("/etc/webpier/webpier.conf")
    }
}

/// Bridge settings parsed from `settings.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Settings {
    /// Root directory shared with the daemon and other editor processes.
    #[serde(default = "default_home")]
    pub home: PathBuf,
    /// File with `name=path` lines locating the webpier executables.
    #[serde(default = "default_module_config")]
    pub module_config: PathBuf,
    /// Explicit daemon executable; bypasses the module configuration.
    #[serde(default)]
    pub daemon_program: Option<PathBuf>,
    /// Lock acquisition settings.
    #[serde(default)]
    pub lock: LockConfig,
    /// Daemon client settings.
    #[serde(default)]
    pub ipc: IpcConfig,
    /// Reconciliation timer settings.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            home: default_home(),
            module_config: default_module_config(),
            daemon_program: None,
            lock: LockConfig::default(),
            ipc: IpcConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl Settings {
    /// Load and validate settings from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read settings: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse settings from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let settings: Self = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Settings rooted at `home` with every other field defaulted.
    #[must_use]
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            ..Self::default()
        }
    }

    /// Bounded wait for lock acquisition.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock.timeout_ms)
    }

    /// Per-request daemon response timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.ipc.request_timeout_ms)
    }

    /// Resolve the daemon executable path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no override is set and the module
    /// configuration does not name the daemon.
    pub fn daemon_program(&self) -> Result<PathBuf> {
        match self.daemon_program {
            Some(ref program) => Ok(program.clone()),
            None => locate_module(&self.module_config, DAEMON_MODULE),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.lock.timeout_ms == 0 {
            return Err(AppError::Config("lock.timeout_ms must be greater than zero".into()));
        }
        if self.ipc.request_timeout_ms == 0 {
            return Err(AppError::Config(
                "ipc.request_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.ipc.spawn_attempts == 0 {
            return Err(AppError::Config(
                "ipc.spawn_attempts must be at least one".into(),
            ));
        }
        if self.reconcile.interval_ms == 0 {
            return Err(AppError::Config(
                "reconcile.interval_ms must be greater than zero".into(),
            ));
        }
        if self.home.as_os_str().is_empty() {
            return Err(AppError::Config("home must not be empty".into()));
        }
        Ok(())
    }
}

/// Find the executable registered as `name` in a module configuration file.
///
/// The file holds `name=path` lines; the first matching line wins.
///
/// # Errors
///
/// Returns `AppError::Config` if the file is unreadable or has no entry for `name`.
pub fn locate_module(conf: &Path, name: &str) -> Result<PathBuf> {
    let data = fs::read_to_string(conf).map_err(|err| {
        AppError::Config(format!(
            "failed to read module config {}: {err}",
            conf.display()
        ))
    })?;

    let prefix = format!("{name}=");
    data.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .map(|path| {
            debug!(module = name, path, "module located");
            PathBuf::from(path.trim())
        })
        .ok_or_else(|| AppError::Config(format!("could not find path to module: {name}")))
}
