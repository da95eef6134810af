//! Root configuration persisted as `<home>/webpier.json`.
//!
//! Field names follow the on-disk format shared with the daemon.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::AppError;

/// Daemon log verbosity, stored as an integer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(try_from = "u8", into = "u8")]
pub enum LogLevel {
    /// Logging disabled.
    None,
    /// Fatal errors only.
    Fatal,
    /// Errors.
    Error,
    /// Warnings and above.
    Warning,
    /// Informational messages and above.
    Info,
    /// Debug output and above.
    #[default]
    Debug,
    /// Everything.
    Trace,
}

impl From<LogLevel> for u8 {
    fn from(level: LogLevel) -> Self {
        level as u8
    }
}

impl TryFrom<u8> for LogLevel {
    type Error = AppError;

    fn try_from(value: u8) -> Result<Self, AppError> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Fatal),
            2 => Ok(Self::Error),
            3 => Ok(Self::Warning),
            4 => Ok(Self::Info),
            5 => Ok(Self::Debug),
            6 => Ok(Self::Trace),
            other => Err(AppError::Config(format!("invalid log level: {other}"))),
        }
    }
}

/// Daemon journal location and verbosity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Journal {
    /// Folder the daemon writes its logs into.
    pub folder: PathBuf,
    /// Daemon log verbosity.
    pub level: LogLevel,
}

/// NAT traversal settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Nat {
    /// STUN server used to discover the public mapping.
    pub stun: String,
    /// Maximum punching hops.
    pub hops: u32,
}

impl Default for Nat {
    fn default() -> Self {
        Self {
            stun: "stun.ekiga.net".into(),
            hops: 7,
        }
    }
}

/// DHT rendezvous settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dht {
    /// Bootstrap node host.
    pub bootstrap: String,
    /// Local DHT port; 0 lets the daemon choose.
    pub port: u16,
}

impl Default for Dht {
    fn default() -> Self {
        Self {
            bootstrap: "bootstrap.jami.net".into(),
            port: 0,
        }
    }
}

/// Email rendezvous settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Email {
    /// SMTP server endpoint.
    pub smtp: String,
    /// IMAP server endpoint.
    pub imap: String,
    /// Mailbox login.
    pub login: String,
    /// Mailbox password.
    pub password: String,
    /// Client certificate for signing rendezvous mail.
    pub cert: String,
    /// Client private key.
    pub key: String,
    /// Certificate authority bundle.
    pub ca: String,
}

/// The active configuration of one context store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Local pier id, `owner/host`.
    pub pier: String,
    /// Pier repository directory, derived from the pier id.
    pub repo: PathBuf,
    /// Daemon journal settings.
    pub log: Journal,
    /// NAT traversal settings.
    pub nat: Nat,
    /// DHT rendezvous settings.
    pub dht: Dht,
    /// Email rendezvous settings.
    pub email: Email,
}

impl Config {
    /// Directory holding the files of `pier` inside this configuration's repository.
    #[must_use]
    pub fn pier_dir(&self, pier: &str) -> PathBuf {
        self.repo.join(pier)
    }

    /// Point an unset journal folder at `<home>/journal`.
    pub(crate) fn ensure_journal(&mut self, home: &Path) {
        if self.log.folder.as_os_str().is_empty() {
            self.log.folder = home.join("journal");
        }
    }
}
