//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

/// Shared result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every failure mode of the context store,
/// the daemon client, and the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Another process changed the shared context since it was last read.
    StaleContext,
    /// The context lock could not be acquired within the configured wait.
    LockTimeout(String),
    /// The pier id has no registry entry.
    UnknownPier(String),
    /// The (pier, service) pair has no registry entry.
    UnknownService(String),
    /// The operation may not target this pier (local pier or existing remote).
    WrongPier(String),
    /// The pier id is not of the form `owner/host`.
    InvalidPier(String),
    /// Local socket connect, write, or read failure; also daemon launch failure.
    Transport(String),
    /// Malformed or mismatched daemon response.
    Protocol(String),
    /// The daemon answered with an explicit error message.
    Daemon(String),
    /// Settings or module configuration failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether the caller may retry after reloading the context or relaunching
    /// the daemon.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleContext | Self::Transport(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StaleContext => write!(f, "stale webpier context"),
            Self::LockTimeout(msg) => write!(f, "lock timeout: {msg}"),
            Self::UnknownPier(pier) => write!(f, "unknown pier: {pier}"),
            Self::UnknownService(msg) => write!(f, "unknown service: {msg}"),
            Self::WrongPier(pier) => write!(f, "wrong pier: {pier}"),
            Self::InvalidPier(pier) => write!(f, "invalid pier id: {pier}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Daemon(msg) => write!(f, "daemon: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("invalid json: {err}"))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid settings: {err}"))
    }
}
