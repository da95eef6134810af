//! Socket address of the daemon serving one context home.
//!
//! The address is derived from the hex form of the home path, so every
//! client of the same home reaches the same daemon instance: a Unix domain
//! socket `/tmp/<hex>.slipway` or a named pipe `\\.\pipe\<hex>.slipway`.

use std::path::Path;

use interprocess::local_socket::Name;

use crate::config::DAEMON_MODULE;
use crate::models::text_hash;
use crate::{AppError, Result};

/// Local socket endpoint of a slipway daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Name as passed to `interprocess`: a filesystem path on Unix, a
    /// namespaced pipe name on Windows.
    socket: String,
}

impl Endpoint {
    /// Endpoint of the daemon serving `home`.
    #[must_use]
    pub fn for_home(home: &Path) -> Self {
        let file = format!("{}.{DAEMON_MODULE}", text_hash(&home.to_string_lossy()));
        Self::from_socket(socket_for(&file))
    }

    /// Endpoint from an explicit socket name.
    #[must_use]
    pub fn from_socket(socket: impl Into<String>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Raw socket name.
    #[must_use]
    pub fn socket(&self) -> &str {
        &self.socket
    }

    /// Convert into an `interprocess` name.
    ///
    /// # Errors
    ///
    /// `AppError::Transport` if the platform rejects the name.
    #[cfg(unix)]
    pub fn to_name(&self) -> Result<Name<'_>> {
        use interprocess::local_socket::{GenericFilePath, ToFsName};

        self.socket
            .as_str()
            .to_fs_name::<GenericFilePath>()
            .map_err(|err| AppError::Transport(format!("invalid socket name '{self}': {err}")))
    }

    /// Convert into an `interprocess` name.
    ///
    /// # Errors
    ///
    /// `AppError::Transport` if the platform rejects the name.
    #[cfg(windows)]
    pub fn to_name(&self) -> Result<Name<'_>> {
        use interprocess::local_socket::{GenericNamespaced, ToNsName};

        self.socket
            .as_str()
            .to_ns_name::<GenericNamespaced>()
            .map_err(|err| AppError::Transport(format!("invalid pipe name '{self}': {err}")))
    }
}

impl std::fmt::Display for Endpoint {
    #[cfg(unix)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.socket)
    }

    #[cfg(windows)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, r"\\.\pipe\{}", self.socket)
    }
}

#[cfg(unix)]
fn socket_for(file: &str) -> String {
    let tmp = Path::new("/tmp");
    let dir = if tmp.is_dir() {
        tmp.to_path_buf()
    } else {
        std::env::temp_dir()
    };
    dir.join(file).to_string_lossy().into_owned()
}

#[cfg(windows)]
fn socket_for(file: &str) -> String {
    file.to_owned()
}
