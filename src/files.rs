//! Atomic JSON file helpers.
//!
//! Every JSON document the bridge persists is written to a temporary file
//! in the target directory and then renamed over the destination, so a
//! concurrent reader sees either the old or the new document, never a
//! partial one.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// Creates parent directories as needed.
///
/// # Errors
///
/// Returns `AppError::Io` on directory creation, temp file write, or rename
/// failure.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| {
        AppError::Io(format!(
            "failed to create parent directories for {}: {err}",
            path.display()
        ))
    })?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Io(format!("failed to create temporary file: {err}")))?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|err| AppError::Io(format!("failed to write temporary file: {err}")))?;

    tmp.persist(path).map_err(|err| {
        AppError::Io(format!("failed to persist file to {}: {err}", path.display()))
    })?;
    Ok(())
}

/// Read `path` and deserialize it against the schema of `T`.
///
/// # Errors
///
/// Returns `AppError::Io` if the file is unreadable or does not match `T`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::Io(format!("failed to read {}: {err}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|err| AppError::Io(format!("invalid json in {}: {err}", path.display())))
}

/// Write a text file, restricting permissions to the owner on Unix.
///
/// # Errors
///
/// Returns `AppError::Io` if the file cannot be created or written.
pub fn write_private(path: &Path, content: &str) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .map_err(|err| AppError::Io(format!("failed to create {}: {err}", path.display())))?;
    file.write_all(content.as_bytes())
        .map_err(|err| AppError::Io(format!("failed to write {}: {err}", path.display())))
}
