//! File mutex with optimistic-concurrency staleness detection.
//!
//! The sentinel file's OS lock provides mutual exclusion between writers in
//! different processes. On top of it, each [`Locker`] remembers the
//! sentinel's modification time as of its own last read or write. A hard
//! lock succeeds only if nobody has touched the sentinel since then, which
//! gives "you may write only if nothing else wrote since you last looked"
//! without any reader holding a lock between operations.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::{AppError, Result};

const FIRST_RETRY_DELAY: Duration = Duration::from_millis(5);
const MAX_RETRY_DELAY: Duration = Duration::from_millis(100);
const STAMP_STEP: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
enum Mode {
    Shared,
    Exclusive,
}

/// Advisory lock on a sentinel file plus the last observed modification stamp.
#[derive(Debug)]
pub struct Locker {
    file: File,
    path: PathBuf,
    stamp: Option<SystemTime>,
    held: bool,
    timeout: Duration,
}

/// Releases the owning [`Locker`] when dropped.
#[derive(Debug)]
pub struct LockGuard<'a> {
    locker: &'a mut Locker,
}

impl LockGuard<'_> {
    /// Release the lock now rather than at the end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.locker.release();
    }
}

impl Locker {
    /// Open (creating if needed) the sentinel at `path`.
    ///
    /// Lock acquisition waits at most `timeout` before failing with
    /// `AppError::LockTimeout`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the sentinel or its directory cannot be created.
    pub fn open(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                AppError::Io(format!("failed to open lock {}: {err}", path.display()))
            })?;

        Ok(Self {
            file,
            path,
            stamp: None,
            held: false,
            timeout,
        })
    }

    /// Sentinel file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last modification stamp this instance observed or wrote.
    #[must_use]
    pub fn stamp(&self) -> Option<SystemTime> {
        self.stamp
    }

    /// Whether this instance currently holds the OS lock.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Take the exclusive lock for a write.
    ///
    /// Fails with `AppError::StaleContext`, lock released, when the sentinel
    /// changed since this instance last looked. Otherwise advances the
    /// stamp to now and keeps the lock until the guard is dropped.
    ///
    /// # Errors
    ///
    /// `StaleContext`, `LockTimeout`, or `Io`.
    pub fn hard_lock(&mut self) -> Result<LockGuard<'_>> {
        self.acquire(Mode::Exclusive)?;
        if let Err(err) = self.check_stamp().and_then(|()| self.advance_stamp()) {
            self.release();
            return Err(err);
        }
        Ok(LockGuard { locker: self })
    }

    /// Take the shared lock for a read and record the current stamp.
    ///
    /// # Errors
    ///
    /// `LockTimeout` or `Io`.
    pub fn soft_lock(&mut self) -> Result<LockGuard<'_>> {
        self.acquire(Mode::Shared)?;
        match self.modified() {
            Ok(current) => {
                self.stamp = Some(current);
                Ok(LockGuard { locker: self })
            }
            Err(err) => {
                self.release();
                Err(err)
            }
        }
    }

    /// Compare the stamp under the exclusive lock without advancing it.
    ///
    /// A successful check leaves the sentinel untouched, so processes
    /// that only poll do not invalidate each other.
    ///
    /// # Errors
    ///
    /// `StaleContext`, `LockTimeout`, or `Io`.
    pub fn verify(&mut self) -> Result<()> {
        self.acquire(Mode::Exclusive)?;
        let outcome = self.check_stamp();
        self.release();
        outcome
    }

    /// Adopt the sentinel's current stamp as observed.
    ///
    /// # Errors
    ///
    /// `LockTimeout` or `Io`.
    pub fn observe(&mut self) -> Result<()> {
        self.soft_lock().map(LockGuard::release)
    }

    /// Release the OS lock. Safe to call when not held.
    pub fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), %err, "failed to unlock context sentinel");
        }
    }

    fn acquire(&mut self, mode: Mode) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut delay = FIRST_RETRY_DELAY;

        loop {
            let attempt = match mode {
                Mode::Shared => FileExt::try_lock_shared(&self.file),
                Mode::Exclusive => FileExt::try_lock_exclusive(&self.file),
            };

            match attempt {
                Ok(()) => {
                    self.held = true;
                    return Ok(());
                }
                Err(err) if err.kind() == fs2::lock_contended_error().kind() => {}
                Err(err) => {
                    return Err(AppError::Io(format!(
                        "failed to lock {}: {err}",
                        self.path.display()
                    )));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AppError::LockTimeout(format!(
                    "{} ({mode:?}) not acquired within {} ms",
                    self.path.display(),
                    self.timeout.as_millis()
                )));
            }
            std::thread::sleep(delay.min(deadline - now));
            delay = (delay * 2).min(MAX_RETRY_DELAY);
        }
    }

    fn check_stamp(&self) -> Result<()> {
        let current = self.modified()?;
        if self.stamp == Some(current) {
            Ok(())
        } else {
            debug!(path = %self.path.display(), "context sentinel changed since last observation");
            Err(AppError::StaleContext)
        }
    }

    fn advance_stamp(&mut self) -> Result<()> {
        let mut next = SystemTime::now();
        if let Some(previous) = self.stamp {
            if next <= previous {
                next = previous + STAMP_STEP;
            }
        }
        self.file.set_modified(next).map_err(|err| {
            AppError::Io(format!("failed to stamp {}: {err}", self.path.display()))
        })?;
        self.stamp = Some(self.modified()?);
        Ok(())
    }

    fn modified(&self) -> Result<SystemTime> {
        self.file
            .metadata()
            .and_then(|meta| meta.modified())
            .map_err(|err| AppError::Io(format!("failed to stat {}: {err}", self.path.display())))
    }
}

impl Drop for Locker {
    fn drop(&mut self) {
        self.release();
    }
}
