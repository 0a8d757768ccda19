//! Retried file copy and removal
//!
//! Both engines move bytes exclusively through [`FileTransfer`]. Every call is
//! retried under a [`RetryPolicy`] (exponential backoff, 100ms base, doubling,
//! capped at 2s) and *never* returns an error: the caller receives a
//! [`TransferOutcome`] and decides what a failure means. Capture and restore
//! tally failures and carry on with the remaining files.
//!
//! Three operations are provided:
//!
//! - [`FileTransfer::copy`] - plain copy, creating the destination's parent
//! - [`FileTransfer::copy_replacing`] - removes an existing destination first,
//!   streams the bytes, then checks the destination exists (used by restore)
//! - [`FileTransfer::remove`] - deletes a file or a whole directory; a path that
//!   is already gone counts as removed

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default total attempts per file
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Delay after the first failed attempt
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
/// Upper bound for any single delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(2000);

/// Bounded retry schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1)
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Cap applied after doubling
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Policy with the default backoff and `max_attempts` total attempts
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Override the base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Override the delay cap
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

/// Result of one retried transfer
#[derive(Debug)]
pub struct TransferOutcome {
    /// Attempts made (1..=max_attempts; 0 when refused before trying)
    pub attempts: u32,
    /// Bytes written on success
    pub bytes: u64,
    /// Last error when every attempt failed
    pub error: Option<io::Error>,
}

impl TransferOutcome {
    /// Whether the transfer eventually succeeded
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Copies and removes files under a retry policy
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransfer {
    policy: RetryPolicy,
}

impl FileTransfer {
    /// Create a transfer helper
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The active policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Copy `src` to `dst`, creating `dst`'s parent directory
    pub fn copy(&self, src: &Path, dst: &Path) -> TransferOutcome {
        self.retry("copy", dst, || {
            ensure_parent(dst)?;
            fs::copy(src, dst)
        })
    }

    /// Replace `dst` with the content of `src`
    ///
    /// An existing destination file is deleted before writing so no partially
    /// overwritten file is left behind on platforms that hold file locks. The
    /// destination is checked to exist before success is reported.
    ///
    /// A directory standing at `dst` is never removed: it fails the transfer
    /// without retrying.
    pub fn copy_replacing(&self, src: &Path, dst: &Path) -> TransferOutcome {
        if fs::symlink_metadata(dst).is_ok_and(|meta| meta.is_dir()) {
            warn!("Directory {:?} is in the way of a restored file, leaving it", dst);
            return TransferOutcome {
                attempts: 0,
                bytes: 0,
                error: Some(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{:?} is a directory", dst),
                )),
            };
        }

        self.retry("restore", dst, || {
            ensure_parent(dst)?;
            remove_file_if_present(dst)?;

            let mut reader = BufReader::new(File::open(src)?);
            let mut writer = BufWriter::new(File::create(dst)?);
            let bytes = io::copy(&mut reader, &mut writer)?;
            writer.flush()?;
            drop(writer);

            if !dst.exists() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{:?} missing after copy", dst),
                ));
            }
            Ok(bytes)
        })
    }

    /// Remove a file or directory tree; a missing path counts as removed
    pub fn remove(&self, path: &Path) -> TransferOutcome {
        self.retry("remove", path, || remove_path(path).map(|_| 0))
    }

    fn retry<F>(&self, operation: &str, target: &Path, mut attempt_fn: F) -> TransferOutcome
    where
        F: FnMut() -> io::Result<u64>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match attempt_fn() {
                Ok(bytes) => {
                    trace!("{} {:?} succeeded on attempt {}", operation, target, attempt);
                    return TransferOutcome {
                        attempts: attempt,
                        bytes,
                        error: None,
                    };
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(
                        "{} {:?} failed after {} attempts: {}",
                        operation, target, attempt, e
                    );
                    return TransferOutcome {
                        attempts: attempt,
                        bytes: 0,
                        error: Some(e),
                    };
                }
                Err(e) => {
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        "{} {:?} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation, target, attempt, max_attempts, delay, e
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
            }
        }
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Delete the file or symlink at `path`; directories are an error
fn remove_file_if_present(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{:?} is a directory", path),
        )),
        Ok(_) => match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Delete whatever is at `path`; `Ok(false)` if nothing was there
fn remove_path(path: &Path) -> io::Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
