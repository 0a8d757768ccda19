//! Per-root operation state
//!
//! A [`Session`] is the explicit context object for one tracked root. It holds
//! the in-flight flag shared by capture and restore and the cooldown clock.
//! Engines receive the session on every call and start work by taking an
//! [`OperationGuard`]; dropping the guard returns the root to idle.
//!
//! ```text
//! Idle ──begin(Capture)──▶ Capturing ──drop──▶ Idle
//! Idle ──begin(Restore)──▶ Restoring ──drop──▶ Idle
//! ```
//!
//! Attempts while busy or inside the cooldown window are rejected immediately
//! (never queued) and leave the state unchanged. The flag is in-memory only;
//! it does not protect against a second process.

use crate::error::{Result, RewindError};
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Tree-mutating operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Capturing a snapshot
    Capture,
    /// Restoring a snapshot
    Restore,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Capture => f.write_str("capture"),
            OperationKind::Restore => f.write_str("restore"),
        }
    }
}

/// State of a tracked root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No operation running
    Idle,
    /// A capture holds the root
    Capturing,
    /// A restore holds the root
    Restoring,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    last_finished: Option<Instant>,
}

/// Operation context for one tracked root
#[derive(Debug)]
pub struct Session {
    root: PathBuf,
    cooldown: Duration,
    inner: Mutex<SessionInner>,
}

impl Session {
    /// Create an idle session for `root`
    pub fn new(root: impl Into<PathBuf>, cooldown: Duration) -> Self {
        Self {
            root: root.into(),
            cooldown,
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                last_finished: None,
            }),
        }
    }

    /// Tracked root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Minimum gap between operations
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Whether an operation is running
    pub fn is_busy(&self) -> bool {
        self.state() != SessionState::Idle
    }

    /// Claim the root for an operation
    ///
    /// # Errors
    ///
    /// - [`RewindError::AlreadyInProgress`] if another operation holds the root
    /// - [`RewindError::Cooldown`] if the previous operation ended too recently
    pub fn begin(&self, kind: OperationKind) -> Result<OperationGuard<'_>> {
        let mut inner = self.inner.lock();

        let running = match inner.state {
            SessionState::Idle => None,
            SessionState::Capturing => Some(OperationKind::Capture),
            SessionState::Restoring => Some(OperationKind::Restore),
        };
        if let Some(running) = running {
            debug!("Rejected {} on {:?}: {} in progress", kind, self.root, running);
            return Err(RewindError::AlreadyInProgress {
                root: self.root.clone(),
                operation: running.to_string(),
            });
        }

        if let Some(finished) = inner.last_finished {
            let elapsed = finished.elapsed();
            if elapsed < self.cooldown {
                let remaining = self.cooldown - elapsed;
                return Err(RewindError::Cooldown {
                    remaining_ms: remaining.as_millis().max(1) as u64,
                });
            }
        }

        inner.state = match kind {
            OperationKind::Capture => SessionState::Capturing,
            OperationKind::Restore => SessionState::Restoring,
        };
        debug!("Started {} on {:?}", kind, self.root);
        Ok(OperationGuard { session: self, kind })
    }
}

/// Holds a root for the lifetime of one operation
#[derive(Debug)]
pub struct OperationGuard<'a> {
    session: &'a Session,
    kind: OperationKind,
}

impl OperationGuard<'_> {
    /// The operation holding the root
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.session.inner.lock();
        inner.state = SessionState::Idle;
        inner.last_finished = Some(Instant::now());
        debug!("Finished {} on {:?}", self.kind, self.session.root);
    }
}
