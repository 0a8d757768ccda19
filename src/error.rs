//! Error types for the Rewind library
//!
//! This module defines every error a capture, restore or store operation can
//! surface. Per-file copy and delete failures are *not* errors: they are
//! retried, tallied and reported through [`CaptureResult`](crate::types::CaptureResult)
//! and [`RestoreResult`](crate::types::RestoreResult). The variants here are the
//! structural failures that abort an operation before anything destructive
//! happens, plus the two "soft" outcomes (`PartialFailure`, `Cancelled`) for
//! callers that want all-or-nothing semantics via `ensure_complete`.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the Rewind library
pub type Result<T> = std::result::Result<T, RewindError>;

/// Main error type for all Rewind operations
#[derive(Debug, Error)]
pub enum RewindError {
    /// Referenced snapshot has no index record or no content directory
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    /// A capture or restore is already running on the tracked root
    #[error("A {operation} is already in progress for {root:?}")]
    AlreadyInProgress {
        /// Tracked root that is busy
        root: PathBuf,
        /// Operation currently holding the root
        operation: String,
    },

    /// Operation requested before the minimum interval elapsed
    #[error("Operation requested too soon, retry in {remaining_ms}ms")]
    Cooldown {
        /// Milliseconds until the root accepts a new operation
        remaining_ms: u64,
    },

    /// Operation completed but some files could not be transferred
    #[error("{failed} of {total} files failed to transfer")]
    PartialFailure {
        /// Files that failed after retry exhaustion
        failed: usize,
        /// Files the operation attempted
        total: usize,
    },

    /// Restore stopped at a batch boundary because cancellation was requested
    #[error("Restore cancelled after {restored} files ({remaining} not restored)")]
    Cancelled {
        /// Files restored before the cancellation was observed
        restored: usize,
        /// Snapshot files never copied back
        remaining: usize,
    },

    /// Index file or storage root cannot be read or written
    #[error("Storage unavailable at {path:?}: {source}")]
    StorageUnavailable {
        /// Path that could not be accessed
        path: PathBuf,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// A snapshot with this id is already in the index
    #[error("Snapshot id already exists: {0}")]
    DuplicateId(String),

    /// Label cannot produce a usable snapshot id
    #[error("Invalid label: {0}")]
    InvalidLabel(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RewindError {
    /// Create a storage-unavailable error for `path`
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RewindError::StorageUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        RewindError::Internal(msg.into())
    }

    /// Check if retrying the same call later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RewindError::AlreadyInProgress { .. }
                | RewindError::Cooldown { .. }
                | RewindError::PartialFailure { .. }
                | RewindError::Cancelled { .. }
        )
    }

    /// Check if the error was raised before the tracked tree was touched
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            RewindError::NotFound(_)
                | RewindError::AlreadyInProgress { .. }
                | RewindError::Cooldown { .. }
                | RewindError::StorageUnavailable { .. }
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            RewindError::NotFound(id) => {
                format!("Snapshot '{}' not found. Use 'list' to see available snapshots.", id)
            }
            RewindError::AlreadyInProgress { operation, .. } => {
                format!("A {} is still running. Wait for it to finish and try again.", operation)
            }
            RewindError::Cooldown { remaining_ms } => {
                format!("Please wait {}ms before starting another operation.", remaining_ms)
            }
            RewindError::PartialFailure { failed, total } => {
                format!(
                    "{} of {} files could not be transferred. Re-running the operation usually fixes this.",
                    failed, total
                )
            }
            RewindError::StorageUnavailable { path, source } => {
                format!(
                    "Snapshot storage at {:?} is not accessible ({}). Check disk space and permissions.",
                    path, source
                )
            }
            _ => self.to_string(),
        }
    }
}
