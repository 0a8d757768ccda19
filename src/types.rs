//! Core data types used throughout the Rewind library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Persisted metadata**: [`SnapshotRecord`], [`Manifest`] - what `index.json`
//!   and each `.manifest.json` contain
//! - **Operation parameters**: [`CaptureOptions`], [`RestoreOptions`]
//! - **Operation results**: [`CaptureResult`], [`RestoreResult`], [`RestoreOutcome`]
//! - **Progress reporting**: [`ProgressEvent`], [`ProgressInfo`], [`Phase`]
//! - **Cancellation**: [`CancellationToken`]
//!
//! ## Examples
//!
//! ```rust
//! use rewind::types::{CancellationToken, RestoreOptions};
//!
//! let token = CancellationToken::new();
//! let options = RestoreOptions {
//!     batch_mode: true,
//!     batch_size: Some(25),
//!     cancellation: Some(token.clone()),
//!     ..Default::default()
//! };
//! assert!(!token.is_cancelled());
//! # let _ = options;
//! ```

use crate::error::{Result, RewindError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Metadata for one saved snapshot, as stored in `index.json`
///
/// The `id` doubles as the name of the snapshot's content directory. Only the
/// label is mutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    /// Unique, filesystem-safe identifier
    pub id: String,
    /// User-facing display name
    pub label: String,
    /// Optional free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Creation instant, persisted as epoch milliseconds
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Tags (set semantics)
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Reserved; the engine only produces full snapshots
    #[serde(default)]
    pub is_incremental: bool,
    /// Directory the snapshot was taken from (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root_hint: Option<PathBuf>,
}

impl SnapshotRecord {
    /// Create a full (non-incremental) record
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        description: Option<String>,
        tags: impl IntoIterator<Item = String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description,
            created_at,
            tags: tags.into_iter().collect(),
            is_incremental: false,
            source_root_hint: None,
        }
    }

    /// Attach the source root hint
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root_hint = Some(root.into());
        self
    }

    /// One-line display used by the CLI and logs
    pub fn display_format(&self) -> String {
        let mut line = format!(
            "{} {} ({})",
            self.created_at.format("%Y-%m-%d %H:%M:%S"),
            self.label,
            self.id
        );
        if !self.tags.is_empty() {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            line.push_str(&format!(" [{}]", tags.join(", ")));
        }
        line
    }
}

/// Per-snapshot manifest stored as `<id>/.manifest.json`
///
/// Pins the exclusion patterns used at capture time so a restore never deletes
/// files the capture deliberately skipped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Copy of the snapshot record
    #[serde(flatten)]
    pub record: SnapshotRecord,
    /// Exact exclusion patterns the capture walked with
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Files copied into the content directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_captured: Option<usize>,
    /// Files that failed to copy after retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_failed: Option<usize>,
    /// Bytes copied into the content directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
}

/// Phase of a long-running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Enumerating files
    Scanning,
    /// Deleting stale live files (restore only)
    Deleting,
    /// Copying file content
    Copying,
    /// Writing the manifest (capture only)
    WritingManifest,
    /// Operation finished
    Finished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Scanning => "Scanning",
            Phase::Deleting => "Deleting",
            Phase::Copying => "Copying",
            Phase::WritingManifest => "Writing manifest",
            Phase::Finished => "Finished",
        };
        f.write_str(name)
    }
}

/// Running counts within a phase
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Phase being performed
    pub phase: Phase,
    /// Current item being processed
    pub current_item: Option<String>,
    /// Items processed so far (successful or not)
    pub processed: usize,
    /// Items that failed so far
    pub failed: usize,
    /// Total items in the phase (if known)
    pub total: Option<usize>,
}

impl ProgressInfo {
    /// Get progress as a percentage (0-100)
    pub fn percentage(&self) -> Option<f32> {
        match self.total {
            Some(total) if total > 0 => Some((self.processed as f32 / total as f32) * 100.0),
            Some(_) => Some(100.0),
            None => None,
        }
    }
}

/// Events delivered to progress callbacks
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A new phase began
    PhaseStarted {
        /// The phase
        phase: Phase,
        /// Items the phase will process, when known
        total: Option<usize>,
    },
    /// Counts changed within the current phase
    Progress(ProgressInfo),
}

/// Progress callback for long-running operations
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Cooperative cancellation signal for restores
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create an un-cancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Options for capture
#[derive(Clone, Default)]
pub struct CaptureOptions {
    /// Description for the snapshot
    pub description: Option<String>,
    /// Tags to associate with the snapshot
    pub tags: Vec<String>,
    /// Progress callback
    pub progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for CaptureOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureOptions")
            .field("description", &self.description)
            .field("tags", &self.tags)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

/// Options for restore
#[derive(Clone, Default)]
pub struct RestoreOptions {
    /// Force batched copying; large trees are batched regardless
    pub batch_mode: bool,
    /// Fixed batch size; tiered by file count when `None`
    pub batch_size: Option<usize>,
    /// Override the configured retry attempts
    pub max_retry_attempts: Option<u32>,
    /// Cancellation signal checked between batches
    pub cancellation: Option<CancellationToken>,
    /// Progress callback
    pub progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for RestoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestoreOptions")
            .field("batch_mode", &self.batch_mode)
            .field("batch_size", &self.batch_size)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("cancellation", &self.cancellation.is_some())
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

/// Result of a capture
#[derive(Debug, Clone)]
pub struct CaptureResult {
    /// The persisted snapshot record
    pub record: SnapshotRecord,
    /// Files copied into the snapshot
    pub files_captured: usize,
    /// Files that failed after retries
    pub files_failed: usize,
    /// Bytes copied
    pub bytes_copied: u64,
    /// Time taken in milliseconds
    pub duration_ms: u64,
    /// Per-file and structural warnings
    pub warnings: Vec<String>,
}

impl CaptureResult {
    /// Whether some files were not captured
    pub fn is_partial(&self) -> bool {
        self.files_failed > 0
    }

    /// Human-readable one-line summary
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Captured '{}' ({}): {} files, {}",
            self.record.label,
            self.record.id,
            self.files_captured,
            crate::utils::format_bytes(self.bytes_copied)
        );
        if self.is_partial() {
            summary.push_str(&format!(", {} failed", self.files_failed));
        }
        summary
    }

    /// Turn a partial capture into [`RewindError::PartialFailure`]
    pub fn ensure_complete(self) -> Result<Self> {
        if self.is_partial() {
            return Err(RewindError::PartialFailure {
                failed: self.files_failed,
                total: self.files_captured + self.files_failed,
            });
        }
        Ok(self)
    }
}

/// Terminal state of a restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoreOutcome {
    /// Every file was transferred
    Completed,
    /// Finished, but some deletions or copies failed
    Partial,
    /// Stopped at a batch boundary; restored files stay restored
    Cancelled,
}

/// Result of a restore
#[derive(Debug, Clone)]
pub struct RestoreResult {
    /// ID of the snapshot that was restored
    pub snapshot_id: String,
    /// Files copied back into the live tree
    pub files_restored: usize,
    /// Snapshot files that failed to copy
    pub files_failed: usize,
    /// Live files removed during the delete phase
    pub files_removed: usize,
    /// Live files that could not be removed
    pub removal_failures: usize,
    /// Snapshot files never attempted because of cancellation
    pub files_skipped: usize,
    /// Terminal state
    pub outcome: RestoreOutcome,
    /// The manifest was unreadable and caller patterns were used
    pub degraded: bool,
    /// Number of copy batches run (1 when not batching)
    pub batches: usize,
    /// Time taken in milliseconds
    pub duration_ms: u64,
    /// Any warnings during restoration
    pub warnings: Vec<String>,
}

impl RestoreResult {
    /// Human-readable one-line summary
    pub fn summary(&self) -> String {
        let head = match self.outcome {
            RestoreOutcome::Completed => "Restore complete",
            RestoreOutcome::Partial => "Restore finished with failures",
            RestoreOutcome::Cancelled => "Restore cancelled",
        };
        let mut summary = format!(
            "{}: {} restored, {} removed, {} failed",
            head,
            self.files_restored,
            self.files_removed,
            self.files_failed + self.removal_failures
        );
        if self.files_skipped > 0 {
            summary.push_str(&format!(", {} not restored", self.files_skipped));
        }
        if self.degraded {
            summary.push_str(" (manifest unavailable, used current exclusions)");
        }
        summary
    }

    /// Map a partial or cancelled restore to the matching error
    pub fn ensure_complete(self) -> Result<Self> {
        match self.outcome {
            RestoreOutcome::Completed => Ok(self),
            RestoreOutcome::Cancelled => Err(RewindError::Cancelled {
                restored: self.files_restored,
                remaining: self.files_skipped,
            }),
            RestoreOutcome::Partial => Err(RewindError::PartialFailure {
                failed: self.files_failed + self.removal_failures,
                total: self.files_restored + self.files_failed + self.files_removed + self.removal_failures,
            }),
        }
    }
}
