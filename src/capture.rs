//! Snapshot capture
//!
//! [`CaptureEngine`] copies every non-excluded regular file under the tracked
//! root into a fresh content directory, writes the manifest that pins the
//! exclusion patterns, and only then appends the record to the index. A crash
//! before the final step leaves an orphaned directory and never a dangling
//! index entry.
//!
//! ## Phases
//!
//! `Scanning` → `Copying` → `WritingManifest` → `Finished`
//!
//! Individual copy failures are retried, then tallied: a capture with failed
//! files still produces a usable snapshot. Only structural problems (busy root,
//! unreadable root, storage unwritable) fail the call.

use crate::error::{Result, RewindError};
use crate::filter::PathFilter;
use crate::progress::{map_items, phase_started, PhaseTracker};
use crate::session::{OperationKind, Session};
use crate::store::{SnapshotStore, MANIFEST_FILE};
use crate::transfer::FileTransfer;
use crate::types::{CaptureOptions, CaptureResult, Manifest, Phase, SnapshotRecord};
use crate::utils::{make_relative, sanitize_label, slash_path};
use crate::walker::{TreeWalker, WalkStats, DEFAULT_MAX_DEPTH};
use chrono::{DateTime, Utc};
use rayon::ThreadPool;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Id prefix used when a label has no filesystem-safe characters
const FALLBACK_ID_PREFIX: &str = "snapshot";

/// Creates snapshots of a tracked root
pub struct CaptureEngine<'a> {
    store: &'a SnapshotStore,
    transfer: FileTransfer,
    max_depth: usize,
    pool: Option<&'a ThreadPool>,
}

impl<'a> CaptureEngine<'a> {
    /// Engine writing into `store`, sequential, default retry policy
    pub fn new(store: &'a SnapshotStore) -> Self {
        Self {
            store,
            transfer: FileTransfer::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            pool: None,
        }
    }

    /// Use a specific transfer helper
    pub fn with_transfer(mut self, transfer: FileTransfer) -> Self {
        self.transfer = transfer;
        self
    }

    /// Set the walk depth limit
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Copy files on `pool`
    pub fn with_pool(mut self, pool: &'a ThreadPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Capture the session's root under `label`
    ///
    /// # Errors
    ///
    /// - [`RewindError::InvalidLabel`] if the label is blank
    /// - [`RewindError::AlreadyInProgress`] / [`RewindError::Cooldown`] from the session
    /// - [`RewindError::Io`] if the root cannot be enumerated
    /// - [`RewindError::StorageUnavailable`] if the content directory or index
    ///   cannot be written
    #[instrument(skip(self, session, patterns, options), fields(root = ?session.root()))]
    pub fn capture<S: AsRef<str>>(
        &self,
        session: &Session,
        label: &str,
        patterns: &[S],
        options: &CaptureOptions,
    ) -> Result<CaptureResult> {
        let started = Instant::now();
        let label = label.trim();
        if label.is_empty() {
            return Err(RewindError::InvalidLabel("label cannot be empty".to_string()));
        }

        let _guard = session.begin(OperationKind::Capture)?;
        let root = session.root();
        let callback = options.progress_callback.as_ref();
        info!("Capturing {:?} as '{}'", root, label);

        phase_started(callback, Phase::Scanning, None);
        let filter = PathFilter::new(patterns)
            .exclude_path(Path::new(MANIFEST_FILE))
            .exclude_storage(root, self.store.root());
        let listing = TreeWalker::new(filter)
            .with_max_depth(self.max_depth)
            .walk(root)?;
        let mut warnings = walk_warnings(&listing.stats);
        warnings.extend(reserved_name_warning(root));

        let created_at = Utc::now();
        let id = self.next_id(label, created_at);
        let record = SnapshotRecord::new(
            id.clone(),
            label,
            options.description.clone(),
            options.tags.iter().cloned(),
            created_at,
        )
        .with_source_root(root);
        let content_dir = self.store.prepare_entry(&id)?;

        let tracker = PhaseTracker::start(callback, Phase::Copying, listing.files.len());
        let outcomes = map_items(self.pool, &listing.files, |source| {
            let result = match make_relative(source, root) {
                Ok(relative) => {
                    let outcome = self.transfer.copy(source, &content_dir.join(&relative));
                    match outcome.error {
                        None => Ok(outcome.bytes),
                        Some(e) => Err(format!("Failed to capture {}: {}", slash_path(&relative), e)),
                    }
                }
                Err(e) => Err(format!("Failed to capture {:?}: {}", source, e)),
            };
            tracker.record(source, result.is_ok());
            result
        });

        let mut files_captured = 0;
        let mut files_failed = 0;
        let mut bytes_copied = 0;
        for outcome in outcomes {
            match outcome {
                Ok(bytes) => {
                    files_captured += 1;
                    bytes_copied += bytes;
                }
                Err(warning) => {
                    files_failed += 1;
                    warnings.push(warning);
                }
            }
        }

        phase_started(callback, Phase::WritingManifest, None);
        let manifest = Manifest {
            record: record.clone(),
            exclude_patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
            files_captured: Some(files_captured),
            files_failed: Some(files_failed),
            total_bytes: Some(bytes_copied),
        };
        if let Err(e) = self.store.write_manifest(&manifest) {
            warn!("Could not write manifest for {}: {}", id, e);
            warnings.push(format!(
                "Manifest not written ({}); restores will use the exclusion patterns current at restore time",
                e
            ));
        }

        if let Err(e) = self.store.commit_entry(record.clone()) {
            let cleanup = self.transfer.remove(&content_dir);
            if let Some(cleanup_error) = cleanup.error {
                warn!("Could not remove uncommitted content {:?}: {}", content_dir, cleanup_error);
            }
            return Err(e);
        }
        phase_started(callback, Phase::Finished, None);

        let result = CaptureResult {
            record,
            files_captured,
            files_failed,
            bytes_copied,
            duration_ms: started.elapsed().as_millis() as u64,
            warnings,
        };
        info!("{}", result.summary());
        Ok(result)
    }

    /// `<label-token>-<timestamp>`, suffixed until unused
    fn next_id(&self, label: &str, created_at: DateTime<Utc>) -> String {
        let token = sanitize_label(label);
        let token = if token.is_empty() {
            FALLBACK_ID_PREFIX
        } else {
            token.as_str()
        };
        let base = format!("{}-{}", token, created_at.format("%Y%m%dT%H%M%S%3f"));

        if !self.store.contains(&base) {
            return base;
        }
        let mut counter = 2;
        loop {
            let candidate = format!("{}-{}", base, counter);
            if !self.store.contains(&candidate) {
                debug!("Id {} taken, using {}", base, candidate);
                return candidate;
            }
            counter += 1;
        }
    }
}

/// Warning for a user file at the root named like a snapshot manifest
///
/// Such a file is left out of captures and never deleted by restores.
pub(crate) fn reserved_name_warning(root: &Path) -> Option<String> {
    let path = root.join(MANIFEST_FILE);
    if fs::symlink_metadata(&path).is_err() {
        return None;
    }
    warn!("Skipping {:?}: the name is reserved for snapshot manifests", path);
    Some(format!(
        "{} at the root was skipped and left untouched (reserved name)",
        MANIFEST_FILE
    ))
}

/// Turn walk skips into user-facing warnings
pub(crate) fn walk_warnings(stats: &WalkStats) -> Vec<String> {
    let mut warnings = Vec::new();
    if stats.unreadable_dirs > 0 {
        warnings.push(format!(
            "{} unreadable entries were skipped",
            stats.unreadable_dirs
        ));
    }
    if stats.depth_limited > 0 {
        warnings.push(format!(
            "{} directories were not descended because of the depth limit",
            stats.depth_limited
        ));
    }
    warnings
}
