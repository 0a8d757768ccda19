//! Snapshot restore
//!
//! [`RestoreEngine`] makes the live tree match a snapshot's content:
//!
//! 1. **Scanning** - list live files (skipping what the snapshot's manifest
//!    excluded, plus the storage directory) and snapshot files
//! 2. **Deleting** - remove every listed live file, then prune directories
//!    left empty
//! 3. **Copying** - copy every snapshot file back, optionally in batches
//!
//! Deleting everything first (instead of diffing) guarantees that files created
//! after the capture disappear. Files the capture excluded are never listed, so
//! they are never touched.
//!
//! ## Batching and cancellation
//!
//! Large restores copy in batches with a short pause between them. A
//! [`CancellationToken`](crate::types::CancellationToken) is honoured before
//! the operation starts and at batch boundaries only. Cancellation does not
//! roll back: the deletions already happened and the tree is left mixed, as
//! reported by [`RestoreOutcome::Cancelled`].

use crate::capture::{reserved_name_warning, walk_warnings};
use crate::error::{Result, RewindError};
use crate::filter::PathFilter;
use crate::progress::{map_items, phase_started, PhaseTracker};
use crate::session::{OperationKind, Session};
use crate::store::{SnapshotStore, MANIFEST_FILE};
use crate::transfer::{FileTransfer, RetryPolicy};
use crate::types::{Phase, RestoreOptions, RestoreOutcome, RestoreResult};
use crate::utils::{self, make_relative, slash_path};
use crate::walker::{TreeWalker, DEFAULT_MAX_DEPTH};
use rayon::ThreadPool;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace, warn};

/// Restores with more files than this are always batched
pub const AUTO_BATCH_THRESHOLD: usize = 1000;

/// Default pause between batches
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(50);

/// Batch size picked from the number of files to restore
///
/// Bigger restores use smaller batches so cancellation is observed sooner.
pub fn batch_size_for(total: usize) -> usize {
    if total > 10_000 {
        50
    } else if total > 5_000 {
        100
    } else {
        200
    }
}

/// Reverts a tracked root to a snapshot
pub struct RestoreEngine<'a> {
    store: &'a SnapshotStore,
    transfer: FileTransfer,
    max_depth: usize,
    pool: Option<&'a ThreadPool>,
    batch_pause: Duration,
    always_batch: bool,
}

impl<'a> RestoreEngine<'a> {
    /// Engine reading from `store`, sequential, default retry policy
    pub fn new(store: &'a SnapshotStore) -> Self {
        Self {
            store,
            transfer: FileTransfer::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            pool: None,
            batch_pause: DEFAULT_BATCH_PAUSE,
            always_batch: false,
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

    /// Transfer files on `pool`
    pub fn with_pool(mut self, pool: &'a ThreadPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set the pause between batches
    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    /// Batch every restore regardless of options
    pub fn with_always_batch(mut self, always: bool) -> Self {
        self.always_batch = always;
        self
    }

    /// Restore snapshot `id` into the session's root
    ///
    /// `fallback_patterns` are only used when the snapshot's manifest cannot be
    /// read; the result is then flagged as degraded.
    ///
    /// # Errors
    ///
    /// - [`RewindError::AlreadyInProgress`] / [`RewindError::Cooldown`] from the session
    /// - [`RewindError::NotFound`] if the snapshot has no record or no content
    /// - [`RewindError::Io`] if either tree cannot be enumerated
    ///
    /// Per-file failures and cancellation are reported through
    /// [`RestoreResult::outcome`], not as errors.
    #[instrument(skip(self, session, fallback_patterns, options), fields(root = ?session.root()))]
    pub fn restore<S: AsRef<str>>(
        &self,
        session: &Session,
        id: &str,
        fallback_patterns: &[S],
        options: &RestoreOptions,
    ) -> Result<RestoreResult> {
        let started = Instant::now();
        self.store.get(id)?;
        if !self.store.has_content(id) {
            warn!("Snapshot {} is indexed but its content directory is missing", id);
            return Err(RewindError::NotFound(id.to_string()));
        }

        let _guard = session.begin(OperationKind::Restore)?;
        let root = session.root();
        let callback = options.progress_callback.as_ref();
        let content_dir = self.store.content_dir(id);
        info!("Restoring {} into {:?}", id, root);

        let mut warnings = Vec::new();
        let (patterns, degraded) = match self.store.load_manifest(id) {
            Ok(manifest) => (manifest.exclude_patterns, false),
            Err(e) => {
                warn!("Manifest for {} unreadable, using current exclusions: {}", id, e);
                warnings.push(format!(
                    "Manifest unreadable ({}); used the current exclusion patterns",
                    e
                ));
                let patterns = fallback_patterns
                    .iter()
                    .map(|p| p.as_ref().to_string())
                    .collect::<Vec<_>>();
                (patterns, true)
            }
        };

        let transfer = match options.max_retry_attempts {
            Some(attempts) => FileTransfer::new(RetryPolicy {
                max_attempts: attempts.max(1),
                ..*self.transfer.policy()
            }),
            None => self.transfer,
        };

        phase_started(callback, Phase::Scanning, None);
        if !root.exists() {
            fs::create_dir_all(root)?;
        }
        let live_filter = PathFilter::new(patterns.as_slice())
            .exclude_path(Path::new(MANIFEST_FILE))
            .exclude_storage(root, self.store.root());
        let live = TreeWalker::new(live_filter)
            .with_max_depth(self.max_depth)
            .walk(root)?;
        let snapshot = TreeWalker::new(PathFilter::default().exclude_path(Path::new(MANIFEST_FILE)))
            .with_max_depth(self.max_depth)
            .walk(&content_dir)?;
        warnings.extend(walk_warnings(&live.stats));
        warnings.extend(reserved_name_warning(root));
        warnings.extend(walk_warnings(&snapshot.stats));

        let total = snapshot.files.len();
        let mut result = RestoreResult {
            snapshot_id: id.to_string(),
            files_restored: 0,
            files_failed: 0,
            files_removed: 0,
            removal_failures: 0,
            files_skipped: 0,
            outcome: RestoreOutcome::Completed,
            degraded,
            batches: 0,
            duration_ms: 0,
            warnings,
        };

        if is_cancelled(options) {
            info!("Restore of {} cancelled before it started", id);
            result.files_skipped = total;
            result.outcome = RestoreOutcome::Cancelled;
            result.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(result);
        }

        let deleting = PhaseTracker::start(callback, Phase::Deleting, live.files.len());
        let removals = map_items(self.pool, &live.files, |path| {
            let outcome = transfer.remove(path);
            deleting.record(path, outcome.is_success());
            outcome.error.map(|e| {
                let shown = make_relative(path, root).unwrap_or_else(|_| path.clone());
                format!("Failed to remove {}: {}", slash_path(&shown), e)
            })
        });
        for removal in removals {
            match removal {
                None => result.files_removed += 1,
                Some(warning) => {
                    result.removal_failures += 1;
                    result.warnings.push(warning);
                }
            }
        }
        prune_empty_dirs(root, &live.files);

        let batched = options.batch_mode || self.always_batch || total > AUTO_BATCH_THRESHOLD;
        let batch_size = if batched {
            options
                .batch_size
                .filter(|size| *size > 0)
                .unwrap_or_else(|| batch_size_for(total))
        } else {
            total.max(1)
        };
        debug!("Copying {} files (batched: {}, batch size {})", total, batched, batch_size);

        let copying = PhaseTracker::start(callback, Phase::Copying, total);
        let mut attempted = 0;
        for (index, batch) in snapshot.files.chunks(batch_size).enumerate() {
            if index > 0 {
                if !self.batch_pause.is_zero() {
                    thread::sleep(self.batch_pause);
                }
                if is_cancelled(options) {
                    result.files_skipped = total - attempted;
                    result.outcome = RestoreOutcome::Cancelled;
                    info!(
                        "Restore of {} cancelled after {} of {} files",
                        id, attempted, total
                    );
                    break;
                }
            }

            result.batches += 1;
            trace!("Batch {} with {} files", result.batches, batch.len());
            let copies = map_items(self.pool, batch, |source| {
                let copied = match make_relative(source, &content_dir) {
                    Ok(relative) => match transfer.copy_replacing(source, &root.join(&relative)).error {
                        None => Ok(()),
                        Some(e) => Err(format!("Failed to restore {}: {}", slash_path(&relative), e)),
                    },
                    Err(e) => Err(format!("Failed to restore {:?}: {}", source, e)),
                };
                copying.record(source, copied.is_ok());
                copied
            });
            for copied in copies {
                match copied {
                    Ok(()) => result.files_restored += 1,
                    Err(warning) => {
                        result.files_failed += 1;
                        result.warnings.push(warning);
                    }
                }
            }
            attempted += batch.len();
        }

        if result.outcome != RestoreOutcome::Cancelled
            && (result.files_failed > 0 || result.removal_failures > 0)
        {
            result.outcome = RestoreOutcome::Partial;
        }
        phase_started(callback, Phase::Finished, None);

        result.duration_ms = started.elapsed().as_millis() as u64;
        info!("{}", result.summary());
        Ok(result)
    }
}

fn is_cancelled(options: &RestoreOptions) -> bool {
    options
        .cancellation
        .as_ref()
        .is_some_and(|token| token.is_cancelled())
}

/// Remove directories emptied by the delete phase, deepest first
///
/// Only ancestors of deleted files are considered and the root itself is kept.
/// A directory still holding anything (excluded content, undeletable files) is
/// left alone.
fn prune_empty_dirs(root: &Path, deleted: &[PathBuf]) {
    let mut candidates = BTreeSet::new();
    for file in deleted {
        let mut current = file.parent();
        while let Some(dir) = current {
            if dir == root || !dir.starts_with(root) {
                break;
            }
            if !candidates.insert(dir.to_path_buf()) {
                break;
            }
            current = dir.parent();
        }
    }

    let mut ordered: Vec<PathBuf> = candidates.into_iter().collect();
    ordered.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    for dir in ordered {
        if let Err(e) = utils::remove_dir_if_empty(&dir) {
            debug!("Kept directory {:?}: {}", dir, e);
        }
    }
}
