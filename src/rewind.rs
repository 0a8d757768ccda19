//! Main Rewind entry point
//!
//! [`Rewind`] binds one tracked root to one snapshot store and hands every call
//! the shared [`Session`], so captures and restores on the same root exclude
//! each other and respect the cooldown. It also applies the retention limit
//! after each capture.
//!
//! ## Thread Safety
//!
//! Every method takes `&self`. A `Rewind` can be shared across threads (for
//! example behind an `Arc`); concurrent tree-mutating calls are rejected with
//! [`RewindError::AlreadyInProgress`] rather than queued.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use rewind::{CaptureOptions, RestoreOptions, RewindBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rewind = RewindBuilder::new()
//!     .exclude_patterns(vec!["node_modules".to_string(), "*.log".to_string()])
//!     .max_snapshots(20)
//!     .build("./my_project", "./my_project/.rewind")?;
//!
//! let captured = rewind.capture("before refactor", CaptureOptions::default())?;
//! println!("{}", captured.summary());
//!
//! // ... edit files ...
//!
//! let restored = rewind.restore(&captured.record.id, RestoreOptions::default())?;
//! println!("{}", restored.summary());
//! # Ok(())
//! # }
//! ```

use crate::capture::CaptureEngine;
use crate::config::RewindConfig;
use crate::error::{Result, RewindError};
use crate::restore::RestoreEngine;
use crate::session::Session;
use crate::store::{DeleteOutcome, SnapshotStore};
use crate::transfer::{FileTransfer, RetryPolicy};
use crate::types::{CaptureOptions, CaptureResult, RestoreOptions, RestoreResult, SnapshotRecord};
use rayon::ThreadPool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Snapshot manager for one tracked root
pub struct Rewind {
    config: RewindConfig,
    store: SnapshotStore,
    session: Session,
    transfer: FileTransfer,
    pool: Option<ThreadPool>,
}

impl std::fmt::Debug for Rewind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rewind")
            .field("root", &self.session.root())
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}

impl Rewind {
    /// Open with the default configuration
    ///
    /// The storage root is created if needed; an existing index is loaded.
    ///
    /// # Errors
    ///
    /// - [`RewindError::StorageUnavailable`] if the store cannot be opened
    pub fn open(root: impl Into<PathBuf>, storage: impl Into<PathBuf>) -> Result<Self> {
        RewindBuilder::new().build(root, storage)
    }

    /// Open with an explicit configuration
    ///
    /// # Errors
    ///
    /// - [`RewindError::InvalidConfiguration`] if the configuration is rejected
    /// - [`RewindError::StorageUnavailable`] if the store cannot be opened
    pub fn with_config(
        root: impl Into<PathBuf>,
        storage: impl Into<PathBuf>,
        config: RewindConfig,
    ) -> Result<Self> {
        RewindBuilder::new().config(config).build(root, storage)
    }

    /// Tracked root
    pub fn root(&self) -> &Path {
        self.session.root()
    }

    /// Active configuration
    pub fn config(&self) -> &RewindConfig {
        &self.config
    }

    /// Operation context for the tracked root
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Underlying snapshot store
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Capture the tracked root under `label`
    ///
    /// Uses the configured exclusion patterns. When a retention limit is set,
    /// the oldest snapshots are deleted afterwards; eviction problems are
    /// reported as warnings on the result.
    ///
    /// # Errors
    ///
    /// See [`CaptureEngine::capture`].
    #[instrument(skip(self, options))]
    pub fn capture(&self, label: &str, options: CaptureOptions) -> Result<CaptureResult> {
        let mut engine = CaptureEngine::new(&self.store)
            .with_transfer(self.transfer)
            .with_max_depth(self.config.max_depth);
        if let Some(pool) = &self.pool {
            engine = engine.with_pool(pool);
        }

        let mut result =
            engine.capture(&self.session, label, self.config.exclude_patterns.as_slice(), &options)?;
        result.warnings.extend(self.enforce_retention());
        Ok(result)
    }

    /// Restore snapshot `id` into the tracked root
    ///
    /// # Errors
    ///
    /// See [`RestoreEngine::restore`].
    #[instrument(skip(self, options))]
    pub fn restore(&self, id: &str, options: RestoreOptions) -> Result<RestoreResult> {
        let mut engine = RestoreEngine::new(&self.store)
            .with_transfer(self.transfer)
            .with_max_depth(self.config.max_depth)
            .with_batch_pause(self.config.batch_pause())
            .with_always_batch(self.config.use_batch_restore);
        if let Some(pool) = &self.pool {
            engine = engine.with_pool(pool);
        }

        engine.restore(&self.session, id, self.config.exclude_patterns.as_slice(), &options)
    }

    /// All snapshots, oldest first
    pub fn list(&self) -> Vec<SnapshotRecord> {
        self.store.list()
    }

    /// One snapshot record
    pub fn get(&self, id: &str) -> Result<SnapshotRecord> {
        self.store.get(id)
    }

    /// Delete a snapshot and its content
    pub fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        self.store.delete(id)
    }

    /// Change a snapshot's label
    pub fn rename(&self, id: &str, label: &str) -> Result<SnapshotRecord> {
        self.store.rename(id, label)
    }

    fn enforce_retention(&self) -> Vec<String> {
        let limit = self.config.max_snapshots;
        if limit == 0 {
            return Vec::new();
        }

        match self.store.prune(limit) {
            Ok(evicted) => evicted
                .into_iter()
                .filter_map(|outcome| {
                    info!("Retention removed snapshot {}", outcome.record.id);
                    outcome.warning
                })
                .collect(),
            Err(e) => {
                warn!("Retention pass failed: {}", e);
                vec![format!("Could not apply the retention limit of {}: {}", limit, e)]
            }
        }
    }
}

/// Builder pattern for Rewind configuration
///
/// # Examples
///
/// ```rust,no_run
/// use rewind::RewindBuilder;
/// use std::time::Duration;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let rewind = RewindBuilder::new()
///     .exclude_patterns(vec!["target".to_string()])
///     .max_retry_attempts(5)
///     .cooldown(Duration::from_millis(250))
///     .parallel_workers(4)
///     .build("./project", "./storage")?;
/// # Ok(())
/// # }
/// ```
///
/// # Default Values
///
/// Those of [`RewindConfig::default`], plus the transfer backoff of
/// [`RetryPolicy::default`].
#[derive(Debug, Clone)]
pub struct RewindBuilder {
    config: RewindConfig,
    retry_base_delay: Option<Duration>,
}

impl Default for RewindBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RewindBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config: RewindConfig::default(),
            retry_base_delay: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: RewindConfig) -> Self {
        self.config = config;
        self
    }

    /// Set exclusion patterns
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.exclude_patterns = patterns;
        self
    }

    /// Set total attempts per file transfer
    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.config.max_retry_attempts = attempts;
        self
    }

    /// Batch every restore
    pub fn use_batch_restore(mut self, enabled: bool) -> Self {
        self.config.use_batch_restore = enabled;
        self
    }

    /// Keep at most `max` snapshots (0 = unlimited)
    pub fn max_snapshots(mut self, max: usize) -> Self {
        self.config.max_snapshots = max;
        self
    }

    /// Minimum gap between operations (zero disables it)
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    /// Recursion limit for tree walks
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    /// Worker threads for file transfers
    ///
    /// Values less than 1 are set to 1; 1 means transfers run on the calling
    /// thread.
    pub fn parallel_workers(mut self, count: usize) -> Self {
        self.config.parallel_workers = count.max(1);
        self
    }

    /// Pause between restore batches
    pub fn batch_pause(mut self, pause: Duration) -> Self {
        self.config.batch_pause_ms = pause.as_millis() as u64;
        self
    }

    /// Delay after the first failed transfer attempt
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    /// Build the instance
    ///
    /// # Errors
    ///
    /// - [`RewindError::InvalidConfiguration`] if the configuration is rejected
    ///   or the worker pool cannot start
    /// - [`RewindError::StorageUnavailable`] if the store cannot be opened
    pub fn build(self, root: impl Into<PathBuf>, storage: impl Into<PathBuf>) -> Result<Rewind> {
        let root = root.into();
        self.config.validate()?;

        let mut policy = RetryPolicy::new(self.config.max_retry_attempts);
        if let Some(delay) = self.retry_base_delay {
            policy = policy.with_base_delay(delay);
        }
        let transfer = FileTransfer::new(policy);

        let store = SnapshotStore::open(storage)?.with_transfer(transfer);

        let pool = if self.config.parallel_workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.parallel_workers)
                .thread_name(|i| format!("rewind-worker-{}", i))
                .build()
                .map_err(|e| {
                    RewindError::InvalidConfiguration(format!("cannot start worker pool: {}", e))
                })?;
            Some(pool)
        } else {
            None
        };

        info!(
            "Tracking {:?} with storage {:?} ({} snapshots)",
            root,
            store.root(),
            store.len()
        );

        Ok(Rewind {
            session: Session::new(root, self.config.cooldown()),
            config: self.config,
            store,
            transfer,
            pool,
        })
    }
}
