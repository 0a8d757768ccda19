//! Configuration surface
//!
//! [`RewindConfig`] carries every knob the engines read. It is plain data: the
//! caller (UI layer, CLI, tests) decides where it comes from. A JSON loader is
//! provided for the common case of a config file next to the storage root.
//!
//! ```json
//! {
//!   "excludePatterns": ["node_modules", "*.log"],
//!   "maxRetryAttempts": 3,
//!   "useBatchRestore": false,
//!   "maxSnapshots": 20
//! }
//! ```
//!
//! Fields missing from the file take their defaults.

use crate::error::{Result, RewindError};
use crate::transfer::DEFAULT_MAX_ATTEMPTS;
use crate::walker::DEFAULT_MAX_DEPTH;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default storage directory name inside the tracked root
pub const DEFAULT_STORAGE_DIR: &str = ".rewind";

/// Configuration for a tracked root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RewindConfig {
    /// Exclusion patterns applied to captures (and to degraded restores)
    pub exclude_patterns: Vec<String>,
    /// Total attempts per file copy or delete
    pub max_retry_attempts: u32,
    /// Always restore in batches
    pub use_batch_restore: bool,
    /// Retention cap, oldest evicted first (0 = unlimited)
    pub max_snapshots: usize,
    /// Minimum gap between consecutive operations, in milliseconds
    pub cooldown_ms: u64,
    /// Recursion limit for tree walks
    pub max_depth: usize,
    /// Worker threads for file transfers within a phase
    pub parallel_workers: usize,
    /// Pause between restore batches, in milliseconds
    pub batch_pause_ms: u64,
}

impl Default for RewindConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: Vec::new(),
            max_retry_attempts: DEFAULT_MAX_ATTEMPTS,
            use_batch_restore: false,
            max_snapshots: 0,
            cooldown_ms: 1000,
            max_depth: DEFAULT_MAX_DEPTH,
            parallel_workers: num_cpus::get(),
            batch_pause_ms: 50,
        }
    }
}

impl RewindConfig {
    /// Load a JSON config file
    ///
    /// # Errors
    ///
    /// - [`RewindError::Io`] if the file cannot be read
    /// - [`RewindError::Json`] if it is not valid JSON
    /// - [`RewindError::InvalidConfiguration`] if a value is out of range
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: RewindConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engines cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_retry_attempts == 0 {
            return Err(RewindError::InvalidConfiguration(
                "maxRetryAttempts must be at least 1".to_string(),
            ));
        }
        if self.max_depth == 0 {
            return Err(RewindError::InvalidConfiguration(
                "maxDepth must be at least 1".to_string(),
            ));
        }
        if self.parallel_workers == 0 {
            return Err(RewindError::InvalidConfiguration(
                "parallelWorkers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Cooldown as a duration
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    /// Batch pause as a duration
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}
