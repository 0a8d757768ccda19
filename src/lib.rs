//! # Rewind - labeled snapshots of a working directory
//!
//! Rewind captures full copies of a directory tree under a user-supplied label
//! and restores the tree to any of them later. It is the engine behind
//! "checkpoint / roll back" features in editors and tooling: a capture is a
//! plain copy of every non-excluded file, a restore makes the live tree match
//! that copy again.
//!
//! ## Overview
//!
//! - Capture a snapshot of a tracked root, skipping excluded paths
//!   (`node_modules`, `*.log`, ...)
//! - Restore it: live files are deleted, snapshot files copied back, and
//!   excluded paths are never touched
//! - List, rename and delete snapshots; optionally cap how many are kept
//! - Per-file failures are retried with backoff and tallied instead of
//!   aborting the operation
//! - Captures and restores on the same root are mutually exclusive and
//!   rate-limited by a cooldown
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rewind::{CaptureOptions, RestoreOptions, Rewind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rewind = Rewind::open("./my_project", "./my_project/.rewind")?;
//!
//! let snapshot = rewind.capture("initial state", CaptureOptions::default())?;
//! println!("Captured {}", snapshot.record.id);
//!
//! // Make some changes to your files...
//!
//! let result = rewind.restore(&snapshot.record.id, RestoreOptions::default())?;
//! println!("Restored {} files", result.files_restored);
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Layout
//!
//! ```text
//! <storage>/
//! ├── index.json                 # every snapshot record, oldest first
//! └── <snapshot-id>/
//!     ├── .manifest.json         # record copy + exclusion patterns used
//!     └── ...                    # mirror of the captured tree
//! ```
//!
//! The storage directory may live inside the tracked root; it is then excluded
//! from every walk automatically.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, RewindError>`. Structural problems (busy
//! root, cooldown, unknown snapshot, unwritable storage) are errors; per-file
//! failures are counted on [`CaptureResult`] and [`RestoreResult`], which can be
//! turned into errors with `ensure_complete()`.
//!
//! ## Module Organization
//!
//! - [`rewind`]: the [`Rewind`] facade and [`RewindBuilder`]
//! - [`capture`] / [`restore`]: the two engines
//! - [`store`]: index and content directories
//! - [`session`]: per-root in-flight flag and cooldown
//! - [`filter`] / [`walker`]: exclusion patterns and tree enumeration
//! - [`transfer`]: retried copy and delete
//! - [`config`], [`types`], [`error`]

// Public API modules
pub mod capture;
pub mod config;
pub mod error;
pub mod filter;
pub mod restore;
pub mod rewind;
pub mod session;
pub mod store;
pub mod transfer;
pub mod types;
pub mod utils;
pub mod walker;

// Internal modules
mod progress;

// Re-export main types for convenience
pub use capture::CaptureEngine;
pub use config::RewindConfig;
pub use error::{Result, RewindError};
pub use filter::PathFilter;
pub use restore::RestoreEngine;
pub use rewind::{Rewind, RewindBuilder};
pub use session::{OperationKind, Session, SessionState};
pub use store::{DeleteOutcome, SnapshotStore};
pub use transfer::{FileTransfer, RetryPolicy};
pub use types::*;
