//! Directory tree enumeration
//!
//! [`TreeWalker`] lists every regular file under a root, pruning excluded
//! directories *before* descending into them so `node_modules`-sized subtrees
//! are never stat'd file by file.
//!
//! ## Failure handling
//!
//! The walk never fails as a whole once the root itself is readable:
//!
//! - a directory that cannot be read is skipped with a warning
//! - a branch deeper than the configured limit is not descended, with a warning
//! - symbolic links are neither followed nor yielded
//!
//! ```rust,ignore
//! let walker = TreeWalker::new(PathFilter::new(&["node_modules"]));
//! let listing = walker.walk(Path::new("./project"))?;
//! println!("{} files, {} dirs skipped", listing.files.len(), listing.stats.unreadable_dirs);
//! ```

use crate::error::{Result, RewindError};
use crate::filter::PathFilter;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Default recursion limit
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Counters describing what a walk skipped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkStats {
    /// Directories pruned by the filter
    pub excluded_dirs: usize,
    /// Files dropped by the filter
    pub excluded_files: usize,
    /// Directories or entries that could not be read
    pub unreadable_dirs: usize,
    /// Branches not descended because of the depth limit
    pub depth_limited: usize,
    /// Symlinks and other non-regular entries ignored
    pub non_regular: usize,
}

/// Files found by a walk
#[derive(Debug, Clone, Default)]
pub struct WalkListing {
    /// Absolute paths of regular files, sorted
    pub files: Vec<PathBuf>,
    /// What was skipped along the way
    pub stats: WalkStats,
}

/// Recursive regular-file enumerator
#[derive(Debug, Clone)]
pub struct TreeWalker {
    filter: PathFilter,
    max_depth: usize,
}

impl TreeWalker {
    /// Create a walker with the default depth limit
    pub fn new(filter: PathFilter) -> Self {
        Self {
            filter,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Set the recursion limit (minimum 1)
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    /// The filter this walker applies
    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    /// List regular files under `root`
    ///
    /// # Errors
    ///
    /// - [`RewindError::Io`] if `root` does not exist or is not a directory
    pub fn walk(&self, root: &Path) -> Result<WalkListing> {
        let meta = std::fs::metadata(root)?;
        if !meta.is_dir() {
            return Err(RewindError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{:?} is not a directory", root),
            )));
        }

        let mut listing = WalkListing::default();
        let mut entries = WalkDir::new(root)
            .follow_links(false)
            .min_depth(1)
            .into_iter();

        while let Some(next) = entries.next() {
            let entry = match next {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(
                        "Skipping unreadable entry {:?}: {}",
                        e.path().unwrap_or(root),
                        e
                    );
                    listing.stats.unreadable_dirs += 1;
                    continue;
                }
            };

            let relative = match entry.path().strip_prefix(root) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if self.filter.is_excluded(relative) {
                    trace!("Pruned excluded directory {:?}", relative);
                    listing.stats.excluded_dirs += 1;
                    entries.skip_current_dir();
                    continue;
                }
                if entry.depth() > self.max_depth {
                    warn!(
                        "Not descending into {:?}: depth limit of {} reached",
                        relative, self.max_depth
                    );
                    listing.stats.depth_limited += 1;
                    entries.skip_current_dir();
                }
                continue;
            }

            if !file_type.is_file() {
                trace!("Ignoring non-regular entry {:?}", relative);
                listing.stats.non_regular += 1;
                continue;
            }

            if self.filter.is_excluded(relative) {
                listing.stats.excluded_files += 1;
                continue;
            }

            listing.files.push(entry.into_path());
        }

        listing.files.sort();
        debug!(
            "Walked {:?}: {} files ({:?})",
            root,
            listing.files.len(),
            listing.stats
        );
        Ok(listing)
    }
}

/// Convenience wrapper: list files under `root` excluding `patterns`
pub fn walk<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Result<Vec<PathBuf>> {
    Ok(TreeWalker::new(PathFilter::new(patterns)).walk(root)?.files)
}
