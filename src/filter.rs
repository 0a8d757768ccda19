//! Exclusion patterns
//!
//! A [`PathFilter`] decides whether a path relative to the tracked root is left
//! out of captures and restores. Patterns are OR-ed and have no negation or
//! precedence:
//!
//! - `node_modules` excludes any path with a segment equal to `node_modules`
//! - `*.log` excludes any path with a segment matching the glob (`*` is any run
//!   of characters, `?` is a single character; nothing else is special)
//! - `build/out` excludes any path containing the segments `build`, `out`
//!   consecutively
//!
//! Leading `/` or `./` and a trailing `/` or `/**` are ignored, so patterns are
//! always relative. Patterns containing `..` are rejected.
//!
//! ```rust
//! use rewind::filter::PathFilter;
//! use std::path::Path;
//!
//! let filter = PathFilter::new(&["node_modules", "*.tmp"]);
//! assert!(filter.is_excluded(Path::new("web/node_modules/react/index.js")));
//! assert!(filter.is_excluded(Path::new("notes.tmp")));
//! assert!(!filter.is_excluded(Path::new("src/node_modules_docs.md")));
//! ```

use globset::{GlobBuilder, GlobMatcher};
use std::path::{Component, Path};
use tracing::warn;

/// Matcher for a single path segment
#[derive(Debug, Clone)]
enum SegmentMatcher {
    Literal(String),
    Glob(GlobMatcher),
}

impl SegmentMatcher {
    fn compile(segment: &str) -> Self {
        if !segment.contains(['*', '?']) {
            return SegmentMatcher::Literal(segment.to_string());
        }

        let mut glob = String::with_capacity(segment.len() * 2);
        let mut previous_star = false;
        for ch in segment.chars() {
            match ch {
                '*' if previous_star => continue,
                '*' | '?' => glob.push(ch),
                _ => glob.push_str(&globset::escape(&ch.to_string())),
            }
            previous_star = ch == '*';
        }

        match GlobBuilder::new(&glob).literal_separator(false).build() {
            Ok(compiled) => SegmentMatcher::Glob(compiled.compile_matcher()),
            Err(e) => {
                warn!("Treating pattern segment '{}' literally: {}", segment, e);
                SegmentMatcher::Literal(segment.to_string())
            }
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            SegmentMatcher::Literal(literal) => literal == name,
            SegmentMatcher::Glob(matcher) => matcher.is_match(name),
        }
    }
}

/// One compiled pattern: a run of segments that must match consecutively
#[derive(Debug, Clone)]
struct Rule {
    segments: Vec<SegmentMatcher>,
    /// Only match a run starting at the first path segment
    anchored: bool,
}

impl Rule {
    fn matches(&self, parts: &[&str]) -> bool {
        let width = self.segments.len();
        if width == 0 || parts.len() < width {
            return false;
        }
        let last_start = if self.anchored { 0 } else { parts.len() - width };
        (0..=last_start).any(|start| {
            self.segments
                .iter()
                .zip(&parts[start..start + width])
                .all(|(matcher, part)| matcher.matches(part))
        })
    }
}

/// Compiled set of exclusion patterns
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    patterns: Vec<String>,
    rules: Vec<Rule>,
}

impl PathFilter {
    /// Compile a pattern set; invalid patterns are dropped with a warning
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut filter = PathFilter::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            match normalize_pattern(pattern) {
                Some(segments) => {
                    filter.patterns.push(pattern.to_string());
                    filter.rules.push(Rule {
                        segments: segments.iter().map(|s| SegmentMatcher::compile(s)).collect(),
                        anchored: false,
                    });
                }
                None => warn!("Ignoring exclusion pattern '{}'", pattern),
            }
        }
        filter
    }

    /// Also exclude one exact relative path (and everything below it)
    ///
    /// Used for the storage directory when it lives inside the tracked root.
    /// The path is not added to [`patterns`](Self::patterns).
    pub fn exclude_path(mut self, relative: &Path) -> Self {
        let segments: Vec<SegmentMatcher> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => {
                    Some(SegmentMatcher::Literal(part.to_string_lossy().into_owned()))
                }
                _ => None,
            })
            .collect();
        if !segments.is_empty() {
            self.rules.push(Rule { segments, anchored: true });
        }
        self
    }

    /// Exclude the storage directory when it lives inside `root`
    pub fn exclude_storage(self, root: &Path, storage: &Path) -> Self {
        match crate::utils::make_relative(storage, root) {
            Ok(relative) => self.exclude_path(&relative),
            Err(_) => self,
        }
    }

    /// The user patterns that compiled successfully
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether nothing is excluded
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether a path relative to the tracked root is excluded
    pub fn is_excluded(&self, relative: &Path) -> bool {
        if self.rules.is_empty() {
            return false;
        }
        let owned: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let parts: Vec<&str> = owned.iter().map(String::as_str).collect();
        self.rules.iter().any(|rule| rule.matches(&parts))
    }

    /// Whether a bare directory-entry name is excluded
    pub fn is_excluded_name(&self, name: &str) -> bool {
        self.rules
            .iter()
            .any(|rule| !rule.anchored && rule.segments.len() == 1 && rule.segments[0].matches(name))
    }
}

/// One-off exclusion check against an uncompiled pattern set
pub fn excluded<S: AsRef<str>>(relative: &Path, patterns: &[S]) -> bool {
    PathFilter::new(patterns).is_excluded(relative)
}

/// Split a pattern into relative segments, or `None` if it is unusable
fn normalize_pattern(pattern: &str) -> Option<Vec<String>> {
    let mut trimmed = pattern.trim().replace('\\', "/");
    loop {
        if let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest.to_string();
        } else if let Some(rest) = trimmed.strip_prefix('/') {
            trimmed = rest.to_string();
        } else {
            break;
        }
    }
    loop {
        if let Some(rest) = trimmed.strip_suffix("/**") {
            trimmed = rest.to_string();
        } else if let Some(rest) = trimmed.strip_suffix('/') {
            trimmed = rest.to_string();
        } else {
            break;
        }
    }

    let segments: Vec<String> = trimmed
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(str::to_string)
        .collect();

    if segments.is_empty() || segments.iter().any(|s| s == "..") {
        return None;
    }
    Some(segments)
}
