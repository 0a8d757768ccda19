//! Utility functions for Rewind
//!
//! Path manipulation, atomic writes, label sanitisation and byte formatting
//! shared by the store and both engines.

use crate::error::{Result, RewindError};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Longest label fragment kept in a snapshot id
const MAX_LABEL_TOKEN_LEN: usize = 48;

/// Make a path relative to a base path
///
/// Tries a lexical strip first so symbolic link paths are preserved, and only
/// canonicalises both sides when that fails.
///
/// # Errors
///
/// - [`RewindError::Internal`] if the path is not under the base path
/// - [`RewindError::Io`] if canonicalization fails (fallback case only)
///
/// # Example
///
/// ```rust,ignore
/// let relative = make_relative(Path::new("/p/src/main.rs"), Path::new("/p"))?;
/// assert_eq!(relative, PathBuf::from("src/main.rs"));
/// ```
pub fn make_relative(path: &Path, base: &Path) -> Result<PathBuf> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Ok(relative.to_path_buf());
    }

    let path_canon = path.canonicalize()?;
    let base_canon = base.canonicalize()?;

    path_canon
        .strip_prefix(&base_canon)
        .map(|p| p.to_path_buf())
        .map_err(|_| {
            RewindError::internal(format!(
                "Path {:?} is not relative to {:?}",
                path_canon, base_canon
            ))
        })
}

/// Render a relative path with `/` separators on every platform
pub fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Reduce a user label to a filesystem-safe token
///
/// Keeps ASCII alphanumerics, `-` and `_`; every other run of characters
/// collapses to a single `-`. Leading/trailing separators are trimmed and the
/// result is capped in length. Returns an empty string when nothing usable
/// remains.
pub fn sanitize_label(label: &str) -> String {
    let mut token = String::with_capacity(label.len());
    let mut pending_dash = false;

    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            if pending_dash && !token.is_empty() {
                token.push('-');
            }
            pending_dash = false;
            token.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if token.len() >= MAX_LABEL_TOKEN_LEN {
            break;
        }
    }

    token.trim_matches(|c| c == '-' || c == '_').to_string()
}

/// Atomic file write (write to a temp file in the same directory, then rename)
///
/// The target is either the previous content or the complete new content,
/// never a partial write.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| RewindError::Io(e.error))?;

    trace!("Atomically wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}

/// Remove directory if empty
pub fn remove_dir_if_empty(path: &Path) -> Result<bool> {
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
        trace!("Removed empty directory: {:?}", path);
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Format bytes in human-readable form (1024-based units)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
