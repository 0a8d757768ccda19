//! On-disk snapshot storage
//!
//! [`SnapshotStore`] exclusively owns the storage layout of one tracked root:
//!
//! ```text
//! storage_root/
//! ├── index.json              # JSON array of SnapshotRecord, insertion order
//! └── <snapshot_id>/
//!     ├── .manifest.json      # Manifest: record + capture-time exclusions
//!     └── <relative file tree copy...>
//! ```
//!
//! ## Index
//!
//! The index is the single source of truth for which snapshots exist. It is
//! held in memory behind a lock and rewritten in full (atomically, through a
//! temp file) on every mutation, so memory and disk never drift apart. A
//! failed write rolls the in-memory change back and surfaces as
//! [`RewindError::StorageUnavailable`].
//!
//! The store never repairs an index entry whose content directory has gone
//! missing; restores of such entries fail with [`RewindError::NotFound`].
//!
//! ## Content directories
//!
//! A content directory is created by [`SnapshotStore::prepare_entry`] and only
//! becomes visible once [`SnapshotStore::commit_entry`] appends its record. A
//! crash in between leaves an orphaned directory that no record points at.

use crate::error::{Result, RewindError};
use crate::transfer::FileTransfer;
use crate::types::{Manifest, SnapshotRecord};
use crate::utils;
use parking_lot::RwLock;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the snapshot index inside the storage root
pub const INDEX_FILE: &str = "index.json";
/// File name of the manifest inside each content directory
pub const MANIFEST_FILE: &str = ".manifest.json";

/// What a delete did
#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    /// The record removed from the index
    pub record: SnapshotRecord,
    /// Set when the content directory could not be removed
    pub warning: Option<String>,
}

/// Index and content directories for one tracked root
pub struct SnapshotStore {
    root: PathBuf,
    index: RwLock<Vec<SnapshotRecord>>,
    transfer: FileTransfer,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("root", &self.root)
            .field("snapshots", &self.index.read().len())
            .finish()
    }
}

impl SnapshotStore {
    /// Open (or create) the store rooted at `root`
    ///
    /// A missing `index.json` means an empty store.
    ///
    /// # Errors
    ///
    /// - [`RewindError::StorageUnavailable`] if the root cannot be created or
    ///   the index cannot be read or parsed
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| RewindError::storage(&root, e))?;

        let index_path = root.join(INDEX_FILE);
        let records = match fs::read(&index_path) {
            Ok(bytes) => serde_json::from_slice::<Vec<SnapshotRecord>>(&bytes).map_err(|e| {
                RewindError::storage(&index_path, io::Error::new(io::ErrorKind::InvalidData, e))
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(RewindError::storage(&index_path, e)),
        };

        info!("Opened snapshot store at {:?} ({} snapshots)", root, records.len());

        Ok(Self {
            root,
            index: RwLock::new(records),
            transfer: FileTransfer::default(),
        })
    }

    /// Use a specific retry policy for content directory removal
    pub fn with_transfer(mut self, transfer: FileTransfer) -> Self {
        self.transfer = transfer;
        self
    }

    /// Storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `index.json`
    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Content directory for a snapshot id (whether or not it exists)
    pub fn content_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Whether the content directory for `id` exists
    pub fn has_content(&self, id: &str) -> bool {
        self.content_dir(id).is_dir()
    }

    /// All records in insertion order
    pub fn list(&self) -> Vec<SnapshotRecord> {
        self.index.read().clone()
    }

    /// Number of indexed snapshots
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Whether `id` is in the index
    pub fn contains(&self, id: &str) -> bool {
        self.index.read().iter().any(|r| r.id == id)
    }

    /// Look up a record
    pub fn get(&self, id: &str) -> Result<SnapshotRecord> {
        self.index
            .read()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| RewindError::NotFound(id.to_string()))
    }

    /// Create a fresh, empty content directory for `id`
    ///
    /// Leftovers from an interrupted capture with the same id are cleared.
    pub fn prepare_entry(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        if self.contains(id) {
            return Err(RewindError::DuplicateId(id.to_string()));
        }

        let dir = self.content_dir(id);
        if dir.exists() {
            warn!("Clearing orphaned content directory {:?}", dir);
            let outcome = self.transfer.remove(&dir);
            if let Some(e) = outcome.error {
                return Err(RewindError::storage(&dir, e));
            }
        }
        fs::create_dir_all(&dir).map_err(|e| RewindError::storage(&dir, e))?;
        debug!("Prepared content directory {:?}", dir);
        Ok(dir)
    }

    /// Append a record to the index and persist it
    pub fn commit_entry(&self, record: SnapshotRecord) -> Result<()> {
        validate_id(&record.id)?;
        let mut index = self.index.write();
        if index.iter().any(|r| r.id == record.id) {
            return Err(RewindError::DuplicateId(record.id));
        }

        let id = record.id.clone();
        index.push(record);
        if let Err(e) = self.persist(&index) {
            index.pop();
            return Err(e);
        }

        info!("Recorded snapshot {}", id);
        Ok(())
    }

    /// Create the content directory and index the record in one step
    pub fn create_entry(&self, record: SnapshotRecord) -> Result<PathBuf> {
        let dir = self.prepare_entry(&record.id)?;
        self.commit_entry(record)?;
        Ok(dir)
    }

    /// Delete a snapshot's content directory and its index record
    ///
    /// A content directory that cannot be removed does not block the delete;
    /// it is reported through [`DeleteOutcome::warning`].
    pub fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        let mut index = self.index.write();
        let position = index
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| RewindError::NotFound(id.to_string()))?;

        let dir = self.content_dir(id);
        let outcome = self.transfer.remove(&dir);
        let warning = outcome.error.map(|e| {
            warn!("Could not remove content directory {:?}: {}", dir, e);
            format!("Content directory {:?} was not removed: {}", dir, e)
        });

        let record = index.remove(position);
        if let Err(e) = self.persist(&index) {
            index.insert(position, record);
            return Err(e);
        }

        info!("Deleted snapshot {}", id);
        Ok(DeleteOutcome { record, warning })
    }

    /// Change a snapshot's label
    pub fn rename(&self, id: &str, new_label: &str) -> Result<SnapshotRecord> {
        let label = new_label.trim();
        if label.is_empty() {
            return Err(RewindError::InvalidLabel("label cannot be empty".to_string()));
        }

        let mut index = self.index.write();
        let position = index
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| RewindError::NotFound(id.to_string()))?;

        let previous = std::mem::replace(&mut index[position].label, label.to_string());
        if let Err(e) = self.persist(&index) {
            index[position].label = previous;
            return Err(e);
        }

        debug!("Renamed snapshot {} from '{}' to '{}'", id, previous, label);
        Ok(index[position].clone())
    }

    /// Evict oldest snapshots until at most `max_snapshots` remain
    ///
    /// `0` means unlimited.
    pub fn prune(&self, max_snapshots: usize) -> Result<Vec<DeleteOutcome>> {
        let mut evicted = Vec::new();
        if max_snapshots == 0 {
            return Ok(evicted);
        }

        loop {
            let oldest = {
                let index = self.index.read();
                if index.len() <= max_snapshots {
                    break;
                }
                index[0].id.clone()
            };
            info!("Evicting snapshot {} (retention limit {})", oldest, max_snapshots);
            evicted.push(self.delete(&oldest)?);
        }

        Ok(evicted)
    }

    /// Write a manifest into its snapshot's content directory
    pub fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let path = self.content_dir(&manifest.record.id).join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(manifest)?;
        utils::atomic_write(&path, &json)?;
        debug!("Wrote manifest {:?}", path);
        Ok(())
    }

    /// Read a snapshot's manifest
    pub fn load_manifest(&self, id: &str) -> Result<Manifest> {
        let path = self.content_dir(id).join(MANIFEST_FILE);
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn persist(&self, records: &[SnapshotRecord]) -> Result<()> {
        let path = self.index_path();
        let json = serde_json::to_vec_pretty(records)?;
        utils::atomic_write(&path, &json).map_err(|e| match e {
            RewindError::Io(source) => RewindError::storage(&path, source),
            other => other,
        })
    }
}

/// Ids double as directory names and must stay a single normal component
fn validate_id(id: &str) -> Result<()> {
    let usable = !id.is_empty()
        && id != "."
        && id != ".."
        && id != INDEX_FILE
        && !id.contains(['/', '\\'])
        && !id.starts_with('.');
    if usable {
        Ok(())
    } else {
        Err(RewindError::InvalidLabel(format!("unusable snapshot id '{}'", id)))
    }
}
