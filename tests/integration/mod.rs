//! Integration tests for Rewind
//!
//! Real-world scenarios against generated project trees: repeated
//! capture/restore navigation, exclusion stability, concurrency rejection,
//! large batched restores and degraded manifests.

use ::rewind::*;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::info;

/// Test harness owning a project tree and its storage
pub struct RewindTestHarness {
    pub temp_dir: TempDir,
    pub storage_dir: TempDir,
    pub rewind: Arc<Rewind>,
    pub rng: StdRng,
}

impl RewindTestHarness {
    /// Harness with no exclusions
    pub fn new() -> Self {
        Self::with_builder(RewindBuilder::new())
    }

    /// Harness from a partially configured builder
    ///
    /// Cooldown and retry delays are zeroed so tests run back to back.
    pub fn with_builder(builder: RewindBuilder) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let storage_dir = TempDir::new().unwrap();
        let rewind = builder
            .cooldown(Duration::ZERO)
            .retry_base_delay(Duration::ZERO)
            .batch_pause(Duration::ZERO)
            .build(temp_dir.path(), storage_dir.path())
            .unwrap();

        Self {
            temp_dir,
            storage_dir,
            rewind: Arc::new(rewind),
            rng: StdRng::seed_from_u64(42),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a file relative to the root
    pub fn write(&self, rel: &str, content: impl AsRef<[u8]>) {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Generate a nested project
    pub fn generate_project(&mut self, depth: usize, dirs_per_level: usize, files_per_dir: usize) {
        for level in 1..=depth {
            for dir_idx in 0..dirs_per_level {
                let mut dir = PathBuf::new();
                for l in 0..level {
                    dir.push(format!("dir_{}_{}", l, dir_idx));
                }
                for file_idx in 0..files_per_dir {
                    let content = self.random_content(16..512);
                    let rel = dir.join(format!("file_{}.txt", file_idx));
                    self.write(&rel.to_string_lossy(), content);
                }
            }
        }
    }

    /// Modify, delete and create random files
    pub fn mutate(&mut self, count: usize) {
        let mut files = snapshot_tree(self.root()).into_keys().collect::<Vec<_>>();
        for i in 0..count {
            match self.rng.random_range(0..3) {
                0 if !files.is_empty() => {
                    let idx = self.rng.random_range(0..files.len());
                    let content = self.random_content(1..256);
                    self.write(&files[idx], content);
                }
                1 if !files.is_empty() => {
                    let idx = self.rng.random_range(0..files.len());
                    let rel = files.swap_remove(idx);
                    fs::remove_file(self.root().join(&rel)).unwrap();
                }
                _ => {
                    let rel = format!("new_{}/created_{}.bin", self.rng.random_range(0..4), i);
                    let content = self.random_content(1..128);
                    self.write(&rel, content);
                    files.push(rel);
                }
            }
        }
    }

    fn random_content(&mut self, range: std::ops::Range<usize>) -> Vec<u8> {
        let len = self.rng.random_range(range);
        (0..len).map(|_| self.rng.random::<u8>()).collect()
    }
}

/// Every regular file under `root` (relative, `/`-separated) with its content
pub fn snapshot_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = utils::slash_path(e.path().strip_prefix(root).unwrap());
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

/// Subset of a tree under (or outside) a top-level directory
fn partition(tree: &BTreeMap<String, Vec<u8>>, prefix: &str, inside: bool) -> BTreeMap<String, Vec<u8>> {
    tree.iter()
        .filter(|(k, _)| k.starts_with(prefix) == inside)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_navigation_between_snapshots() {
        let mut harness = RewindTestHarness::new();
        harness.generate_project(2, 3, 4);

        let mut states = Vec::new();
        for i in 0..5 {
            harness.mutate(8);
            let captured = harness
                .rewind
                .capture(&format!("state {}", i), CaptureOptions::default())
                .unwrap();
            states.push((captured.record.id, snapshot_tree(harness.root())));
        }

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..8 {
            let (id, expected) = &states[rng.random_range(0..states.len())];
            harness.mutate(5);
            let result = harness.rewind.restore(id, RestoreOptions::default()).unwrap();
            assert_eq!(result.outcome, RestoreOutcome::Completed);
            assert_eq!(&snapshot_tree(harness.root()), expected);
            info!("Restored {} ({} files)", id, expected.len());
        }
    }

    #[test]
    fn test_excluded_content_survives_restore_byte_for_byte() {
        let harness = RewindTestHarness::with_builder(
            RewindBuilder::new().exclude_patterns(vec!["node_modules".to_string(), "*.log".to_string()]),
        );
        harness.write("src/main.rs", "fn main() {}");
        harness.write("node_modules/react/index.js", "v1");
        harness.write("debug.log", "first run");

        let id = harness
            .rewind
            .capture("clean", CaptureOptions::default())
            .unwrap()
            .record
            .id;

        harness.write("node_modules/react/index.js", "v2");
        harness.write("node_modules/vue/index.js", "added");
        harness.write("debug.log", "second run");
        harness.write("src/extra.rs", "// new");
        let excluded_before = {
            let tree = snapshot_tree(harness.root());
            let mut excluded = partition(&tree, "node_modules/", true);
            excluded.insert("debug.log".to_string(), tree["debug.log"].clone());
            excluded
        };

        harness.rewind.restore(&id, RestoreOptions::default()).unwrap();

        let after = snapshot_tree(harness.root());
        let mut excluded_after = partition(&after, "node_modules/", true);
        excluded_after.insert("debug.log".to_string(), after["debug.log"].clone());
        assert_eq!(excluded_before, excluded_after);
        assert!(!after.contains_key("src/extra.rs"));
    }

    #[test]
    fn test_restore_is_idempotent() {
        let mut harness = RewindTestHarness::new();
        harness.generate_project(2, 2, 3);
        let id = harness
            .rewind
            .capture("base", CaptureOptions::default())
            .unwrap()
            .record
            .id;
        harness.mutate(10);

        harness.rewind.restore(&id, RestoreOptions::default()).unwrap();
        let first = snapshot_tree(harness.root());
        let second_result = harness.rewind.restore(&id, RestoreOptions::default()).unwrap();
        assert_eq!(second_result.outcome, RestoreOutcome::Completed);
        assert_eq!(snapshot_tree(harness.root()), first);
    }

    #[test]
    fn test_restore_rejected_while_capture_runs() {
        let harness = RewindTestHarness::new();
        harness.write("a.txt", "A");
        harness.write("b.txt", "B");
        let base = harness
            .rewind
            .capture("base", CaptureOptions::default())
            .unwrap()
            .record
            .id;

        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        let rewind = Arc::clone(&harness.rewind);
        let options = CaptureOptions {
            progress_callback: Some(Arc::new(move |event: &ProgressEvent| {
                if let ProgressEvent::PhaseStarted { phase: Phase::Copying, .. } = event {
                    let attempt = rewind.restore(&base, RestoreOptions::default());
                    *sink.lock() = Some(attempt.map(|r| r.outcome));
                }
            })),
            ..Default::default()
        };

        harness.rewind.capture("second", options).unwrap();

        let attempt = observed.lock().take().expect("callback ran");
        match attempt {
            Err(RewindError::AlreadyInProgress { operation, .. }) => assert_eq!(operation, "capture"),
            other => panic!("restore during capture was not rejected: {:?}", other),
        }
        assert_eq!(harness.rewind.session().state(), SessionState::Idle);
        assert_eq!(harness.rewind.list().len(), 2);
    }

    #[test]
    fn test_capture_rejected_while_restore_runs() {
        let harness = RewindTestHarness::new();
        harness.write("a.txt", "A");
        let id = harness
            .rewind
            .capture("base", CaptureOptions::default())
            .unwrap()
            .record
            .id;

        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        let rewind = Arc::clone(&harness.rewind);
        let options = RestoreOptions {
            progress_callback: Some(Arc::new(move |event: &ProgressEvent| {
                if let ProgressEvent::PhaseStarted { phase: Phase::Deleting, .. } = event {
                    let attempt = rewind.capture("sneaky", CaptureOptions::default());
                    *sink.lock() = Some(attempt.map(|r| r.record.id));
                }
            })),
            ..Default::default()
        };

        let result = harness.rewind.restore(&id, options).unwrap();
        assert_eq!(result.outcome, RestoreOutcome::Completed);
        assert!(matches!(
            observed.lock().take(),
            Some(Err(RewindError::AlreadyInProgress { .. }))
        ));
        assert_eq!(harness.rewind.list().len(), 1);
    }

    #[test]
    fn test_cooldown_between_operations() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "A").unwrap();
        let storage = TempDir::new().unwrap();
        let rewind = RewindBuilder::new()
            .cooldown(Duration::from_millis(300))
            .build(temp_dir.path(), storage.path())
            .unwrap();

        let id = rewind.capture("first", CaptureOptions::default()).unwrap().record.id;
        let err = rewind.restore(&id, RestoreOptions::default()).unwrap_err();
        assert!(matches!(err, RewindError::Cooldown { .. }));
        assert!(err.is_recoverable());

        std::thread::sleep(Duration::from_millis(350));
        assert!(rewind.restore(&id, RestoreOptions::default()).is_ok());
    }

    #[test]
    fn test_large_restore_is_batched_automatically() {
        let harness = RewindTestHarness::with_builder(RewindBuilder::new().parallel_workers(4));
        for i in 0..1100 {
            harness.write(&format!("bulk/{:02}/f{}.txt", i % 20, i), format!("{}", i));
        }
        let id = harness
            .rewind
            .capture("bulk", CaptureOptions::default())
            .unwrap()
            .record
            .id;
        let expected = snapshot_tree(harness.root());
        fs::remove_dir_all(harness.root().join("bulk/03")).unwrap();

        let result = harness.rewind.restore(&id, RestoreOptions::default()).unwrap();
        assert_eq!(result.files_restored, 1100);
        assert_eq!(result.batches, 6);
        assert_eq!(snapshot_tree(harness.root()), expected);
    }

    #[test]
    fn test_structural_failure_leaves_tree_untouched() {
        let harness = RewindTestHarness::new();
        harness.write("a.txt", "A");
        let id = harness
            .rewind
            .capture("base", CaptureOptions::default())
            .unwrap()
            .record
            .id;
        harness.write("b.txt", "B");
        fs::remove_dir_all(harness.rewind.store().content_dir(&id)).unwrap();
        let before = snapshot_tree(harness.root());

        let err = harness.rewind.restore(&id, RestoreOptions::default()).unwrap_err();
        assert!(matches!(err, RewindError::NotFound(_)));
        assert_eq!(snapshot_tree(harness.root()), before);
    }

    #[test]
    fn test_corrupt_manifest_restores_in_degraded_mode() {
        let harness = RewindTestHarness::with_builder(
            RewindBuilder::new().exclude_patterns(vec!["cache".to_string()]),
        );
        harness.write("a.txt", "A");
        harness.write("cache/blob", "keep me");
        let id = harness
            .rewind
            .capture("base", CaptureOptions::default())
            .unwrap()
            .record
            .id;
        let manifest = harness
            .rewind
            .store()
            .content_dir(&id)
            .join(store::MANIFEST_FILE);
        fs::write(&manifest, "{ not json").unwrap();
        harness.write("a.txt", "changed");

        let result = harness.rewind.restore(&id, RestoreOptions::default()).unwrap();

        assert!(result.degraded);
        assert!(result.summary().contains("manifest unavailable"));
        assert_eq!(fs::read_to_string(harness.root().join("a.txt")).unwrap(), "A");
        assert_eq!(fs::read_to_string(harness.root().join("cache/blob")).unwrap(), "keep me");
        assert!(result.warnings.iter().any(|w| w.contains("unreadable")));
    }

    #[test]
    fn test_unrestorable_path_is_partial_failure() {
        let harness = RewindTestHarness::new();
        harness.write("a.txt", "A");
        harness.write("sub/b.txt", "B");
        let id = harness
            .rewind
            .capture("base", CaptureOptions::default())
            .unwrap()
            .record
            .id;

        // Pin "sub" as excluded, then put a regular file where the directory was.
        let store = harness.rewind.store();
        let mut manifest = store.load_manifest(&id).unwrap();
        manifest.exclude_patterns = vec!["sub".to_string()];
        store.write_manifest(&manifest).unwrap();
        fs::remove_dir_all(harness.root().join("sub")).unwrap();
        fs::write(harness.root().join("sub"), "blocking file").unwrap();

        let result = harness.rewind.restore(&id, RestoreOptions::default()).unwrap();

        assert_eq!(result.outcome, RestoreOutcome::Partial);
        assert_eq!(result.files_restored, 1);
        assert_eq!(result.files_failed, 1);
        assert!(result.warnings.iter().any(|w| w.contains("sub/b.txt")));
        assert_eq!(fs::read_to_string(harness.root().join("a.txt")).unwrap(), "A");
        assert!(matches!(
            result.ensure_complete(),
            Err(RewindError::PartialFailure { failed: 1, .. })
        ));
    }

    #[test]
    fn test_storage_inside_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), "A").unwrap();
        let rewind = RewindBuilder::new()
            .cooldown(Duration::ZERO)
            .build(root, root.join(config::DEFAULT_STORAGE_DIR))
            .unwrap();

        let first = rewind.capture("one", CaptureOptions::default()).unwrap();
        fs::write(root.join("b.txt"), "B").unwrap();
        let second = rewind.capture("two", CaptureOptions::default()).unwrap();
        assert_eq!(first.files_captured, 1);
        assert_eq!(second.files_captured, 2);

        let result = rewind.restore(&first.record.id, RestoreOptions::default()).unwrap();
        assert_eq!(result.files_removed, 2);
        assert!(!root.join("b.txt").exists());
        assert!(rewind.store().has_content(&second.record.id));
        assert_eq!(rewind.list().len(), 2);
    }
}
