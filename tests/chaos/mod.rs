//! Chaos testing for Rewind
//!
//! Damages the storage directory and races operations against each other,
//! then checks that the tracked tree is either restored or left untouched.

use ::rewind::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use tracing::{info, warn};

/// Chaos testing harness
pub struct RewindChaosTest {
    pub rewind: Arc<Rewind>,
    pub temp_dir: TempDir,
    pub storage_dir: TempDir,
    pub chaos_engine: ChaosEngine,
}

impl RewindChaosTest {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let storage_dir = TempDir::new().unwrap();

        let rewind = RewindBuilder::new()
            .exclude_patterns(vec!["scratch".to_string()])
            .cooldown(Duration::ZERO)
            .retry_base_delay(Duration::ZERO)
            .batch_pause(Duration::ZERO)
            .build(temp_dir.path(), storage_dir.path())
            .unwrap();

        Self {
            rewind: Arc::new(rewind),
            temp_dir,
            storage_dir,
            chaos_engine: ChaosEngine::new(42),
        }
    }

    /// Capture `count` snapshots, each after rewriting a slice of the tree
    fn create_test_snapshots(&mut self, count: usize) -> anyhow::Result<Vec<String>> {
        let mut ids = Vec::new();

        for i in 0..count {
            for j in 0..10 {
                let path = self.temp_dir.path().join(format!("dir_{}/test_{}.txt", j % 3, j));
                fs::create_dir_all(path.parent().unwrap())?;
                fs::write(&path, format!("Test content {} {}", i, j))?;
            }
            let result = self
                .rewind
                .capture(&format!("chaos {}", i), CaptureOptions::default())?;
            ids.push(result.record.id);
        }

        Ok(ids)
    }

    /// Corrupt manifests, drop content files, and remove whole content
    /// directories, then restore every listed snapshot
    pub fn run_storage_corruption(&mut self) -> anyhow::Result<CorruptionTestResult> {
        let mut result = CorruptionTestResult::default();
        let ids = self.create_test_snapshots(6)?;

        info!("Corrupting manifests");
        let manifests: Vec<PathBuf> = ids[0..2]
            .iter()
            .map(|id| self.rewind.store().content_dir(id).join(store::MANIFEST_FILE))
            .collect();
        result.corrupted_manifests = self.chaos_engine.truncate_files(&manifests)?.len();

        info!("Deleting snapshot content files");
        let content = self.rewind.store().content_dir(&ids[2]);
        result.deleted_files = self.chaos_engine.delete_random_files(&content, 3)?.len();

        info!("Removing a whole content directory");
        fs::remove_dir_all(self.rewind.store().content_dir(&ids[3]))?;
        result.removed_content_dirs = 1;

        for id in &ids {
            let before = tree_state(self.temp_dir.path());
            match self.rewind.restore(id, RestoreOptions::default()) {
                Ok(restore) => {
                    if restore.warnings.iter().any(|w| w.contains("unreadable")) {
                        result.degraded_restores += 1;
                    }
                    result.successful_restores += 1;
                }
                Err(e) => {
                    warn!("Failed to restore snapshot {}: {}", id, e);
                    if e.is_structural() && tree_state(self.temp_dir.path()) == before {
                        result.untouched_on_failure += 1;
                    }
                    result.failed_restores += 1;
                }
            }
        }

        Ok(result)
    }

    /// Race captures and restores from several threads
    pub fn run_concurrent_chaos(&mut self, threads: usize, rounds: usize) -> anyhow::Result<ConcurrencyTestResult> {
        let base = self.create_test_snapshots(1)?.remove(0);
        let mut result = ConcurrencyTestResult::default();

        let outcomes: Vec<Vec<Result<()>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|t| {
                    let rewind = Arc::clone(&self.rewind);
                    let base = base.clone();
                    scope.spawn(move || {
                        let mut rng = StdRng::seed_from_u64(t as u64);
                        (0..rounds)
                            .map(|r| {
                                if rng.random_bool(0.5) {
                                    rewind
                                        .capture(&format!("thread {} round {}", t, r), CaptureOptions::default())
                                        .map(|_| ())
                                } else {
                                    rewind.restore(&base, RestoreOptions::default()).map(|_| ())
                                }
                            })
                            .collect()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Ok(()) => result.completed += 1,
                Err(RewindError::AlreadyInProgress { .. }) | Err(RewindError::Cooldown { .. }) => {
                    result.rejected += 1
                }
                Err(e) => {
                    warn!("Unexpected failure under contention: {}", e);
                    result.unexpected_errors += 1;
                }
            }
        }

        result.session_idle = self.rewind.session().state() == SessionState::Idle;
        result.index_consistent = self
            .rewind
            .list()
            .iter()
            .all(|record| self.rewind.store().has_content(&record.id));
        Ok(result)
    }
}

/// Chaos engine for introducing failures
pub struct ChaosEngine {
    rng: StdRng,
}

impl ChaosEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Cut each file to a random prefix so it no longer parses
    pub fn truncate_files(&mut self, files: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
        let mut corrupted = Vec::new();
        for path in files {
            let content = fs::read(path)?;
            let keep = self.rng.random_range(1..content.len().max(2) / 2 + 1);
            fs::write(path, &content[..keep.min(content.len())])?;
            corrupted.push(path.clone());
        }
        Ok(corrupted)
    }

    /// Delete random regular files under `dir`, sparing manifests
    pub fn delete_random_files(&mut self, dir: &Path, count: usize) -> anyhow::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.file_name() != store::MANIFEST_FILE)
            .map(|e| e.path().to_path_buf())
            .collect();

        let mut deleted = Vec::new();
        for _ in 0..count.min(files.len()) {
            let idx = self.rng.random_range(0..files.len());
            let path = files.remove(idx);
            fs::remove_file(&path)?;
            deleted.push(path);
        }
        Ok(deleted)
    }
}

fn tree_state(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| Some((e.path().to_path_buf(), fs::read(e.path()).ok()?)))
        .collect()
}

#[derive(Debug, Default)]
pub struct CorruptionTestResult {
    pub corrupted_manifests: usize,
    pub deleted_files: usize,
    pub removed_content_dirs: usize,
    pub successful_restores: usize,
    pub degraded_restores: usize,
    pub failed_restores: usize,
    pub untouched_on_failure: usize,
}

#[derive(Debug, Default)]
pub struct ConcurrencyTestResult {
    pub completed: usize,
    pub rejected: usize,
    pub unexpected_errors: usize,
    pub session_idle: bool,
    pub index_consistent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_storage_corruption_recovery() {
        let mut chaos_test = RewindChaosTest::new();
        let result = chaos_test.run_storage_corruption().unwrap();

        assert_eq!(result.corrupted_manifests, 2);
        assert_eq!(result.deleted_files, 3);
        assert_eq!(result.degraded_restores, 2);
        assert_eq!(result.successful_restores, 5);
        assert_eq!(result.failed_restores, 1);
        assert_eq!(result.untouched_on_failure, 1);
    }

    #[test]
    fn test_restore_after_content_loss_mirrors_remaining_files() {
        let mut chaos_test = RewindChaosTest::new();
        let ids = chaos_test.create_test_snapshots(1).unwrap();
        let content = chaos_test.rewind.store().content_dir(&ids[0]);
        let deleted = chaos_test.chaos_engine.delete_random_files(&content, 2).unwrap();

        let result = chaos_test.rewind.restore(&ids[0], RestoreOptions::default()).unwrap();
        assert_eq!(result.outcome, RestoreOutcome::Completed);
        assert_eq!(result.files_restored, 8);

        for path in deleted {
            let relative = path.strip_prefix(&content).unwrap();
            assert!(!chaos_test.temp_dir.path().join(relative).exists());
        }
    }

    #[test]
    #[traced_test]
    fn test_concurrent_chaos() {
        let mut chaos_test = RewindChaosTest::new();
        let result = chaos_test.run_concurrent_chaos(4, 5).unwrap();

        assert_eq!(result.completed + result.rejected, 20);
        assert!(result.completed > 0);
        assert_eq!(result.unexpected_errors, 0);
        assert!(result.session_idle);
        assert!(result.index_consistent);
    }

    #[test]
    fn test_excluded_scratch_survives_chaos() {
        let mut chaos_test = RewindChaosTest::new();
        let scratch = chaos_test.temp_dir.path().join("scratch/notes.txt");
        fs::create_dir_all(scratch.parent().unwrap()).unwrap();
        fs::write(&scratch, "keep me").unwrap();

        chaos_test.run_storage_corruption().unwrap();
        assert_eq!(fs::read_to_string(&scratch).unwrap(), "keep me");
    }
}
