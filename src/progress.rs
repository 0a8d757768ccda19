//! Phase bookkeeping shared by the capture and restore engines

use crate::types::{Phase, ProgressCallback, ProgressEvent, ProgressInfo};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Emit a phase transition
pub(crate) fn phase_started(callback: Option<&ProgressCallback>, phase: Phase, total: Option<usize>) {
    if let Some(callback) = callback {
        callback(&ProgressEvent::PhaseStarted { phase, total });
    }
}

/// Per-item counters for one phase
///
/// Safe to update from worker threads; every update is forwarded to the
/// callback with the counts as of that update.
pub(crate) struct PhaseTracker<'a> {
    callback: Option<&'a ProgressCallback>,
    phase: Phase,
    total: usize,
    processed: AtomicUsize,
    failed: AtomicUsize,
}

impl<'a> PhaseTracker<'a> {
    /// Announce `phase` and start counting
    pub(crate) fn start(callback: Option<&'a ProgressCallback>, phase: Phase, total: usize) -> Self {
        phase_started(callback, phase, Some(total));
        Self {
            callback,
            phase,
            total,
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Count one item
    pub(crate) fn record(&self, item: &Path, ok: bool) {
        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        let failed = if ok {
            self.failed.load(Ordering::Relaxed)
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed) + 1
        };

        if let Some(callback) = self.callback {
            callback(&ProgressEvent::Progress(ProgressInfo {
                phase: self.phase,
                current_item: Some(item.to_string_lossy().into_owned()),
                processed,
                failed,
                total: Some(self.total),
            }));
        }
    }
}

/// Map `f` over `items`, on `pool` when one is given
///
/// Output order matches input order.
pub(crate) fn map_items<T, R, F>(pool: Option<&ThreadPool>, items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    match pool {
        Some(pool) => pool.install(|| items.par_iter().map(&f).collect()),
        None => items.iter().map(f).collect(),
    }
}
