use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Point-in-time view of a scan, safe to hand to status callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexProgress {
    pub running: bool,
    pub total: u64,
    pub processed: u64,
    pub indexed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files_per_sec: f64,
}

#[derive(Debug, Default)]
struct RunState {
    running: bool,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    files_per_sec: f64,
}

/// Counters are atomics so readers never see a torn value; the running
/// flag and timestamps change together under the mutex.
#[derive(Debug, Default)]
pub struct IndexTracker {
    total: AtomicU64,
    processed: AtomicU64,
    indexed: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    state: Mutex<RunState>,
}

impl IndexTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark a run as started and reset the counters. Returns `false` if a
    /// run is already in progress.
    pub fn try_begin(&self) -> bool {
        let mut state = self.state();
        if state.running {
            return false;
        }
        for counter in [
            &self.total,
            &self.processed,
            &self.indexed,
            &self.skipped,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *state = RunState {
            running: true,
            started_at: Some(Utc::now()),
            finished_at: None,
            files_per_sec: 0.0,
        };
        true
    }

    /// Clear the running flag and stamp the finish time and throughput.
    pub fn finish(&self) {
        let mut state = self.state();
        let now = Utc::now();
        let processed = self.processed.load(Ordering::Relaxed);
        if let Some(started) = state.started_at {
            let elapsed = (now - started).num_milliseconds() as f64 / 1000.0;
            state.files_per_sec = if elapsed > 0.0 {
                processed as f64 / elapsed
            } else {
                0.0
            };
        }
        state.running = false;
        state.finished_at = Some(now);
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn add_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_indexed(&self) {
        self.indexed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IndexProgress {
        let state = self.state();
        IndexProgress {
            running: state.running,
            total: self.total.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            started_at: state.started_at,
            finished_at: state.finished_at,
            files_per_sec: state.files_per_sec,
        }
    }
}

/// Finishes the run when dropped, so every exit path from a scan clears
/// the running flag.
pub(crate) struct RunGuard<'a> {
    tracker: &'a IndexTracker,
}

impl<'a> RunGuard<'a> {
    pub(crate) fn begin(tracker: &'a IndexTracker) -> Option<Self> {
        // A guard exists only for a run this call started.
        if tracker.try_begin() {
            Some(Self { tracker })
        } else {
            None
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.tracker.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_is_exclusive() {
        let tracker = IndexTracker::new();
        assert!(tracker.try_begin());
        assert!(!tracker.try_begin());
        tracker.finish();
        assert!(tracker.try_begin());
    }

    #[test]
    fn test_begin_resets_counters() {
        let tracker = IndexTracker::new();
        assert!(tracker.try_begin());
        tracker.set_total(5);
        tracker.add_processed();
        tracker.add_skipped();
        tracker.add_error();
        tracker.finish();

        let done = tracker.snapshot();
        assert!(!done.running);
        assert_eq!((done.total, done.processed, done.skipped, done.errors), (5, 1, 1, 1));
        assert!(done.finished_at.is_some());

        assert!(tracker.try_begin());
        let fresh = tracker.snapshot();
        assert!(fresh.running);
        assert_eq!((fresh.total, fresh.processed, fresh.skipped), (0, 0, 0));
        assert!(fresh.finished_at.is_none());
    }

    #[test]
    fn test_guard_finishes_on_drop() {
        let tracker = IndexTracker::new();
        {
            let _guard = RunGuard::begin(&tracker).unwrap();
            assert!(tracker.is_running());
            assert!(RunGuard::begin(&tracker).is_none());
        }
        assert!(!tracker.is_running());
        assert!(tracker.snapshot().finished_at.is_some());
    }

    #[test]
    fn test_rejected_guard_leaves_run_alone() {
        let tracker = IndexTracker::new();
        let _guard = RunGuard::begin(&tracker).unwrap();
        tracker.add_processed();

        assert!(RunGuard::begin(&tracker).is_none());

        let snap = tracker.snapshot();
        assert!(snap.running);
        assert_eq!(snap.processed, 1);
        assert!(snap.finished_at.is_none());
    }
}
