pub mod discovery;
pub mod metadata;
pub mod progress;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::db::{Database, NewMedia};
use crate::tasks::CancelToken;

pub use discovery::{should_skip_file, walk_media, MediaExtensions, MediaFile};
pub use metadata::{extract_metadata, MediaMetadata};
pub use progress::{IndexProgress, IndexTracker};

use progress::RunGuard;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("a scan is already running")]
    AlreadyRunning,
    #[error("scan cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSummary {
    pub total: u64,
    pub processed: u64,
    pub indexed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub elapsed: Duration,
}

/// Walks the library roots and records every new media file in the catalog.
pub struct Indexer {
    db: Arc<Database>,
    roots: Vec<PathBuf>,
    extensions: MediaExtensions,
    tracker: IndexTracker,
    active_walks: AtomicUsize,
    peak_walks: AtomicUsize,
}

impl Indexer {
    pub fn new(db: Arc<Database>, roots: Vec<PathBuf>, extensions: MediaExtensions) -> Self {
        Self {
            db,
            roots,
            extensions,
            tracker: IndexTracker::new(),
            active_walks: AtomicUsize::new(0),
            peak_walks: AtomicUsize::new(0),
        }
    }

    pub fn progress(&self) -> IndexProgress {
        self.tracker.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.tracker.is_running()
    }

    /// Highest number of walks ever in flight at once on this indexer.
    pub fn peak_concurrent_scans(&self) -> usize {
        self.peak_walks.load(Ordering::SeqCst)
    }

    /// Run one scan: a count pass to size the progress total, then an index
    /// pass. Files already in the catalog are skipped, not refreshed.
    pub fn scan(&self, cancel: &CancelToken) -> Result<ScanSummary, ScanError> {
        let _run = RunGuard::begin(&self.tracker).ok_or(ScanError::AlreadyRunning)?;
        let _walk = WalkEntry::enter(&self.active_walks, &self.peak_walks);
        let start = Instant::now();

        tracing::info!(roots = self.roots.len(), "Scan started");

        let mut total = 0u64;
        for root in &self.roots {
            for _ in walk_media(root, &self.extensions) {
                if cancel.is_cancelled() {
                    return Err(self.cancelled());
                }
                total += 1;
            }
        }
        self.tracker.set_total(total);

        for root in &self.roots {
            for file in walk_media(root, &self.extensions) {
                if cancel.is_cancelled() {
                    return Err(self.cancelled());
                }
                self.index_file(&file);
            }
        }

        let progress = self.tracker.snapshot();
        let summary = ScanSummary {
            total: progress.total,
            processed: progress.processed,
            indexed: progress.indexed,
            skipped: progress.skipped,
            errors: progress.errors,
            elapsed: start.elapsed(),
        };
        tracing::info!(
            total = summary.total,
            indexed = summary.indexed,
            skipped = summary.skipped,
            errors = summary.errors,
            "Scan finished in {:.1}s",
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }

    fn cancelled(&self) -> ScanError {
        let progress = self.tracker.snapshot();
        tracing::info!(
            processed = progress.processed,
            total = progress.total,
            "Scan cancelled"
        );
        ScanError::Cancelled
    }

    fn index_file(&self, file: &MediaFile) {
        match self.db.media_exists(&file.path) {
            Ok(true) => {
                self.tracker.add_skipped();
                self.tracker.add_processed();
                return;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(path = %file.path.display(), "Catalog lookup failed: {:#}", e);
                self.tracker.add_error();
                return;
            }
        }

        let fs_meta = match std::fs::metadata(&file.path) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(path = %file.path.display(), "Cannot stat file: {}", e);
                return;
            }
        };
        let mtime: DateTime<Utc> = fs_meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let meta = extract_metadata(&file.path, file.media_type, mtime);
        let record = NewMedia {
            path: file.path.clone(),
            filename: file.filename.clone(),
            taken_at: meta.taken_at,
            width: meta.width,
            height: meta.height,
            orientation: meta.orientation,
            media_type: file.media_type,
            file_size: fs_meta.len(),
            duration: meta.duration,
            indexed_at: Utc::now(),
        };

        match self.db.upsert_media(&record) {
            Ok(_) => self.tracker.add_indexed(),
            Err(e) => {
                tracing::warn!(path = %file.path.display(), "Failed to index: {:#}", e);
                self.tracker.add_error();
            }
        }
        self.tracker.add_processed();
    }
}

/// Counts walks in flight and remembers the peak.
struct WalkEntry<'a> {
    active: &'a AtomicUsize,
}

impl<'a> WalkEntry<'a> {
    fn enter(active: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for WalkEntry<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
