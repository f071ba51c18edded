//! Background thumbnail pregeneration.
//!
//! Walks a snapshot of catalog items in small batches with a pause between
//! them, so a library of hundreds of thousands of files fills the small-size
//! cache without starving interactive requests.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::PregenConfig;
use crate::db::{MediaType, PregenItem};
use crate::tasks::CancelToken;
use crate::thumbnails::{SizeClass, ThumbnailError, Thumbnailer};

#[derive(Debug, Clone)]
pub struct PregenOptions {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub log_interval: Duration,
    pub log_every_items: u64,
    pub size: SizeClass,
}

impl From<&PregenConfig> for PregenOptions {
    fn from(config: &PregenConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            batch_delay: Duration::from_millis(config.batch_delay_ms),
            log_interval: Duration::from_secs(config.log_interval_secs),
            log_every_items: config.log_every_items,
            size: SizeClass::Small,
        }
    }
}

impl Default for PregenOptions {
    fn default() -> Self {
        Self::from(&PregenConfig::default())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PregenState {
    #[default]
    Idle,
    Running,
    Finished,
    Aborted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PregenProgress {
    pub state: PregenState,
    pub running: bool,
    pub total: u64,
    pub generated: u64,
    pub skipped: u64,
    pub errors: u64,
    pub items_per_sec: f64,
    pub eta_seconds: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PregenResult {
    pub generated: u64,
    pub skipped: u64,
    pub errors: u64,
    /// `Finished` or `Aborted`.
    pub outcome: PregenState,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PregenError {
    #[error("pregeneration is already running")]
    AlreadyRunning,
}

/// `3723` -> `1h02m03s`, `245` -> `4m05s`, `9` -> `9s`.
pub fn format_eta(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    generated: u64,
    skipped: u64,
    errors: u64,
}

impl Counts {
    fn done(&self) -> u64 {
        self.generated + self.skipped + self.errors
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct PregenEngine {
    thumbs: Arc<Thumbnailer>,
    options: PregenOptions,
    running: AtomicBool,
    progress: Mutex<PregenProgress>,
}

impl PregenEngine {
    pub fn new(thumbs: Arc<Thumbnailer>, options: PregenOptions) -> Self {
        Self {
            thumbs,
            options,
            running: AtomicBool::new(false),
            progress: Mutex::new(PregenProgress::default()),
        }
    }

    pub fn progress(&self) -> PregenProgress {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn publish(&self, update: impl FnOnce(&mut PregenProgress)) {
        update(&mut self.progress.lock().unwrap_or_else(|e| e.into_inner()));
    }

    /// Generate the configured size for every item not already cached and
    /// not previously failed. Returns early with `Aborted` when `cancel`
    /// trips at a batch boundary or during the pause between batches.
    pub fn run(&self, items: &[PregenItem], cancel: &CancelToken) -> Result<PregenResult, PregenError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(PregenError::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        let total = items.len() as u64;
        let started = Instant::now();
        self.publish(|p| {
            *p = PregenProgress {
                state: PregenState::Running,
                running: true,
                total,
                started_at: Some(Utc::now()),
                ..Default::default()
            }
        });

        let video_support = self.thumbs.has_video_support();
        tracing::info!(total, video_support, "Thumbnail pregeneration started");

        let mut counts = Counts::default();
        let mut last_log = Instant::now();
        let mut last_logged = 0u64;
        let batches = items.chunks(self.options.batch_size.max(1));
        let batch_count = batches.len();

        for (index, batch) in batches.enumerate() {
            if cancel.is_cancelled() {
                return Ok(self.abort(counts, started));
            }

            for item in batch {
                self.process(item, video_support, &mut counts);
            }

            let (rate, eta) = rate_and_eta(counts.done(), total, started.elapsed());
            self.publish(|p| {
                p.generated = counts.generated;
                p.skipped = counts.skipped;
                p.errors = counts.errors;
                p.items_per_sec = rate;
                p.eta_seconds = eta;
            });

            let done = counts.done();
            if last_log.elapsed() >= self.options.log_interval
                || done - last_logged >= self.options.log_every_items.max(1)
            {
                tracing::info!(
                    done,
                    total,
                    generated = counts.generated,
                    skipped = counts.skipped,
                    errors = counts.errors,
                    "Pregeneration {:.1} items/s, ETA {}",
                    rate,
                    format_eta(eta)
                );
                last_log = Instant::now();
                last_logged = done;
            }

            if index + 1 < batch_count && !cancel.sleep(self.options.batch_delay) {
                return Ok(self.abort(counts, started));
            }
        }

        let (rate, _) = rate_and_eta(counts.done(), total, started.elapsed());
        self.publish(|p| {
            p.state = PregenState::Finished;
            p.running = false;
            p.items_per_sec = rate;
            p.eta_seconds = 0;
            p.finished_at = Some(Utc::now());
        });
        tracing::info!(
            generated = counts.generated,
            skipped = counts.skipped,
            errors = counts.errors,
            "Thumbnail pregeneration finished in {:.1}s",
            started.elapsed().as_secs_f64()
        );

        Ok(PregenResult {
            generated: counts.generated,
            skipped: counts.skipped,
            errors: counts.errors,
            outcome: PregenState::Finished,
        })
    }

    fn process(&self, item: &PregenItem, video_support: bool, counts: &mut Counts) {
        let size = self.options.size;
        if self.thumbs.failures().contains(&item.path) || self.thumbs.exists(&item.path, size) {
            counts.skipped += 1;
            return;
        }
        if item.media_type == MediaType::Video && !video_support {
            counts.skipped += 1;
            return;
        }

        match self.thumbs.get_or_create(&item.path, size, item.media_type) {
            Ok(_) => counts.generated += 1,
            Err(ThumbnailError::ToolUnavailable) => counts.skipped += 1,
            Err(e) => {
                tracing::warn!(path = %item.path, "Thumbnail generation failed: {}", e);
                self.thumbs.failures().record(&item.path);
                counts.errors += 1;
            }
        }
    }

    fn abort(&self, counts: Counts, started: Instant) -> PregenResult {
        self.publish(|p| {
            p.state = PregenState::Aborted;
            p.running = false;
            p.generated = counts.generated;
            p.skipped = counts.skipped;
            p.errors = counts.errors;
            p.eta_seconds = 0;
            p.finished_at = Some(Utc::now());
        });
        tracing::info!(
            done = counts.done(),
            "Thumbnail pregeneration stopped after {:.1}s",
            started.elapsed().as_secs_f64()
        );
        PregenResult {
            generated: counts.generated,
            skipped: counts.skipped,
            errors: counts.errors,
            outcome: PregenState::Aborted,
        }
    }
}

fn rate_and_eta(done: u64, total: u64, elapsed: Duration) -> (f64, u64) {
    let secs = elapsed.as_secs_f64();
    if done == 0 || secs <= 0.0 {
        return (0.0, 0);
    }
    let rate = done as f64 / secs;
    let remaining = total.saturating_sub(done);
    (rate, (remaining as f64 / rate).round() as u64)
}
