//! Thumbnail cache.
//!
//! Thumbnails are WebP files under a two-level sharded tree keyed by a hash
//! of the source path, the size class and a format version:
//!
//! ```text
//! thumbs/3f/a2/3fa2…e1_sm_v2.webp
//! ```
//!
//! A present file is never regenerated. Bumping [`CACHE_VERSION`] orphans
//! every existing entry.

pub mod failures;
pub mod render;
pub mod video;

use anyhow::Context;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use crate::config::ThumbnailConfig;
use crate::db::MediaType;

pub use failures::{FailureMemo, FAILURE_FILE};

pub const CACHE_VERSION: &str = "v2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Small => "sm",
            SizeClass::Medium => "md",
            SizeClass::Large => "lg",
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizeClass {
    type Err = ThumbnailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sm" => Ok(SizeClass::Small),
            "md" => Ok(SizeClass::Medium),
            "lg" => Ok(SizeClass::Large),
            other => Err(ThumbnailError::UnknownSize(other.to_string())),
        }
    }
}

/// Why a thumbnail could not be produced, by stage.
#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("cannot open source: {0}")]
    Open(String),
    #[error("cannot decode image: {0}")]
    Decode(String),
    #[error("cannot resize image: {0}")]
    Resize(String),
    #[error("cannot encode thumbnail: {0}")]
    Encode(String),
    #[error("cannot write thumbnail: {0}")]
    Write(String),
    #[error("video thumbnails unavailable (ffmpeg not installed)")]
    ToolUnavailable,
    #[error("ffmpeg failed: {0}")]
    Tool(String),
    #[error("ffmpeg timed out after {0:?}")]
    ToolTimeout(Duration),
    #[error("unknown size class: {0}")]
    UnknownSize(String),
}

/// First 16 bytes of SHA-256 over the path bytes, hex encoded.
pub fn cache_key(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Cache location for `path` at `size` under `root`, for a given format version.
pub fn thumb_path_in(root: &Path, path: &str, size: SizeClass, version: &str) -> PathBuf {
    let key = cache_key(path);
    root.join(&key[0..2])
        .join(&key[2..4])
        .join(format!("{key}_{size}_{version}.webp"))
}

pub struct Thumbnailer {
    root: PathBuf,
    config: ThumbnailConfig,
    failures: FailureMemo,
    ffmpeg: OnceLock<Option<PathBuf>>,
    generated: AtomicU64,
}

impl Thumbnailer {
    /// Create the cache root and load the failure memo. Failing to create
    /// the directory is fatal.
    pub fn new(root: PathBuf, config: &ThumbnailConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create thumbnail directory {}", root.display()))?;
        let failures = FailureMemo::load(root.join(FAILURE_FILE));
        Ok(Self {
            root,
            config: config.clone(),
            failures,
            ffmpeg: OnceLock::new(),
            generated: AtomicU64::new(0),
        })
    }

    /// Pin ffmpeg to `path`, or disable video thumbnails with `None`,
    /// instead of looking it up on first use.
    pub fn with_ffmpeg(self, path: Option<PathBuf>) -> Self {
        let _ = self.ffmpeg.set(path);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_dimension(&self, size: SizeClass) -> u32 {
        match size {
            SizeClass::Small => self.config.small_size,
            SizeClass::Medium => self.config.medium_size,
            SizeClass::Large => self.config.large_size,
        }
    }

    pub fn thumb_path(&self, path: &str, size: SizeClass) -> PathBuf {
        thumb_path_in(&self.root, path, size, CACHE_VERSION)
    }

    pub fn exists(&self, path: &str, size: SizeClass) -> bool {
        self.thumb_path(path, size).is_file()
    }

    pub fn failures(&self) -> &FailureMemo {
        &self.failures
    }

    /// Thumbnails materialized by this instance.
    pub fn generated_count(&self) -> u64 {
        self.generated.load(Ordering::Relaxed)
    }

    fn ffmpeg(&self) -> Option<&Path> {
        self.ffmpeg
            .get_or_init(|| video::locate_ffmpeg(self.config.ffmpeg_path.as_deref()))
            .as_deref()
    }

    pub fn has_video_support(&self) -> bool {
        self.ffmpeg().is_some()
    }

    pub fn get_or_create(
        &self,
        path: &str,
        size: SizeClass,
        media_type: MediaType,
    ) -> Result<PathBuf, ThumbnailError> {
        match media_type {
            MediaType::Image => self.get_or_create_image(path, size),
            MediaType::Video => self.get_or_create_video(path, size),
        }
    }

    pub fn get_or_create_image(&self, path: &str, size: SizeClass) -> Result<PathBuf, ThumbnailError> {
        let dest = self.thumb_path(path, size);
        if dest.is_file() {
            return Ok(dest);
        }

        render::render_image(
            Path::new(path),
            &dest,
            self.max_dimension(size),
            self.config.quality,
        )?;
        self.generated.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(path, size = %size, "Generated image thumbnail");
        Ok(dest)
    }

    pub fn get_or_create_video(&self, path: &str, size: SizeClass) -> Result<PathBuf, ThumbnailError> {
        let dest = self.thumb_path(path, size);
        if dest.is_file() {
            return Ok(dest);
        }
        let ffmpeg = self.ffmpeg().ok_or(ThumbnailError::ToolUnavailable)?;
        let max = self.max_dimension(size);

        // Dropping the frame removes the intermediate file on every path.
        let frame = video::extract_frame(
            ffmpeg,
            Path::new(path),
            max,
            self.config.ffmpeg_timeout(),
        )?;
        render::render_image(frame.path(), &dest, max, self.config.quality)?;
        self.generated.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(path, size = %size, "Generated video thumbnail");
        Ok(dest)
    }
}
