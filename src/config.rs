use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at an alternative config file.
pub const CONFIG_ENV: &str = "PHOTOSHELF_CONFIG";
/// Comma-separated list of library roots, overrides `library.roots`.
pub const PHOTO_PATHS_ENV: &str = "PHOTOSHELF_PHOTO_PATHS";
/// Overrides `cache.dir`.
pub const CACHE_DIR_ENV: &str = "PHOTOSHELF_CACHE_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,

    #[serde(default)]
    pub pregen: PregenConfig,

    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Read-only directories walked by the scanner.
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
}

fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("/photos")]
}

fn default_image_extensions() -> Vec<String> {
    [
        "jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "tif", "heic", "heif", "avif",
    ]
    .iter()
    .map(|e| e.to_string())
    .collect()
}

fn default_video_extensions() -> Vec<String> {
    ["mp4", "mov", "avi", "mkv", "webm", "m4v", "3gp", "wmv"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            image_extensions: default_image_extensions(),
            video_extensions: default_video_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Holds the catalog database and the thumbnail tree.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("photoshelf")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_small_size")]
    pub small_size: u32,

    #[serde(default = "default_medium_size")]
    pub medium_size: u32,

    #[serde(default = "default_large_size")]
    pub large_size: u32,

    /// WebP quality, 1-100.
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Explicit ffmpeg binary. When unset, ffmpeg is looked up on PATH.
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Upper bound for a single ffmpeg invocation.
    #[serde(default = "default_ffmpeg_timeout_secs")]
    pub ffmpeg_timeout_secs: u64,
}

fn default_small_size() -> u32 {
    250
}

fn default_medium_size() -> u32 {
    600
}

fn default_large_size() -> u32 {
    1200
}

fn default_quality() -> u8 {
    80
}

fn default_ffmpeg_timeout_secs() -> u64 {
    60
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            small_size: default_small_size(),
            medium_size: default_medium_size(),
            large_size: default_large_size(),
            quality: default_quality(),
            ffmpeg_path: None,
            ffmpeg_timeout_secs: default_ffmpeg_timeout_secs(),
        }
    }
}

impl ThumbnailConfig {
    pub fn ffmpeg_timeout(&self) -> Duration {
        Duration::from_secs(self.ffmpeg_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PregenConfig {
    #[serde(default = "default_pregen_enabled")]
    pub enabled: bool,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches so interactive requests keep their share of I/O.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    #[serde(default = "default_log_interval_secs")]
    pub log_interval_secs: u64,

    #[serde(default = "default_log_every_items")]
    pub log_every_items: u64,
}

fn default_pregen_enabled() -> bool {
    true
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_delay_ms() -> u64 {
    2000
}

fn default_log_interval_secs() -> u64 {
    30
}

fn default_log_every_items() -> u64 {
    500
}

impl Default for PregenConfig {
    fn default() -> Self {
        Self {
            enabled: default_pregen_enabled(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            log_interval_secs: default_log_interval_secs(),
            log_every_items: default_log_every_items(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Seconds between periodic re-scans, 0 disables them.
    #[serde(default = "default_watch_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_index_on_startup")]
    pub index_on_startup: bool,
}

fn default_watch_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_index_on_startup() -> bool {
    true
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_watch_interval_secs(),
            index_on_startup: default_index_on_startup(),
        }
    }
}

impl WatchConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

impl Config {
    /// Load from `$PHOTOSHELF_CONFIG` or the default location, then apply
    /// environment overrides. A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(Self::config_path);
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay environment-style overrides. `lookup` abstracts the
    /// environment so callers can supply their own source.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(paths) = lookup(PHOTO_PATHS_ENV) {
            let roots: Vec<PathBuf> = paths
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
            if !roots.is_empty() {
                self.library.roots = roots;
            }
        }

        if let Some(dir) = lookup(CACHE_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.cache.dir = PathBuf::from(dir.trim());
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thumbnails;
        if t.small_size == 0 || t.medium_size == 0 || t.large_size == 0 {
            bail!("thumbnail sizes must be greater than zero");
        }
        if !(1..=100).contains(&t.quality) {
            bail!("thumbnail quality must be between 1 and 100, got {}", t.quality);
        }
        if self.pregen.batch_size == 0 {
            bail!("pregen.batch_size must be at least 1");
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.cache.dir.join("photoshelf.db")
    }

    pub fn thumbs_dir(&self) -> PathBuf {
        self.cache.dir.join("thumbs")
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("photoshelf")
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.thumbnails.small_size, 250);
        assert_eq!(config.thumbnails.medium_size, 600);
        assert_eq!(config.thumbnails.large_size, 1200);
        assert_eq!(config.thumbnails.quality, 80);
        assert_eq!(config.pregen.batch_size, 10);
        assert_eq!(config.watch.interval(), Some(Duration::from_secs(86400)));
        assert!(config.library.video_extensions.contains(&"mkv".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [library]
            roots = ["/mnt/a", "/mnt/b"]

            [thumbnails]
            quality = 65

            [watch]
            interval_secs = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.library.roots.len(), 2);
        assert_eq!(config.thumbnails.quality, 65);
        assert_eq!(config.thumbnails.small_size, 250);
        assert!(config.watch.interval().is_none());
        assert!(config.library.image_extensions.contains(&"jpg".to_string()));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (PHOTO_PATHS_ENV, "/a, /b,,"),
            (CACHE_DIR_ENV, "/var/cache/shelf"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(
            config.library.roots,
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
        assert_eq!(config.db_path(), PathBuf::from("/var/cache/shelf/photoshelf.db"));
        assert_eq!(config.thumbs_dir(), PathBuf::from("/var/cache/shelf/thumbs"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.thumbnails.quality = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pregen.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.thumbnails.medium_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.pregen.batch_delay_ms, 2000);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[thumbnails\nquality = ").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
