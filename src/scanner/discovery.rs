use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::db::MediaType;

/// File names that are never media, compared case-insensitively.
const JUNK_NAMES: &[&str] = &["thumbs.db", "desktop.ini", ".ds_store"];

/// Hidden files, sync-client temporaries (`.pending-*`, `.trashed-*`) and
/// OS junk are never indexed.
pub fn should_skip_file(name: &str) -> bool {
    if name.starts_with('.') {
        return true;
    }
    let lower = name.to_lowercase();
    JUNK_NAMES.contains(&lower.as_str())
}

/// Extensions recognised as images or videos, lowercase without the dot.
#[derive(Debug, Clone, Default)]
pub struct MediaExtensions {
    pub images: Vec<String>,
    pub videos: Vec<String>,
}

impl MediaExtensions {
    pub fn new(images: &[String], videos: &[String]) -> Self {
        Self {
            images: images.iter().map(|e| normalize(e)).collect(),
            videos: videos.iter().map(|e| normalize(e)).collect(),
        }
    }

    pub fn classify(&self, path: &Path) -> Option<MediaType> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        if self.images.iter().any(|e| *e == ext) {
            Some(MediaType::Image)
        } else if self.videos.iter().any(|e| *e == ext) {
            Some(MediaType::Video)
        } else {
            None
        }
    }
}

fn normalize(ext: &str) -> String {
    ext.trim_start_matches('.').to_lowercase()
}

/// A qualifying file found during a walk.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub path: PathBuf,
    pub filename: String,
    pub media_type: MediaType,
}

/// Walk `root`, yielding regular media files. Unreadable entries and
/// directories are logged and skipped so one bad subtree never stops the walk.
pub fn walk_media<'a>(
    root: &Path,
    extensions: &'a MediaExtensions,
) -> impl Iterator<Item = MediaFile> + 'a {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(move |entry| {
            let filename = entry.file_name().to_string_lossy().to_string();
            if should_skip_file(&filename) {
                return None;
            }
            let media_type = extensions.classify(entry.path())?;
            Some(MediaFile {
                path: entry.into_path(),
                filename,
                media_type,
            })
        })
}
