use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub const FAILURE_FILE: &str = "fail_cache.txt";

/// Source paths whose thumbnail generation failed before. Held in memory
/// behind a read/write lock and appended to a text file, one path per line,
/// so failures survive a restart.
#[derive(Debug)]
pub struct FailureMemo {
    file: PathBuf,
    paths: RwLock<HashSet<String>>,
}

impl FailureMemo {
    /// Load the memo from `file`. A missing or unreadable file starts empty.
    pub fn load(file: PathBuf) -> Self {
        let paths = match fs::read_to_string(&file) {
            Ok(content) => content
                .lines()
                .map(|l| l.trim_end_matches(['\r', '\n']))
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Could not read failure memo {}: {}", file.display(), e);
                }
                HashSet::new()
            }
        };
        if !paths.is_empty() {
            tracing::info!(count = paths.len(), "Loaded thumbnail failure memo");
        }
        Self {
            file,
            paths: RwLock::new(paths),
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path)
    }

    /// Record a failure. Already-known paths are not appended again.
    pub fn record(&self, path: &str) {
        let mut paths = self.paths.write().unwrap_or_else(|e| e.into_inner());
        if !paths.insert(path.to_string()) {
            return;
        }
        if let Err(e) = self.append(path) {
            tracing::warn!("Could not persist failure for {}: {}", path, e);
        }
    }

    fn append(&self, path: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file)?;
        writeln!(file, "{path}")
    }

    pub fn len(&self) -> usize {
        self.paths.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn file(&self) -> &Path {
        &self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_persists_across_loads() {
        let dir = tempdir().unwrap();
        let file = dir.path().join(FAILURE_FILE);

        let memo = FailureMemo::load(file.clone());
        assert!(memo.is_empty());
        memo.record("/photos/broken.jpg");
        memo.record("/photos/broken.jpg");
        memo.record("/photos/also broken.png");
        assert!(memo.contains("/photos/broken.jpg"));
        assert_eq!(memo.len(), 2);

        let content = fs::read_to_string(&file).unwrap();
        assert_eq!(content.lines().count(), 2);

        let reloaded = FailureMemo::load(file);
        assert!(reloaded.contains("/photos/also broken.png"));
        assert!(!reloaded.contains("/photos/fine.jpg"));
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_surrounding_whitespace_survives_reload() {
        let dir = tempdir().unwrap();
        let file = dir.path().join(FAILURE_FILE);

        FailureMemo::load(file.clone()).record(" /photos/padded name.jpg ");
        let reloaded = FailureMemo::load(file.clone());
        assert!(reloaded.contains(" /photos/padded name.jpg "));

        // Files edited on Windows.
        fs::write(&file, "/photos/a.jpg\r\n/photos/b.jpg\r\n").unwrap();
        let crlf = FailureMemo::load(file);
        assert!(crlf.contains("/photos/a.jpg"));
        assert!(crlf.contains("/photos/b.jpg"));
        assert_eq!(crlf.len(), 2);
    }
}
