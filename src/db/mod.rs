//! Metadata catalog backed by SQLite.
//!
//! A single connection sits behind a mutex, so all reads and writes are
//! serialized. The scanner, the pregeneration engine and request-serving
//! callers share one `Database` through an `Arc`.

mod schema;
pub mod media;
pub mod timeline;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub use media::{LibraryStats, PregenItem};
pub use schema::SCHEMA;
pub use timeline::{MonthBucket, TimelineGroup, TimelinePage};

/// Kind of media a catalog row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "image" => Ok(MediaType::Image),
            "video" => Ok(MediaType::Video),
            other => anyhow::bail!("unknown media type: {other}"),
        }
    }
}

/// One indexed file as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaRecord {
    pub id: i64,
    pub path: String,
    pub filename: String,
    pub taken_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub orientation: u8,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub file_size: u64,
    /// Seconds, zero for images.
    pub duration: f64,
    pub indexed_at: DateTime<Utc>,
}

/// Fields written by an upsert; the catalog assigns the id.
#[derive(Debug, Clone)]
pub struct NewMedia {
    pub path: PathBuf,
    pub filename: String,
    pub taken_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub orientation: u8,
    pub media_type: MediaType,
    pub file_size: u64,
    pub duration: f64,
    pub indexed_at: DateTime<Utc>,
}

pub(crate) const MEDIA_COLUMNS: &str =
    "id, path, filename, taken_at, width, height, orientation, media_type, file_size, duration, indexed_at";

pub(crate) fn media_from_row(row: &Row<'_>) -> rusqlite::Result<MediaRecord> {
    let taken_at: String = row.get(3)?;
    let media_type: String = row.get(7)?;
    let indexed_at: String = row.get(10)?;

    Ok(MediaRecord {
        id: row.get(0)?,
        path: row.get(1)?,
        filename: row.get(2)?,
        taken_at: decode_ts(3, &taken_at)?,
        width: row.get::<_, i64>(4)?.max(0) as u32,
        height: row.get::<_, i64>(5)?.max(0) as u32,
        orientation: row.get::<_, i64>(6)?.clamp(1, 8) as u8,
        media_type: media_type.parse().map_err(|e: anyhow::Error| {
            rusqlite::Error::FromSqlConversionFailure(7, Type::Text, e.into())
        })?,
        file_size: row.get::<_, i64>(8)?.max(0) as u64,
        duration: row.get(9)?,
        indexed_at: decode_ts(10, &indexed_at)?,
    })
}

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that
/// lexical order matches chronological order.
pub(crate) fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn decode_ts(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;

        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_millis(5000))?;
        tracing::debug!(journal_mode = %mode, "Opened catalog at {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Lock the connection. A panic while holding the lock leaves SQLite in
    /// a consistent state, so poisoning is ignored.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_roundtrip_and_ordering() {
        let a = test_util::utc(2023, 1, 5);
        let b = test_util::utc(2023, 11, 20);
        let (ea, eb) = (encode_ts(&a), encode_ts(&b));
        assert_eq!(ea, "2023-01-05T12:00:00Z");
        assert!(ea < eb);
        assert_eq!(decode_ts(0, &ea).unwrap(), a);
        assert!(decode_ts(0, "yesterday").is_err());
    }

    #[test]
    fn test_media_type_parse() {
        assert_eq!("video".parse::<MediaType>().unwrap(), MediaType::Video);
        assert_eq!(MediaType::Image.to_string(), "image");
        assert!("audio".parse::<MediaType>().is_err());
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/cache/photoshelf.db");
        let db = Database::open(&path).unwrap();
        db.initialize().unwrap();
        assert!(path.exists());
    }
}
