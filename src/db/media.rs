use anyhow::Result;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;
use std::path::Path;

use super::{encode_ts, decode_ts, media_from_row, Database, MediaRecord, MediaType, NewMedia, MEDIA_COLUMNS};

/// Aggregate counts for the whole library.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LibraryStats {
    pub total_photos: u64,
    pub total_videos: u64,
    pub total_size: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// A catalog entry as seen by thumbnail pregeneration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PregenItem {
    pub path: String,
    pub media_type: MediaType,
}

impl Database {
    /// Insert a record, or overwrite every field of the record with the same
    /// path. Returns the row id, which is stable across updates.
    pub fn upsert_media(&self, media: &NewMedia) -> Result<i64> {
        let path_str = media.path.to_string_lossy();
        let id = self.conn().query_row(
            r#"
            INSERT INTO media (
                path, filename, taken_at, width, height, orientation,
                media_type, file_size, duration, indexed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                filename = excluded.filename,
                taken_at = excluded.taken_at,
                width = excluded.width,
                height = excluded.height,
                orientation = excluded.orientation,
                media_type = excluded.media_type,
                file_size = excluded.file_size,
                duration = excluded.duration,
                indexed_at = excluded.indexed_at
            RETURNING id
            "#,
            rusqlite::params![
                path_str.as_ref(),
                media.filename,
                encode_ts(&media.taken_at),
                media.width as i64,
                media.height as i64,
                media.orientation as i64,
                media.media_type.as_str(),
                media.file_size as i64,
                media.duration,
                encode_ts(&media.indexed_at),
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn media_exists(&self, path: &Path) -> Result<bool> {
        let path_str = path.to_string_lossy();
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM media WHERE path = ?",
            [path_str.as_ref()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn get_media(&self, id: i64) -> Result<Option<MediaRecord>> {
        let result = self.conn().query_row(
            &format!("SELECT {MEDIA_COLUMNS} FROM media WHERE id = ?"),
            [id],
            media_from_row,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn count_media(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM media", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Every path with its media type, newest first.
    pub fn all_pregen_items(&self) -> Result<Vec<PregenItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT path, media_type FROM media ORDER BY taken_at DESC, id DESC",
        )?;
        let items = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(path, kind)| match kind.parse() {
                Ok(media_type) => Some(PregenItem { path, media_type }),
                Err(e) => {
                    tracing::warn!("Skipping {} in pregen list: {}", path, e);
                    None
                }
            })
            .collect();
        Ok(items)
    }

    /// Records captured within `[start, end]`, newest first, plus the total
    /// number of matches.
    pub fn media_in_range(
        &self,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<MediaRecord>, u64)> {
        let (start, end) = (encode_ts(start), encode_ts(end));
        let conn = self.conn();

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM media WHERE taken_at BETWEEN ? AND ?",
            [&start, &end],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {MEDIA_COLUMNS} FROM media
            WHERE taken_at BETWEEN ? AND ?
            ORDER BY taken_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#
        ))?;
        let records = stmt
            .query_map(
                rusqlite::params![start, end, limit as i64, offset as i64],
                media_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((records, total as u64))
    }

    /// One random record from each year 5, 10, 15... years before `now`,
    /// oldest first. Years without media are skipped.
    pub fn memories(&self, now: DateTime<Utc>, max_count: usize) -> Result<Vec<MediaRecord>> {
        let max_count = if max_count == 0 { 5 } else { max_count };
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {MEDIA_COLUMNS} FROM media
            WHERE taken_at BETWEEN ? AND ?
            ORDER BY RANDOM()
            LIMIT 1
            "#
        ))?;

        let mut memories = Vec::new();
        for step in 1..=max_count as i32 {
            let year = now.year() - step * 5;
            if year < 1900 {
                break;
            }
            let (Some(start), Some(end)) = (
                Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single(),
                Utc.with_ymd_and_hms(year, 12, 31, 23, 59, 59).single(),
            ) else {
                continue;
            };

            match stmt.query_row([encode_ts(&start), encode_ts(&end)], media_from_row) {
                Ok(record) => memories.push(record),
                Err(rusqlite::Error::QueryReturnedNoRows) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        memories.reverse();
        Ok(memories)
    }

    /// Delete records whose file is gone from disk. Paths that cannot be
    /// stat'ed for other reasons (e.g. an unmounted share returning EACCES)
    /// are kept.
    pub fn remove_missing(&self) -> Result<usize> {
        // Stat outside the lock; remote trees can be slow.
        let rows: Vec<(i64, String)> = {
            let conn = self.conn();
            let mut stmt = conn.prepare("SELECT id, path FROM media")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect::<Vec<_>>();
            rows
        };

        let missing: Vec<i64> = rows
            .into_iter()
            .filter(|(_, path)| {
                matches!(
                    std::fs::symlink_metadata(path),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound
                )
            })
            .map(|(id, _)| id)
            .collect();

        if missing.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM media WHERE id = ?")?;
            for id in &missing {
                removed += stmt.execute([id])?;
            }
        }
        tx.commit()?;

        Ok(removed)
    }

    /// Delete records for hidden files that earlier scans picked up.
    pub fn remove_dotfiles(&self) -> Result<usize> {
        let removed = self
            .conn()
            .execute("DELETE FROM media WHERE filename LIKE '.%'", [])?;
        Ok(removed)
    }

    pub fn stats(&self) -> Result<LibraryStats> {
        let conn = self.conn();
        let (photos, videos, size, oldest, newest) = conn.query_row(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN media_type = 'image' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN media_type = 'video' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(file_size), 0),
                MIN(taken_at),
                MAX(taken_at)
            FROM media
            "#,
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            },
        )?;

        Ok(LibraryStats {
            total_photos: photos as u64,
            total_videos: videos as u64,
            total_size: size as u64,
            oldest: oldest.map(|s| decode_ts(3, &s)).transpose()?,
            newest: newest.map(|s| decode_ts(4, &s)).transpose()?,
        })
    }
}
