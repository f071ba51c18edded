//! Date-ordered paging and month summaries.
//!
//! Both views key months the same way (`YYYY-MM` of the UTC capture time)
//! and order newest-first, so an offset into the timeline can be mapped to
//! a month bucket and back without fetching the pages in between.

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;

use super::{media_from_row, Database, MediaRecord, MEDIA_COLUMNS};

/// Records of one calendar month within a single page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineGroup {
    /// `YYYY-MM`
    pub date: String,
    /// e.g. `January 2024`
    pub label: String,
    pub count: usize,
    pub photos: Vec<MediaRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelinePage {
    pub groups: Vec<TimelineGroup>,
    pub total_count: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthBucket {
    /// `YYYY-MM`
    pub month: String,
    pub label: String,
    pub count: u64,
    /// Number of records in all strictly newer months.
    pub cumulative_offset: u64,
}

pub fn month_key(ts: &DateTime<Utc>) -> String {
    format!("{:04}-{:02}", ts.year(), ts.month())
}

pub fn month_label(year: i32, month: u32) -> String {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|d| d.format("%B %Y").to_string())
        .unwrap_or_else(|| format!("{year:04}-{month:02}"))
}

fn label_for_key(key: &str) -> String {
    let parsed = key
        .split_once('-')
        .and_then(|(y, m)| Some((y.parse::<i32>().ok()?, m.parse::<u32>().ok()?)));
    match parsed {
        Some((year, month)) => month_label(year, month),
        None => key.to_string(),
    }
}

/// Group an already newest-first page by month, keeping encounter order.
/// Only adjacent records are merged; a month that spans a page boundary
/// shows up in both pages.
pub fn group_by_month(records: Vec<MediaRecord>) -> Vec<TimelineGroup> {
    let mut groups: Vec<TimelineGroup> = Vec::new();

    for record in records {
        let key = month_key(&record.taken_at);
        match groups.last_mut() {
            Some(group) if group.date == key => {
                group.count += 1;
                group.photos.push(record);
            }
            _ => {
                let label = month_label(record.taken_at.year(), record.taken_at.month());
                groups.push(TimelineGroup {
                    date: key,
                    label,
                    count: 1,
                    photos: vec![record],
                });
            }
        }
    }

    groups
}

/// Annotate per-month counts (newest first) with running offsets.
pub fn accumulate_buckets(months: Vec<(String, u64)>) -> Vec<MonthBucket> {
    let mut cumulative = 0;
    months
        .into_iter()
        .map(|(month, count)| {
            let bucket = MonthBucket {
                label: label_for_key(&month),
                month,
                count,
                cumulative_offset: cumulative,
            };
            cumulative += count;
            bucket
        })
        .collect()
}

impl Database {
    /// One page of the timeline, newest first, grouped by month.
    pub fn get_timeline(&self, offset: usize, limit: usize) -> Result<TimelinePage> {
        let conn = self.conn();

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM media", [], |row| row.get(0))?;

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {MEDIA_COLUMNS} FROM media
            ORDER BY taken_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#
        ))?;

        // A row that fails to decode is logged and left out rather than
        // failing the whole page.
        let records: Vec<MediaRecord> = stmt
            .query_map([limit as i64, offset as i64], media_from_row)?
            .filter_map(|r| match r {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!("Skipping unreadable timeline row: {}", e);
                    None
                }
            })
            .collect();

        let total_count = total as u64;
        Ok(TimelinePage {
            groups: group_by_month(records),
            total_count,
            has_more: (offset as u64).saturating_add(limit as u64) < total_count,
        })
    }

    /// Per-month counts for every month with at least one record.
    pub fn month_buckets(&self) -> Result<Vec<MonthBucket>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT substr(taken_at, 1, 7) AS month, COUNT(*) AS cnt
            FROM media
            GROUP BY month
            ORDER BY month DESC
            "#,
        )?;
        let months = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(accumulate_buckets(months))
    }
}
