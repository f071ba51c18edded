use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::db::MediaType;

/// What the indexer records about a file beyond its path and size.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaMetadata {
    pub taken_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub orientation: u8,
    pub duration: f64,
}

impl MediaMetadata {
    fn fallback(mtime: DateTime<Utc>) -> Self {
        Self {
            taken_at: mtime,
            width: 0,
            height: 0,
            orientation: 1,
            duration: 0.0,
        }
    }
}

/// Extract metadata, starting from the file's modification time and
/// overriding with whatever the embedded data provides. Never fails: an
/// unreadable or tagless image keeps the defaults.
pub fn extract_metadata(path: &Path, media_type: MediaType, mtime: DateTime<Utc>) -> MediaMetadata {
    let mut metadata = MediaMetadata::fallback(mtime);
    if media_type == MediaType::Video {
        return metadata;
    }

    if let Some(exif) = read_exif(path) {
        if let Some(taken_at) = exif_taken_at(&exif) {
            metadata.taken_at = taken_at;
        }
        if let (Some(w), Some(h)) = (
            exif_uint(&exif, exif::Tag::PixelXDimension),
            exif_uint(&exif, exif::Tag::PixelYDimension),
        ) {
            metadata.width = w;
            metadata.height = h;
        }
        metadata.orientation = exif_orientation(&exif);
    }

    if metadata.width == 0 || metadata.height == 0 {
        if let Ok(reader) = image::ImageReader::open(path).and_then(|r| r.with_guessed_format()) {
            if let Ok((w, h)) = reader.into_dimensions() {
                metadata.width = w;
                metadata.height = h;
            }
        }
    }

    metadata
}

pub(crate) fn read_exif(path: &Path) -> Option<exif::Exif> {
    let file = File::open(path).ok()?;
    let mut bufreader = BufReader::new(file);
    exif::Reader::new().read_from_container(&mut bufreader).ok()
}

/// EXIF orientation tag, 1 when missing or out of range.
pub(crate) fn exif_orientation(exif: &exif::Exif) -> u8 {
    match exif_uint(exif, exif::Tag::Orientation) {
        Some(v @ 1..=8) => v as u8,
        _ => 1,
    }
}

fn exif_uint(exif: &exif::Exif, tag: exif::Tag) -> Option<u32> {
    exif.get_field(tag, exif::In::PRIMARY)?.value.get_uint(0)
}

/// Capture time from the first usable of DateTimeOriginal, DateTimeDigitized
/// and DateTime. EXIF times carry no zone and are taken as UTC.
fn exif_taken_at(exif: &exif::Exif) -> Option<DateTime<Utc>> {
    [
        exif::Tag::DateTimeOriginal,
        exif::Tag::DateTimeDigitized,
        exif::Tag::DateTime,
    ]
    .into_iter()
    .find_map(|tag| {
        let field = exif.get_field(tag, exif::In::PRIMARY)?;
        match field.value {
            exif::Value::Ascii(ref vec) => vec.first().and_then(|raw| parse_exif_datetime(raw)),
            _ => None,
        }
    })
}

fn parse_exif_datetime(raw: &[u8]) -> Option<DateTime<Utc>> {
    let dt = exif::DateTime::from_ascii(raw).ok()?;
    // Cameras without a set clock write all zeros.
    if dt.year == 0 {
        return None;
    }
    let naive = NaiveDate::from_ymd_opt(dt.year as i32, dt.month as u32, dt.day as u32)?
        .and_hms_opt(dt.hour as u32, dt.minute as u32, dt.second as u32)?;
    Some(Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use tempfile::tempdir;

    fn mtime() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 6, 1, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_parse_exif_datetime() {
        assert_eq!(
            parse_exif_datetime(b"2024:02:10 14:03:59"),
            Some(Utc.with_ymd_and_hms(2024, 2, 10, 14, 3, 59).unwrap())
        );
        assert_eq!(parse_exif_datetime(b"0000:00:00 00:00:00"), None);
        assert_eq!(parse_exif_datetime(b"not a date"), None);
        assert_eq!(parse_exif_datetime(b"2024:13:40 10:00:00"), None);
    }

    #[test]
    fn test_video_uses_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"not really a video").unwrap();

        let meta = extract_metadata(&path, MediaType::Video, mtime());
        assert_eq!(meta, MediaMetadata::fallback(mtime()));
    }

    #[test]
    fn test_image_without_exif_uses_header_dimensions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.png");
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(40, 30, Rgb([10, 20, 30]));
        img.save(&path).unwrap();

        let meta = extract_metadata(&path, MediaType::Image, mtime());
        assert_eq!(meta.taken_at, mtime());
        assert_eq!((meta.width, meta.height), (40, 30));
        assert_eq!(meta.orientation, 1);
    }

    #[test]
    fn test_unreadable_image_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"garbage bytes").unwrap();

        let meta = extract_metadata(&path, MediaType::Image, mtime());
        assert_eq!(meta, MediaMetadata::fallback(mtime()));
    }
}
