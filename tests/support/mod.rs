//! Fixture builders shared by the integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use photoshelf::config::Config;
use photoshelf::thumbnails::Thumbnailer;
use photoshelf::{Database, Library};

/// Config rooted in `dir`: photos under `dir/photos`, cache under `dir/cache`.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.library.roots = vec![dir.join("photos")];
    config.cache.dir = dir.join("cache");
    config.pregen.batch_delay_ms = 1;
    config
}

/// A library with video support switched off, so results do not depend on
/// whether ffmpeg is installed.
pub fn open_library(config: Config) -> Library {
    let db = Database::open(&config.db_path()).unwrap();
    db.initialize().unwrap();
    Library::from_parts(config.clone(), Arc::new(db), Arc::new(thumbnailer(&config)))
}

pub fn thumbnailer(config: &Config) -> Thumbnailer {
    Thumbnailer::new(config.thumbs_dir(), &config.thumbnails)
        .unwrap()
        .with_ffmpeg(None)
}

fn jpeg_bytes(w: u32, h: u32) -> Vec<u8> {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
        ImageBuffer::from_fn(w, h, |x, y| Rgb([(x * 7) as u8, (y * 5) as u8, 90]));
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 85)
        .encode_image(&img)
        .unwrap();
    out
}

/// Little-endian TIFF holding IFD0 (optional Orientation, Exif pointer) and
/// an Exif IFD with DateTimeOriginal.
fn tiff_block(datetime: &str, orientation: Option<u16>) -> Vec<u8> {
    let mut ifd0_entries: Vec<[u8; 12]> = Vec::new();
    if let Some(o) = orientation {
        let mut e = [0u8; 12];
        e[0..2].copy_from_slice(&0x0112u16.to_le_bytes());
        e[2..4].copy_from_slice(&3u16.to_le_bytes());
        e[4..8].copy_from_slice(&1u32.to_le_bytes());
        e[8..10].copy_from_slice(&o.to_le_bytes());
        ifd0_entries.push(e);
    }
    let ifd0_len = 2 + 12 * (ifd0_entries.len() + 1) + 4;
    let exif_ifd_offset = 8 + ifd0_len as u32;
    let exif_ifd_len = 2 + 12 + 4;
    let data_offset = exif_ifd_offset + exif_ifd_len;

    let mut pointer = [0u8; 12];
    pointer[0..2].copy_from_slice(&0x8769u16.to_le_bytes());
    pointer[2..4].copy_from_slice(&4u16.to_le_bytes());
    pointer[4..8].copy_from_slice(&1u32.to_le_bytes());
    pointer[8..12].copy_from_slice(&exif_ifd_offset.to_le_bytes());
    ifd0_entries.push(pointer);

    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"II");
    tiff.extend_from_slice(&42u16.to_le_bytes());
    tiff.extend_from_slice(&8u32.to_le_bytes());

    tiff.extend_from_slice(&(ifd0_entries.len() as u16).to_le_bytes());
    for entry in &ifd0_entries {
        tiff.extend_from_slice(entry);
    }
    tiff.extend_from_slice(&0u32.to_le_bytes());

    let mut value = datetime.as_bytes().to_vec();
    value.push(0);
    assert_eq!(value.len(), 20, "EXIF datetime must be YYYY:MM:DD HH:MM:SS");

    tiff.extend_from_slice(&1u16.to_le_bytes());
    tiff.extend_from_slice(&0x9003u16.to_le_bytes());
    tiff.extend_from_slice(&2u16.to_le_bytes());
    tiff.extend_from_slice(&(value.len() as u32).to_le_bytes());
    tiff.extend_from_slice(&data_offset.to_le_bytes());
    tiff.extend_from_slice(&0u32.to_le_bytes());

    assert_eq!(tiff.len() as u32, data_offset);
    tiff.extend_from_slice(&value);
    tiff
}

/// Write a JPEG carrying an EXIF capture time (`YYYY:MM:DD HH:MM:SS`).
pub fn write_exif_jpeg(path: &Path, datetime: &str, orientation: Option<u16>) {
    let jpeg = jpeg_bytes(64, 48);
    let tiff = tiff_block(datetime, orientation);

    let mut app1 = vec![0xFF, 0xE1];
    app1.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
    app1.extend_from_slice(b"Exif\0\0");
    app1.extend_from_slice(&tiff);

    let mut out = Vec::with_capacity(jpeg.len() + app1.len());
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&app1);
    out.extend_from_slice(&jpeg[2..]);
    std::fs::write(path, out).unwrap();
}

pub fn write_png(path: &Path, w: u32, h: u32) {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(w, h, Rgb([40, 80, 120]));
    img.save(path).unwrap();
}

/// A file with video extension and a chosen modification time.
pub fn write_video(path: &Path, mtime: DateTime<Utc>) {
    std::fs::write(path, b"\x00\x00\x00\x18ftypmp42").unwrap();
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::from(mtime)).unwrap();
}

pub fn photos_dir(dir: &Path) -> PathBuf {
    let photos = dir.join("photos");
    std::fs::create_dir_all(&photos).unwrap();
    photos
}
