use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::{BufReader, Write};
use std::ops::Deref;
use std::path::Path;
use tempfile::NamedTempFile;

use super::ThumbnailError;
use crate::scanner::metadata::{exif_orientation, read_exif};

/// Decode `path` and rotate/flip it upright according to its EXIF
/// orientation. Falls back to decoding by file extension when content
/// sniffing picks a decoder that fails.
pub fn load_oriented(path: &Path) -> Result<DynamicImage, ThumbnailError> {
    let reader = image::ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| ThumbnailError::Open(e.to_string()))?;

    let img = match reader.decode() {
        Ok(img) => img,
        Err(primary) => {
            tracing::debug!(path = %path.display(), "Primary decode failed, trying by extension: {}", primary);
            decode_by_extension(path).map_err(|_| ThumbnailError::Decode(primary.to_string()))?
        }
    };

    let orientation = read_exif(path).map(|e| exif_orientation(&e)).unwrap_or(1);
    Ok(apply_orientation(img, orientation))
}

fn decode_by_extension(path: &Path) -> Result<DynamicImage, ThumbnailError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let format = match ext.as_str() {
        "jpg" | "jpeg" => ImageFormat::Jpeg,
        "png" => ImageFormat::Png,
        "gif" => ImageFormat::Gif,
        "bmp" => ImageFormat::Bmp,
        "tif" | "tiff" => ImageFormat::Tiff,
        "webp" => ImageFormat::WebP,
        other => return Err(ThumbnailError::Decode(format!("no decoder for .{other}"))),
    };
    let file = std::fs::File::open(path).map_err(|e| ThumbnailError::Open(e.to_string()))?;
    image::load(BufReader::new(file), format).map_err(|e| ThumbnailError::Decode(e.to_string()))
}

/// Map an EXIF orientation (1-8) to the transform that makes the image upright.
pub fn apply_orientation(img: DynamicImage, orientation: u8) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Scale down to fit a `max` x `max` box, keeping aspect ratio. Images
/// already inside the box are left alone.
pub fn fit(img: DynamicImage, max: u32) -> Result<DynamicImage, ThumbnailError> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Err(ThumbnailError::Resize(format!("image has no pixels ({w}x{h})")));
    }
    if w <= max && h <= max {
        return Ok(img);
    }
    Ok(img.resize(max, max, FilterType::Lanczos3))
}

/// Lossy WebP at `quality` (0-100).
pub fn encode_webp(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ThumbnailError> {
    // The encoder only accepts 8-bit RGB or RGBA.
    let converted = if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    };
    let encoder = webp::Encoder::from_image(&converted)
        .map_err(|reason| ThumbnailError::Encode(reason.to_string()))?;
    let memory = encoder.encode(quality as f32);
    if memory.is_empty() {
        return Err(ThumbnailError::Encode("encoder produced no data".to_string()));
    }
    Ok(memory.deref().to_owned())
}

/// Write `bytes` to `dest` through a temp file in the same directory, so
/// readers never see a partial thumbnail.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), ThumbnailError> {
    let dir = dest
        .parent()
        .ok_or_else(|| ThumbnailError::Write(format!("{} has no parent", dest.display())))?;
    std::fs::create_dir_all(dir).map_err(|e| ThumbnailError::Write(e.to_string()))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ThumbnailError::Write(e.to_string()))?;
    tmp.write_all(bytes)
        .map_err(|e| ThumbnailError::Write(e.to_string()))?;
    tmp.persist(dest)
        .map_err(|e| ThumbnailError::Write(e.error.to_string()))?;
    Ok(())
}

/// Decode, orient, scale and encode `src` into `dest`.
pub fn render_image(src: &Path, dest: &Path, max: u32, quality: u8) -> Result<(), ThumbnailError> {
    let img = load_oriented(src)?;
    let thumb = fit(img, max)?;
    let bytes = encode_webp(&thumb, quality)?;
    write_atomic(dest, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, RgbImage};
    use tempfile::tempdir;

    fn marked(w: u32, h: u32) -> DynamicImage {
        // Red top-left pixel, everything else black.
        let mut img: RgbImage = ImageBuffer::new(w, h);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        DynamicImage::ImageRgb8(img)
    }

    fn red_at(img: &DynamicImage) -> (u32, u32) {
        let rgb = img.to_rgb8();
        let (x, y, _) = rgb
            .enumerate_pixels()
            .find(|(_, _, p)| p.0 == [255, 0, 0])
            .unwrap();
        (x, y)
    }

    #[test]
    fn test_apply_orientation() {
        let img = marked(4, 2);
        assert_eq!(red_at(&apply_orientation(img.clone(), 1)), (0, 0));
        assert_eq!(red_at(&apply_orientation(img.clone(), 2)), (3, 0));
        assert_eq!(red_at(&apply_orientation(img.clone(), 3)), (3, 1));
        assert_eq!(red_at(&apply_orientation(img.clone(), 4)), (0, 1));

        // Quarter turns swap the axes.
        let six = apply_orientation(img.clone(), 6);
        assert_eq!(six.dimensions(), (2, 4));
        assert_eq!(red_at(&six), (1, 0));
        let eight = apply_orientation(img.clone(), 8);
        assert_eq!(red_at(&eight), (0, 3));
        assert_eq!(red_at(&apply_orientation(img.clone(), 5)), (0, 0));
        assert_eq!(red_at(&apply_orientation(img, 7)), (1, 3));
    }

    #[test]
    fn test_fit_never_upscales() {
        let small = fit(marked(100, 50), 250).unwrap();
        assert_eq!(small.dimensions(), (100, 50));

        let wide = fit(marked(1000, 500), 250).unwrap();
        assert_eq!(wide.dimensions(), (250, 125));

        let tall = fit(marked(300, 900), 600).unwrap();
        assert_eq!(tall.dimensions(), (200, 600));
    }

    #[test]
    fn test_fit_rejects_empty() {
        let empty = DynamicImage::ImageRgb8(ImageBuffer::new(0, 0));
        assert!(matches!(fit(empty, 250), Err(ThumbnailError::Resize(_))));
    }

    #[test]
    fn test_render_image_writes_webp() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("photo.png");
        marked(800, 400).save(&src).unwrap();
        let dest = dir.path().join("ab/cd/thumb.webp");

        render_image(&src, &dest, 250, 80).unwrap();

        let thumb = image::open(&dest).unwrap();
        assert_eq!(thumb.dimensions(), (250, 125));
        let bytes = std::fs::read(&dest).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WEBP");
    }

    #[test]
    fn test_decode_failure_names_stage() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("broken.jpg");
        std::fs::write(&src, b"\xFF\xD8\xFF\xE0 definitely not a jpeg").unwrap();

        let err = render_image(&src, &dir.path().join("out.webp"), 250, 80).unwrap_err();
        assert!(matches!(err, ThumbnailError::Decode(_)), "got {err:?}");

        let missing = render_image(&dir.path().join("gone.jpg"), &dir.path().join("x.webp"), 250, 80)
            .unwrap_err();
        assert!(matches!(missing, ThumbnailError::Open(_)));
    }
}
