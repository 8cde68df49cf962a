//! Image enumeration and API payload preparation.
//!
//! Enumeration walks a directory for supported extensions, skipping hidden
//! and system files, and returns a sorted list of absolute paths (stable
//! processing order is part of the reproducibility contract). Preparation
//! decodes, applies the EXIF orientation, converts to RGB, downscales to
//! the configured limits, and JPEG-encodes at descending quality until the
//! payload fits. The cache key is the SHA-256 of the original file bytes,
//! never of the re-encoded payload.

use crate::config::ImageLimits;
use crate::error::MediaError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::imageops::FilterType;
use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Extensions the enumerator accepts, lower-case.
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "gif", "webp", "heic", "heif"];

/// JPEG quality ladder tried at full resolution.
const QUALITY_LADDER: &[u8] = &[85, 70, 60, 50, 40, 30];

/// Long-edge ladder tried when quality reduction alone is not enough.
const SHRINK_LADDER: &[u32] = &[4000, 3000, 2000, 1600, 1200, 800, 500];

/// An image payload ready for the vision backend.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    /// Base64 of the JPEG-re-encoded pixels.
    pub base64_payload: String,
    /// Media type of the encoded payload.
    pub media_type: &'static str,
    /// SHA-256 of the original file bytes; the cache key.
    pub content_hash: String,
}

/// Whether a file name is a hidden or system artifact to skip silently.
pub fn should_skip(file_name: &str) -> bool {
    file_name.starts_with('.')
        || file_name.starts_with('~')
        || file_name.eq_ignore_ascii_case("Thumbs.db")
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Enumerates supported images under `dir`, sorted by absolute path.
pub fn scan_images(dir: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut paths = Vec::new();

    for entry in WalkDir::new(dir)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if should_skip(&name) {
            continue;
        }
        if !is_supported(entry.path()) {
            continue;
        }
        let absolute = if entry.path().is_absolute() {
            entry.path().to_path_buf()
        } else {
            std::env::current_dir()?.join(entry.path())
        };
        paths.push(absolute);
    }

    paths.sort();
    Ok(paths)
}

/// SHA-256 of a byte slice as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Decodes `path` and produces a size-bounded base64 JPEG payload.
pub fn prepare_for_api(path: &Path, limits: &ImageLimits) -> Result<EncodedImage, MediaError> {
    let bytes = std::fs::read(path).map_err(|source| MediaError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    prepare_bytes(path, &bytes, limits)
}

/// As [`prepare_for_api`], for callers that already hold the file bytes
/// (the engine reads them up front to compute the cache key).
pub fn prepare_bytes(
    path: &Path,
    bytes: &[u8],
    limits: &ImageLimits,
) -> Result<EncodedImage, MediaError> {
    let hash = content_hash(bytes);

    let decoded = decode(path, bytes)?;
    let oriented = apply_orientation(decoded, exif_orientation(bytes));

    let jpeg = encode_bounded(path, oriented, limits)?;
    debug!(
        path = %path.display(),
        payload_bytes = jpeg.len(),
        "prepared image payload"
    );

    Ok(EncodedImage {
        base64_payload: BASE64.encode(&jpeg),
        media_type: "image/jpeg",
        content_hash: hash,
    })
}

fn is_heic(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase()),
        Some(ref ext) if ext == "heic" || ext == "heif"
    )
}

fn decode(path: &Path, bytes: &[u8]) -> Result<DynamicImage, MediaError> {
    if is_heic(path) {
        return decode_heic(path, bytes);
    }
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| MediaError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .decode()
        .map_err(|e| MediaError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

#[cfg(feature = "heic")]
fn decode_heic(path: &Path, bytes: &[u8]) -> Result<DynamicImage, MediaError> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let lib_heif = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(bytes).map_err(|e| MediaError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let handle = ctx.primary_image_handle().map_err(|e| MediaError::Decode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let decoded = lib_heif
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(|e| MediaError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let plane = decoded
        .planes()
        .interleaved
        .ok_or_else(|| MediaError::Decode {
            path: path.to_path_buf(),
            reason: "no interleaved RGB plane".to_string(),
        })?;

    let width = plane.width;
    let height = plane.height;
    let stride = plane.stride;
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for row in 0..height as usize {
        let start = row * stride;
        rgb.extend_from_slice(&plane.data[start..start + (width as usize) * 3]);
    }
    let buffer =
        image::RgbImage::from_raw(width, height, rgb).ok_or_else(|| MediaError::Decode {
            path: path.to_path_buf(),
            reason: "RGB buffer size mismatch".to_string(),
        })?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

#[cfg(not(feature = "heic"))]
fn decode_heic(path: &Path, _bytes: &[u8]) -> Result<DynamicImage, MediaError> {
    Err(MediaError::HeicDisabled(path.to_path_buf()))
}

/// EXIF orientation value (1..=8), or None when absent or unreadable.
fn exif_orientation(bytes: &[u8]) -> Option<u32> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?
        .value
        .get_uint(0)
}

/// Applies the EXIF orientation transform so pixels are upright.
fn apply_orientation(img: DynamicImage, orientation: Option<u32>) -> DynamicImage {
    match orientation {
        Some(2) => img.fliph(),
        Some(3) => img.rotate180(),
        Some(4) => img.flipv(),
        Some(5) => img.rotate90().fliph(),
        Some(6) => img.rotate90(),
        Some(7) => img.rotate270().fliph(),
        Some(8) => img.rotate270(),
        _ => img,
    }
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    // RGB8 drops any alpha channel; JPEG has no use for it.
    DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
    Ok(buf)
}

/// Downscales and re-encodes until the payload fits the limits.
///
/// Tries the quality ladder at the dimension-capped size first, then walks
/// the shrink ladder, re-running the quality ladder at each size. The final
/// rung is small enough that this terminates with a fitting payload for any
/// decodable input.
fn encode_bounded(
    path: &Path,
    img: DynamicImage,
    limits: &ImageLimits,
) -> Result<Vec<u8>, MediaError> {
    let max_bytes = limits.max_payload_bytes();
    let map_err = |e: image::ImageError| MediaError::Encode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut current = if img.width() > limits.max_dimension || img.height() > limits.max_dimension
    {
        img.resize(limits.max_dimension, limits.max_dimension, FilterType::Lanczos3)
    } else {
        img
    };

    for &quality in QUALITY_LADDER {
        let data = encode_jpeg(&current, quality).map_err(map_err)?;
        if data.len() <= max_bytes {
            return Ok(data);
        }
    }

    for &edge in SHRINK_LADDER {
        if edge >= current.width().max(current.height()) {
            continue;
        }
        current = current.resize(edge, edge, FilterType::Lanczos3);
        for &quality in QUALITY_LADDER {
            let data = encode_jpeg(&current, quality).map_err(map_err)?;
            if data.len() <= max_bytes {
                return Ok(data);
            }
        }
    }

    // 200px long edge at the floor quality is a few kilobytes; below any
    // sane payload limit.
    let floor = current.resize(200, 200, FilterType::Lanczos3);
    encode_jpeg(&floor, 20).map_err(map_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid_image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            width,
            height,
            Rgb([120, 40, 200]),
        ))
    }

    #[test]
    fn test_skip_patterns() {
        assert!(should_skip(".DS_Store"));
        assert!(should_skip(".hidden.jpg"));
        assert!(should_skip("~tmp.jpg"));
        assert!(should_skip("Thumbs.db"));
        assert!(should_skip("thumbs.db"));
        assert!(!should_skip("IMG_0001.jpg"));
    }

    #[test]
    fn test_supported_extensions_case_insensitive() {
        assert!(is_supported(Path::new("a/b/photo.JPG")));
        assert!(is_supported(Path::new("photo.heic")));
        assert!(!is_supported(Path::new("notes.txt")));
        assert!(!is_supported(Path::new("noextension")));
    }

    #[test]
    fn test_scan_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.jpg", "a.png", ".hidden.jpg", "c.txt", "Thumbs.db"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/d.webp"), b"x").unwrap();

        let found = scan_images(dir.path(), true).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b.jpg", "d.webp"]);

        let flat = scan_images(dir.path(), false).unwrap();
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn test_content_hash_is_over_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        let img = solid_image(32, 32);
        img.save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let encoded = prepare_for_api(&path, &ImageLimits::default()).unwrap();
        assert_eq!(encoded.content_hash, content_hash(&bytes));
        assert_eq!(encoded.media_type, "image/jpeg");
    }

    #[test]
    fn test_payload_respects_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        solid_image(3000, 2000).save(&path).unwrap();

        let limits = ImageLimits {
            max_dimension: 1000,
            max_payload_mb: 0.05,
        };
        let encoded = prepare_for_api(&path, &limits).unwrap();
        let payload = BASE64.decode(&encoded.base64_payload).unwrap();
        assert!(payload.len() <= limits.max_payload_bytes());
    }

    #[test]
    fn test_unreadable_file_reports_path() {
        let err = prepare_for_api(Path::new("/nonexistent/img.jpg"), &ImageLimits::default())
            .unwrap_err();
        assert!(matches!(err, MediaError::Unreadable { .. }));
    }

    #[test]
    fn test_orientation_rotate90_swaps_dimensions() {
        let img = solid_image(40, 20);
        let rotated = apply_orientation(img, Some(6));
        assert_eq!((rotated.width(), rotated.height()), (20, 40));
    }
}
