//! Capture-instant extraction.
//!
//! Sources, in order: EXIF `DateTimeOriginal` (with `SubSecTimeOriginal`
//! when present, giving millisecond resolution), then the
//! `user.photosort.capture_time` extended attribute (RFC 3339) that our
//! re-processing workflows stamp on files whose EXIF was stripped, then
//! nothing. Filesystem mtime is never consulted: re-processing rewrites it,
//! and a wrong instant silently corrupts timestamp-priority clustering.

use chrono::{DateTime, NaiveDate, Utc};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::trace;

/// Extended attribute holding a preserved capture time, RFC 3339.
#[cfg(unix)]
pub const CAPTURE_TIME_XATTR: &str = "user.photosort.capture_time";

/// Best-effort capture instant for an image file.
///
/// EXIF timestamps carry no zone; they are interpreted as UTC. Clustering
/// only compares instants from the same shoot, so a constant offset is
/// harmless.
pub fn capture_instant(path: &Path) -> Option<DateTime<Utc>> {
    if let Some(instant) = from_exif(path) {
        trace!(path = %path.display(), %instant, "capture instant from EXIF");
        return Some(instant);
    }
    if let Some(instant) = from_xattr(path) {
        trace!(path = %path.display(), %instant, "capture instant from xattr");
        return Some(instant);
    }
    None
}

fn from_exif(path: &Path) -> Option<DateTime<Utc>> {
    let file = File::open(path).ok()?;
    let exif = exif::Reader::new()
        .read_from_container(&mut BufReader::new(&file))
        .ok()?;

    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    let ascii = match &field.value {
        exif::Value::Ascii(vecs) => vecs.first()?,
        _ => return None,
    };
    let dt = exif::DateTime::from_ascii(ascii).ok()?;

    let millis = exif
        .get_field(exif::Tag::SubSecTimeOriginal, exif::In::PRIMARY)
        .and_then(|f| match &f.value {
            exif::Value::Ascii(vecs) => vecs.first().map(|v| subsec_millis(v)),
            _ => None,
        })
        .unwrap_or(0);

    let naive = NaiveDate::from_ymd_opt(
        i32::from(dt.year),
        u32::from(dt.month),
        u32::from(dt.day),
    )?
    .and_hms_milli_opt(
        u32::from(dt.hour),
        u32::from(dt.minute),
        u32::from(dt.second),
        millis,
    )?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// "3" → 300 ms, "345" → 345 ms, "3456" → 345 ms.
fn subsec_millis(ascii: &[u8]) -> u32 {
    let digits: Vec<u32> = ascii
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .take(3)
        .map(|b| u32::from(b - b'0'))
        .collect();
    let mut millis = 0;
    for (i, d) in digits.iter().enumerate() {
        millis += d * 10u32.pow(2 - i as u32);
    }
    millis
}

#[cfg(unix)]
fn from_xattr(path: &Path) -> Option<DateTime<Utc>> {
    let raw = xattr::get(path, CAPTURE_TIME_XATTR).ok()??;
    let text = std::str::from_utf8(&raw).ok()?;
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(not(unix))]
fn from_xattr(_path: &Path) -> Option<DateTime<Utc>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsec_millis() {
        assert_eq!(subsec_millis(b"3"), 300);
        assert_eq!(subsec_millis(b"34"), 340);
        assert_eq!(subsec_millis(b"345"), 345);
        assert_eq!(subsec_millis(b"3456"), 345);
        assert_eq!(subsec_millis(b""), 0);
    }

    #[test]
    fn test_no_metadata_yields_none_not_mtime() {
        // A plain file has an mtime but no capture metadata; the extractor
        // must return None rather than fall back to it.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.jpg");
        std::fs::write(&path, b"not really a jpeg").unwrap();
        assert_eq!(capture_instant(&path), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_xattr_fallback_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stamped.jpg");
        std::fs::write(&path, b"pixels").unwrap();

        let stamped = "2024-02-11T14:23:45.300Z";
        if xattr::set(&path, CAPTURE_TIME_XATTR, stamped.as_bytes()).is_err() {
            // Filesystem without user xattr support; nothing to assert.
            return;
        }

        let instant = capture_instant(&path).unwrap();
        assert_eq!(instant.to_rfc3339(), "2024-02-11T14:23:45.300+00:00");
    }
}
