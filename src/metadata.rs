//! Image metadata extraction and resolution.
//!
//! The pipeline needs two facts from a photo's embedded metadata:
//!
//! - **Orientation**: EXIF `Orientation` (tag 0x0112). Values 6, 3 and 8 mean
//!   the pixels must be turned 90°, 180° and 270° clockwise to stand upright.
//!   Mirrored orientations (2, 4, 5, 7) are treated as upright.
//!
//! - **Capture date**: EXIF `DateTime`, `DateTimeOriginal` and
//!   `DateTimeDigitized`, all in the `YYYY:MM:DD HH:MM:SS` form.
//!
//! ## Resolution priority
//!
//! The watermark date is the first of these that holds a valid calendar date:
//!
//! ```text
//! date: resolve(&[DateTime, DateTimeOriginal, DateTimeDigitized]) → file modified time → None
//! ```
//!
//! Only the date part is kept and rendered as `YYYY-MM-DD`, so
//! `2020:09:09 10:11:12` becomes `2020-09-09`. Placeholder dates such as
//! `0000:00:00 00:00:00` are skipped.

use crate::imaging::{ImageSource, Rotation};
use chrono::{DateTime, Local, NaiveDate};
use std::time::SystemTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("EXIF error: {0}")]
    Exif(#[from] exif::Error),
}

/// Raw metadata as read from the source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMetadata {
    pub rotation: Rotation,
    pub date_time: Option<String>,
    pub date_time_original: Option<String>,
    pub date_time_digitized: Option<String>,
}

impl ImageMetadata {
    /// Capture date as `YYYY-MM-DD` from the first usable EXIF date field.
    pub fn capture_date(&self) -> Option<String> {
        [
            &self.date_time,
            &self.date_time_original,
            &self.date_time_digitized,
        ]
        .into_iter()
        .filter_map(|raw| raw.as_deref().and_then(date_text))
        .next()
    }
}

/// Source of orientation and date metadata.
pub trait MetadataReader: Send + Sync {
    fn read(&self, source: &dyn ImageSource) -> Result<ImageMetadata, MetadataError>;
}

/// [`MetadataReader`] backed by `kamadak-exif`.
///
/// A source with no EXIF block yields empty metadata, not an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExifReader;

impl ExifReader {
    pub fn new() -> Self {
        Self
    }
}

impl MetadataReader for ExifReader {
    fn read(&self, source: &dyn ImageSource) -> Result<ImageMetadata, MetadataError> {
        let mut stream = source.open()?;
        let exif = match exif::Reader::new().read_from_container(&mut stream) {
            Ok(exif) => exif,
            Err(exif::Error::NotFound(_)) => return Ok(ImageMetadata::default()),
            Err(e) => return Err(e.into()),
        };

        let ascii = |tag: exif::Tag| -> Option<String> {
            let field = exif.get_field(tag, exif::In::PRIMARY)?;
            match &field.value {
                exif::Value::Ascii(values) => values
                    .first()
                    .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
                    .filter(|s| !s.is_empty()),
                _ => None,
            }
        };

        let rotation = exif
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .map(Rotation::from_exif)
            .unwrap_or_default();

        Ok(ImageMetadata {
            rotation,
            date_time: ascii(exif::Tag::DateTime),
            date_time_original: ascii(exif::Tag::DateTimeOriginal),
            date_time_digitized: ascii(exif::Tag::DateTimeDigitized),
        })
    }
}

/// Resolve a value from multiple sources.
///
/// Takes a list of optional values in priority order and returns the first
/// non-None, non-empty value.
pub fn resolve(sources: &[Option<&str>]) -> Option<String> {
    sources
        .iter()
        .filter_map(|opt| {
            opt.map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        })
        .next()
}

/// Convert an EXIF `YYYY:MM:DD HH:MM:SS` value to `YYYY-MM-DD`.
///
/// Returns `None` when the date part is not a real calendar date.
pub fn date_text(exif_date: &str) -> Option<String> {
    let date_part = exif_date.split_whitespace().next()?;
    let date = NaiveDate::parse_from_str(date_part, "%Y:%m:%d").ok()?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// Local calendar date of a modification time, as `YYYY-MM-DD`.
pub fn modified_date(modified: SystemTime) -> String {
    DateTime::<Local>::from(modified)
        .format("%Y-%m-%d")
        .to_string()
}

/// Watermark date for an image: EXIF capture date, else the source's
/// modification date.
pub fn resolve_date(metadata: &ImageMetadata, modified: Option<SystemTime>) -> Option<String> {
    let from_exif = metadata.capture_date();
    let from_file = modified.map(modified_date);
    resolve(&[from_exif.as_deref(), from_file.as_deref()])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::imaging::MemorySource;
    use crate::imaging::rust_backend::tests::test_jpeg_bytes;
    use std::time::{Duration, UNIX_EPOCH};

    /// Little-endian TIFF block with IFD0 holding the given orientation and DateTime.
    pub fn exif_tiff(orientation: Option<u16>, date_time: Option<&str>) -> Vec<u8> {
        let count = orientation.is_some() as u16 + date_time.is_some() as u16;
        let data_offset = 8 + 2 + 12 * count as u32 + 4;

        let mut tiff = b"II*\0".to_vec();
        tiff.extend(8u32.to_le_bytes());
        tiff.extend(count.to_le_bytes());
        if let Some(o) = orientation {
            tiff.extend(0x0112u16.to_le_bytes());
            tiff.extend(3u16.to_le_bytes());
            tiff.extend(1u32.to_le_bytes());
            tiff.extend(o.to_le_bytes());
            tiff.extend([0, 0]);
        }
        let mut data = Vec::new();
        if let Some(d) = date_time {
            data = d.as_bytes().to_vec();
            data.push(0);
            tiff.extend(0x0132u16.to_le_bytes());
            tiff.extend(2u16.to_le_bytes());
            tiff.extend((data.len() as u32).to_le_bytes());
            tiff.extend(data_offset.to_le_bytes());
        }
        tiff.extend(0u32.to_le_bytes());
        tiff.extend(data);
        tiff
    }

    /// Splice an APP1 EXIF segment right after the SOI marker of `jpeg`.
    pub fn with_exif(jpeg: &[u8], tiff: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
        out.extend(((2 + 6 + tiff.len()) as u16).to_be_bytes());
        out.extend(b"Exif\0\0");
        out.extend(tiff);
        out.extend(&jpeg[2..]);
        out
    }

    fn source(bytes: Vec<u8>) -> MemorySource {
        MemorySource::new("exif.jpg", bytes)
    }

    // =========================================================================
    // resolve tests
    // =========================================================================

    #[test]
    fn resolve_picks_first_non_none() {
        assert_eq!(resolve(&[Some("a"), Some("b")]), Some("a".into()));
    }

    #[test]
    fn resolve_skips_none_and_blank() {
        assert_eq!(resolve(&[None, Some("  "), Some("c")]), Some("c".into()));
        assert_eq!(resolve(&[None, None]), None);
        assert_eq!(resolve(&[]), None);
    }

    // =========================================================================
    // date tests
    // =========================================================================

    #[test]
    fn date_text_keeps_date_part() {
        assert_eq!(date_text("2020:09:09 10:11:12").as_deref(), Some("2020-09-09"));
        assert_eq!(date_text("2021:01:31").as_deref(), Some("2021-01-31"));
    }

    #[test]
    fn date_text_rejects_placeholders() {
        assert_eq!(date_text("0000:00:00 00:00:00"), None);
        assert_eq!(date_text("2020:02:30 00:00:00"), None);
        assert_eq!(date_text(""), None);
        assert_eq!(date_text("yesterday"), None);
    }

    #[test]
    fn capture_date_falls_through_fields() {
        let meta = ImageMetadata {
            date_time: Some("0000:00:00 00:00:00".into()),
            date_time_original: None,
            date_time_digitized: Some("2019:12:24 20:00:00".into()),
            ..ImageMetadata::default()
        };
        assert_eq!(meta.capture_date().as_deref(), Some("2019-12-24"));
    }

    #[test]
    fn resolve_date_prefers_exif() {
        let meta = ImageMetadata {
            date_time: Some("2020:09:09 10:11:12".into()),
            ..ImageMetadata::default()
        };
        let modified = UNIX_EPOCH + Duration::from_secs(0);
        assert_eq!(resolve_date(&meta, Some(modified)).as_deref(), Some("2020-09-09"));
    }

    #[test]
    fn resolve_date_falls_back_to_modified_time() {
        // 2020-09-09 12:00 UTC
        let modified = UNIX_EPOCH + Duration::from_secs(1_599_652_800);
        let date = resolve_date(&ImageMetadata::default(), Some(modified)).unwrap();
        assert!(date.starts_with("2020-09-"), "got {date}");
        assert_eq!(date.len(), 10);
    }

    #[test]
    fn resolve_date_none_without_any_source() {
        assert_eq!(resolve_date(&ImageMetadata::default(), None), None);
    }

    // =========================================================================
    // ExifReader tests
    // =========================================================================

    #[test]
    fn reads_orientation_and_date() {
        let bytes = with_exif(
            &test_jpeg_bytes(8, 8),
            &exif_tiff(Some(6), Some("2020:09:09 10:11:12")),
        );
        let meta = ExifReader::new().read(&source(bytes)).unwrap();
        assert_eq!(meta.rotation, Rotation::Cw90);
        assert_eq!(meta.date_time.as_deref(), Some("2020:09:09 10:11:12"));
        assert_eq!(meta.capture_date().as_deref(), Some("2020-09-09"));
    }

    #[test]
    fn orientation_mapping() {
        for (value, expected) in [
            (1, Rotation::None),
            (3, Rotation::Cw180),
            (6, Rotation::Cw90),
            (8, Rotation::Cw270),
            (5, Rotation::None),
        ] {
            let bytes = with_exif(&test_jpeg_bytes(4, 4), &exif_tiff(Some(value), None));
            let meta = ExifReader::new().read(&source(bytes)).unwrap();
            assert_eq!(meta.rotation, expected, "orientation {value}");
        }
    }

    #[test]
    fn jpeg_without_exif_is_empty_metadata() {
        let meta = ExifReader::new()
            .read(&source(test_jpeg_bytes(4, 4)))
            .unwrap();
        assert_eq!(meta, ImageMetadata::default());
    }

    #[test]
    fn unreadable_source_is_io_error() {
        let missing = crate::imaging::FileSource::new("/nonexistent/x.jpg");
        let err = ExifReader::new().read(&missing).unwrap_err();
        assert!(matches!(err, MetadataError::Io(_)));
    }
}
