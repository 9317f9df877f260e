//! Pure Rust decoding backend built on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Bounds | `ImageReader::into_dimensions` (header only) |
//! | Decode JPEG | `jpeg-decoder` with `Decoder::scale` (1/2, 1/4, 1/8 during IDCT) |
//! | Decode PNG, TIFF, WebP | `image` crate decoders under `Limits::max_alloc` + `imageops::thumbnail` |
//! | Region decode | not available, reports [`BackendError::UnsupportedRegion`] |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//!
//! JPEG is decoded directly at the sampled size for factors up to 8; larger
//! factors decode at 1/8 and area-average the rest, so the largest buffer an
//! attempt holds shrinks with the factor. The budget is checked against that
//! scaled decode before any pixel is produced.
//!
//! Other formats cannot scale while decoding. They are decoded at full size
//! with the budget passed to the decoder as its allocation limit, so an image
//! too large for the budget fails as [`BackendError::OutOfMemory`] instead of
//! allocating.

use super::backend::{BackendError, ImageBackend, ensure_fits};
use super::calculations::sampled_dimensions;
use super::params::{Dimensions, MemoryBudget, PixelBuffer, PixelRect, Quality};
use super::source::SourceReader;
use image::buffer::ConvertBuffer;
use image::codecs::jpeg::JpegEncoder;
use image::error::LimitErrorKind;
use image::{
    DynamicImage, ExtendedColorType, GrayImage, ImageDecoder, ImageEncoder, ImageError,
    ImageFormat, ImageReader, Limits, RgbImage,
};
use jpeg_decoder::PixelFormat;
use std::sync::LazyLock;

/// Extensions whose decoders are compiled in.
const PHOTO_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    PHOTO_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of image file extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn map_image_error(err: ImageError) -> BackendError {
    match err {
        ImageError::Limits(limit) if matches!(limit.kind(), LimitErrorKind::InsufficientMemory) => {
            // The decoder does not say how much it wanted.
            BackendError::OutOfMemory { requested_bytes: 0 }
        }
        ImageError::IoError(e) => BackendError::Io(e),
        other => BackendError::ProcessingFailed(other.to_string()),
    }
}

fn reader(stream: SourceReader) -> Result<ImageReader<SourceReader>, BackendError> {
    Ok(ImageReader::new(stream).with_guessed_format()?)
}

/// Area-average `buffer` down to `target` dimensions; a no-op when already there.
fn downsample(buffer: PixelBuffer, target: Dimensions) -> PixelBuffer {
    if buffer.dimensions() == (target.width, target.height) {
        return buffer;
    }
    image::imageops::thumbnail(&buffer, target.width, target.height)
}

/// Decoder limits carrying the budget as the allocation ceiling.
fn limits_for(budget: &MemoryBudget) -> Limits {
    let mut limits = Limits::default();
    if budget.max_bytes.is_some() {
        limits.max_alloc = budget.max_bytes;
    }
    limits
}

fn map_jpeg_error(err: jpeg_decoder::Error) -> BackendError {
    match err {
        jpeg_decoder::Error::Io(e) => BackendError::Io(e),
        other => BackendError::ProcessingFailed(format!("JPEG decode failed: {other}")),
    }
}

/// JPEG dimensions never exceed `u16::MAX`.
fn as_u16(value: u32) -> u16 {
    value.min(u16::MAX as u32) as u16
}

/// Decode a JPEG stream at `1/factor` scale.
///
/// The IDCT produces the smallest of 1/1, 1/2, 1/4, 1/8 that is at least
/// the target; any remaining reduction is area-averaged afterwards.
fn decode_jpeg_scaled(
    stream: SourceReader,
    factor: u32,
    budget: &MemoryBudget,
) -> Result<PixelBuffer, BackendError> {
    let mut decoder = jpeg_decoder::Decoder::new(stream);
    decoder.read_info().map_err(map_jpeg_error)?;
    let info = decoder
        .info()
        .ok_or_else(|| BackendError::ProcessingFailed("JPEG header missing".into()))?;
    let full = Dimensions::new(info.width as u32, info.height as u32);
    let target = sampled_dimensions(full, factor);
    ensure_fits(budget, target.width, target.height)?;

    let (width, height) = decoder
        .scale(as_u16(target.width), as_u16(target.height))
        .map_err(map_jpeg_error)?;
    let (width, height) = (width as u32, height as u32);
    // The scaled decode is the largest buffer this attempt holds.
    ensure_fits(budget, width, height)?;

    let pixels = decoder.decode().map_err(map_jpeg_error)?;
    let scaled = match info.pixel_format {
        PixelFormat::RGB24 => RgbImage::from_raw(width, height, pixels).map(|img| img.convert()),
        PixelFormat::L8 => GrayImage::from_raw(width, height, pixels).map(|img| img.convert()),
        PixelFormat::L16 => {
            // Big-endian samples; keep the high byte.
            let high: Vec<u8> = pixels.chunks_exact(2).map(|px| px[0]).collect();
            GrayImage::from_raw(width, height, high).map(|img| img.convert())
        }
        // CMYK32
        _ => {
            let rgba: Vec<u8> = pixels
                .chunks_exact(4)
                .flat_map(|px| {
                    let k = 255 - px[3] as u32;
                    let channel = |c: u8| ((255 - c as u32) * k / 255) as u8;
                    [channel(px[0]), channel(px[1]), channel(px[2]), 255]
                })
                .collect();
            PixelBuffer::from_raw(width, height, rgba)
        }
    };
    let scaled = scaled.ok_or_else(|| {
        BackendError::ProcessingFailed(format!(
            "JPEG decoder returned a short buffer for {width}x{height}"
        ))
    })?;
    Ok(downsample(scaled, target))
}

/// Encode an RGBA buffer as baseline JPEG. Alpha is dropped.
pub fn encode_jpeg(buffer: &PixelBuffer, quality: Quality) -> Result<Vec<u8>, BackendError> {
    let rgb: RgbImage = buffer.convert();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.value())
        .write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| BackendError::ProcessingFailed(format!("JPEG encode failed: {e}")))?;
    Ok(out)
}

impl ImageBackend for RustBackend {
    fn bounds(&self, stream: SourceReader) -> Result<Dimensions, BackendError> {
        let (width, height) = reader(stream)?
            .into_dimensions()
            .map_err(map_image_error)?;
        Ok(Dimensions { width, height })
    }

    fn decode(
        &self,
        stream: SourceReader,
        factor: u32,
        budget: &MemoryBudget,
    ) -> Result<PixelBuffer, BackendError> {
        let mut reader = reader(stream)?;
        if reader.format() == Some(ImageFormat::Jpeg) {
            return decode_jpeg_scaled(reader.into_inner(), factor, budget);
        }

        let mut limits = limits_for(budget);
        reader.limits(limits.clone());
        let decoder = reader.into_decoder().map_err(map_image_error)?;
        let (width, height) = decoder.dimensions();
        let target = sampled_dimensions(Dimensions { width, height }, factor);
        ensure_fits(budget, target.width, target.height)?;
        // The full-size decode buffer counts against the budget.
        limits
            .reserve(decoder.total_bytes())
            .map_err(map_image_error)?;

        let full = DynamicImage::from_decoder(decoder)
            .map_err(map_image_error)?
            .into_rgba8();
        Ok(downsample(full, target))
    }

    fn decode_region(
        &self,
        _stream: SourceReader,
        _rect: PixelRect,
        _factor: u32,
        _budget: &MemoryBudget,
    ) -> Result<PixelBuffer, BackendError> {
        Err(BackendError::UnsupportedRegion)
    }

    fn encode_jpeg(&self, buffer: &PixelBuffer, quality: Quality) -> Result<Vec<u8>, BackendError> {
        encode_jpeg(buffer, quality)
    }
}
