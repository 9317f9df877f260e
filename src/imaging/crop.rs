//! Cropping with memory-exhaustion fallbacks.
//!
//! Two entry points:
//!
//! - [`crop_region`] decodes only the requested rectangle when the backend
//!   can, and otherwise decodes the whole image and crops in memory. Both
//!   paths are retried under an outer sample multiplier (1, 2, 4, 8).
//! - [`crop_buffer`] crops an already-decoded buffer, shrinking the output
//!   by 1, 1/2, 1/4, 1/8 until it fits.
//!
//! The returned [`Sampled::sample_size`] is the effective reduction, so a
//! caller mapping coordinates back to the original image can scale them.

use super::backend::{BackendError, ImageBackend, ensure_fits};
use super::calculations::{MAX_CROP_FACTOR, MAX_DECODE_FACTOR, SampleLadder, factor_for_bounds};
use super::decoder;
use super::params::{Dimensions, FittedRect, MemoryBudget, PixelBuffer, PixelRect, Sampled};
use super::source::ImageSource;
use crate::process::WatermarkError;
use log::{debug, warn};

/// Identity reported for failures of [`crop_buffer`], which has no source.
const IN_MEMORY_ID: &str = "<in-memory buffer>";

/// Crop `fitted` out of `source`, aiming for roughly `target` pixels.
///
/// `original` is the intrinsic size from
/// [`decode_bounds`](super::decoder::decode_bounds); the fitted rect is
/// resolved against it to address the region decoder.
pub fn crop_region(
    backend: &dyn ImageBackend,
    source: &dyn ImageSource,
    fitted: FittedRect,
    original: Dimensions,
    target: (u32, u32),
    budget: &MemoryBudget,
) -> Result<Sampled, WatermarkError> {
    let rect = fitted.to_pixels(original.width, original.height);
    let region_factor = factor_for_bounds(rect.width, rect.height, target.0, target.1);
    let full_factor = factor_for_bounds(rect.width, rect.height, original.width, original.height);

    let mut region_available = true;
    let mut multipliers = SampleLadder::new(1, MAX_CROP_FACTOR);
    while let Some(multi) = multipliers.next() {
        if region_available {
            match decode_region(backend, source, rect, multi * region_factor, budget) {
                RegionAttempt::Decoded(sampled) => return Ok(sampled),
                RegionAttempt::Exhausted => {}
                RegionAttempt::Unavailable => region_available = false,
            }
        }

        match crop_after_full_decode(backend, source, fitted, multi * full_factor, budget) {
            Ok(sampled) => return Ok(sampled),
            Err(CropFailure::OutOfMemory) => {
                debug!(
                    "{}: crop out of memory at multiplier {}",
                    source.id(),
                    multi
                );
            }
            Err(CropFailure::Fatal(e)) => return Err(e),
        }
    }

    Err(WatermarkError::CropExhausted {
        source_id: source.id(),
        attempts: multipliers.steps(),
    })
}

/// Crop `fitted` out of a decoded buffer, halving the output on memory
/// exhaustion up to 1/8 scale. The result's `sample_size` is the divisor used.
pub fn crop_buffer(
    buffer: &PixelBuffer,
    fitted: FittedRect,
    budget: &MemoryBudget,
) -> Result<Sampled, WatermarkError> {
    let rect = fitted.to_pixels(buffer.width(), buffer.height());
    let mut divisors = SampleLadder::new(1, MAX_CROP_FACTOR);
    while let Some(divisor) = divisors.next() {
        match crop_pixels(buffer, rect, divisor, budget) {
            Ok(cropped) => {
                return Ok(Sampled {
                    buffer: cropped,
                    sample_size: divisor,
                });
            }
            Err(e) => debug!("{IN_MEMORY_ID}: crop at 1/{divisor} failed: {e}"),
        }
    }
    Err(WatermarkError::CropExhausted {
        source_id: IN_MEMORY_ID.to_string(),
        attempts: divisors.steps(),
    })
}

enum CropFailure {
    OutOfMemory,
    Fatal(WatermarkError),
}

/// Outcome of one region decode ladder.
enum RegionAttempt {
    Decoded(Sampled),
    /// Every factor ran out of memory; a larger multiplier may still fit.
    Exhausted,
    /// Unsupported format or a hard failure. Later multipliers skip the
    /// region path and go straight to the full decode.
    Unavailable,
}

/// Region decode with its own doubling ladder.
fn decode_region(
    backend: &dyn ImageBackend,
    source: &dyn ImageSource,
    rect: PixelRect,
    factor: u32,
    budget: &MemoryBudget,
) -> RegionAttempt {
    let mut ladder = SampleLadder::new(factor, MAX_DECODE_FACTOR);
    while let Some(step) = ladder.next() {
        let stream = match source.open() {
            Ok(stream) => stream,
            Err(e) => {
                warn!("{}: region decode could not open source: {}", source.id(), e);
                return RegionAttempt::Unavailable;
            }
        };
        match backend.decode_region(stream, rect, step, budget) {
            Ok(buffer) => {
                return RegionAttempt::Decoded(Sampled {
                    buffer,
                    sample_size: step,
                });
            }
            Err(e) if e.is_out_of_memory() => {
                debug!("{}: region out of memory at factor {}", source.id(), step);
            }
            Err(BackendError::UnsupportedRegion) => {
                debug!("{}: no region decoder, decoding in full", source.id());
                return RegionAttempt::Unavailable;
            }
            Err(e) => {
                warn!("{}: region decode failed, decoding in full: {}", source.id(), e);
                return RegionAttempt::Unavailable;
            }
        }
    }
    RegionAttempt::Exhausted
}

fn crop_after_full_decode(
    backend: &dyn ImageBackend,
    source: &dyn ImageSource,
    fitted: FittedRect,
    factor: u32,
    budget: &MemoryBudget,
) -> Result<Sampled, CropFailure> {
    let full = decoder::decode(backend, source, factor, budget).map_err(CropFailure::Fatal)?;
    // The fitted rect is resolved against the sampled buffer, so the crop
    // already lands on the right pixels at this scale.
    let rect = fitted.to_pixels(full.buffer.width(), full.buffer.height());
    match crop_pixels(&full.buffer, rect, 1, budget) {
        Ok(buffer) => Ok(Sampled {
            buffer,
            sample_size: full.sample_size,
        }),
        Err(e) if e.is_out_of_memory() => Err(CropFailure::OutOfMemory),
        Err(e) => Err(CropFailure::Fatal(WatermarkError::UnreadableSource {
            source_id: source.id(),
            reason: e.to_string(),
        })),
    }
}

/// Copy `rect` out of `buffer`, shrunk by `divisor`. Always returns a new buffer.
fn crop_pixels(
    buffer: &PixelBuffer,
    rect: PixelRect,
    divisor: u32,
    budget: &MemoryBudget,
) -> Result<PixelBuffer, BackendError> {
    let out_w = rect.width.div_ceil(divisor);
    let out_h = rect.height.div_ceil(divisor);
    ensure_fits(budget, out_w, out_h)?;

    let cropped = image::imageops::crop_imm(buffer, rect.x, rect.y, rect.width, rect.height)
        .to_image();
    if divisor == 1 {
        return Ok(cropped);
    }
    Ok(image::imageops::thumbnail(&cropped, out_w, out_h))
}
