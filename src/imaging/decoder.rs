//! Bounded decoding: header read plus a sampled decode that backs off on
//! memory exhaustion.
//!
//! Every attempt opens its own stream and hands it to the backend, which
//! drops it when the attempt ends. A failed attempt's partial buffer is gone
//! before the next rung of the [`SampleLadder`] is tried.

use super::backend::ImageBackend;
use super::calculations::{MAX_DECODE_FACTOR, SampleLadder};
use super::params::{Dimensions, MemoryBudget, Sampled};
use super::source::ImageSource;
use crate::process::WatermarkError;
use log::debug;

/// Learn the intrinsic size of `source` without decoding pixels.
pub fn decode_bounds(
    backend: &dyn ImageBackend,
    source: &dyn ImageSource,
) -> Result<Dimensions, WatermarkError> {
    let unreadable = |reason: String| WatermarkError::UnreadableSource {
        source_id: source.id(),
        reason,
    };
    let stream = source.open().map_err(|e| unreadable(e.to_string()))?;
    let dims = backend
        .bounds(stream)
        .map_err(|e| unreadable(e.to_string()))?;
    if dims.is_empty() {
        return Err(unreadable("File is not a picture".into()));
    }
    Ok(dims)
}

/// Decode `source` at `factor`, doubling the factor on memory exhaustion.
///
/// Fails with [`WatermarkError::DecodeExhausted`] once the factor would
/// exceed [`MAX_DECODE_FACTOR`]. Errors other than memory exhaustion are
/// not retried.
pub fn decode(
    backend: &dyn ImageBackend,
    source: &dyn ImageSource,
    factor: u32,
    budget: &MemoryBudget,
) -> Result<Sampled, WatermarkError> {
    let mut ladder = SampleLadder::new(factor, MAX_DECODE_FACTOR);
    let mut last_factor = factor;

    while let Some(step) = ladder.next() {
        last_factor = step;
        let stream = source
            .open()
            .map_err(|e| WatermarkError::UnreadableSource {
                source_id: source.id(),
                reason: e.to_string(),
            })?;
        match backend.decode(stream, step, budget) {
            Ok(buffer) => {
                debug!(
                    "{}: decoded at factor {} ({}x{})",
                    source.id(),
                    step,
                    buffer.width(),
                    buffer.height()
                );
                return Ok(Sampled {
                    buffer,
                    sample_size: step,
                });
            }
            Err(e) if e.is_out_of_memory() => {
                debug!("{}: out of memory at factor {}: {}", source.id(), step, e);
            }
            Err(e) => {
                return Err(WatermarkError::UnreadableSource {
                    source_id: source.id(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Err(WatermarkError::DecodeExhausted {
        source_id: source.id(),
        attempts: ladder.steps(),
        last_factor,
    })
}
