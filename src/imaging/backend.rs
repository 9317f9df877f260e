//! Image decoding backend trait and shared error type.
//!
//! The [`ImageBackend`] trait defines the operations every backend must
//! support: header-only bounds, sampled decode, sampled region decode and JPEG
//! encode. Backends never open sources themselves; the caller opens a fresh
//! [`SourceReader`] per attempt and hands it over, so every handle is closed
//! when the backend call returns, whatever the outcome.
//!
//! Memory exhaustion is reported as [`BackendError::OutOfMemory`] rather than
//! aborting, which is what lets the decode and crop ladders retry with a
//! larger sample factor.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend).

use super::params::{Dimensions, MemoryBudget, PixelBuffer, PixelRect, Quality};
use super::source::SourceReader;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Out of memory: {requested_bytes} bytes requested")]
    OutOfMemory { requested_bytes: u64 },
    #[error("Region decoding is not supported for this source")]
    UnsupportedRegion,
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

impl BackendError {
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

/// Fail with [`BackendError::OutOfMemory`] if a `width × height` buffer
/// does not fit the budget.
pub fn ensure_fits(budget: &MemoryBudget, width: u32, height: u32) -> Result<(), BackendError> {
    if budget.allows(width, height) {
        Ok(())
    } else {
        Err(BackendError::OutOfMemory {
            requested_bytes: MemoryBudget::buffer_bytes(width, height),
        })
    }
}

/// Trait for image decoding backends.
pub trait ImageBackend: Send + Sync {
    /// Read only enough of the stream to learn the intrinsic size.
    fn bounds(&self, stream: SourceReader) -> Result<Dimensions, BackendError>;

    /// Decode the whole image down-sampled by `factor`.
    ///
    /// The result is `ceil(w / factor) × ceil(h / factor)`.
    fn decode(
        &self,
        stream: SourceReader,
        factor: u32,
        budget: &MemoryBudget,
    ) -> Result<PixelBuffer, BackendError>;

    /// Decode only the pixels inside `rect`, down-sampled by `factor`.
    ///
    /// Backends without partial decoding return
    /// [`BackendError::UnsupportedRegion`].
    fn decode_region(
        &self,
        stream: SourceReader,
        rect: PixelRect,
        factor: u32,
        budget: &MemoryBudget,
    ) -> Result<PixelBuffer, BackendError>;

    /// Encode a buffer as JPEG.
    fn encode_jpeg(&self, buffer: &PixelBuffer, quality: Quality) -> Result<Vec<u8>, BackendError>;
}
