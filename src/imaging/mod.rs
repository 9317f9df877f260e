//! Image processing: bounded decoding, cropping, orientation, watermarking.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Bounds** | `image::ImageReader::into_dimensions` |
//! | **Sampled decode** | `image` decoders + `imageops::thumbnail` |
//! | **Crop** | `imageops::crop_imm` |
//! | **Rotate** | `imageops::rotate90` / `rotate180` / `rotate270` |
//! | **Overlay** | `imageops::overlay` + `imageops::resize` |
//! | **Text** | `imageproc::drawing::draw_text_mut` + embedded DejaVu Sans (`ab_glyph`) |
//! | **Encode → JPEG** | `image::codecs::jpeg::JpegEncoder` |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for sample factors and placement (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Source**: Re-openable inputs and output destinations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Renderer**: [`Renderer`] trait + [`RustRenderer`]
//! - **Decoder / Crop**: retry ladders that degrade on memory exhaustion
//! - **Operations**: orientation normalization and watermark compositing

pub mod backend;
mod calculations;
pub mod crop;
pub mod decoder;
pub mod operations;
mod params;
pub mod renderer;
pub mod rust_backend;
pub mod source;

pub use backend::{BackendError, ImageBackend};
pub use calculations::{
    Anchor, MAX_CROP_FACTOR, MAX_DECODE_FACTOR, SampleLadder, anchor_position, combined_factor,
    factor_for_bounds, factor_for_device_limit, sampled_dimensions, scaled_overlay_dimensions,
};
pub use crop::{crop_buffer, crop_region};
pub use decoder::{decode, decode_bounds};
pub use operations::{Overlay, TextOverlay, WatermarkSpec, composite, normalize};
pub use params::{
    Dimensions, FittedRect, MemoryBudget, PixelBuffer, PixelRect, Quality, Rotation, Sampled,
};
pub use renderer::{Renderer, RustRenderer, TextStyle};
pub use rust_backend::{RustBackend, supported_input_extensions};
pub use source::{Destination, FileSource, ImageSource, MemorySource, SourceReader};
