//! Parameter types for image operations.
//!
//! These types describe *what* to do, not *how* to do it. They are shared by
//! the decode/crop ladders in [`decoder`](super::decoder) and
//! [`crop`](super::crop), the [`backend`](super::backend) that does the actual
//! decoding, and the [`renderer`](super::renderer) that composites pixels.
//!
//! ## Types
//!
//! - [`Dimensions`]: Intrinsic width and height.
//! - [`Quality`]: JPEG encoding quality (1–100, default 100). Clamped on construction.
//! - [`Rotation`]: Clockwise quarter-turn derived from orientation metadata.
//! - [`FittedRect`]: Crop rectangle as fractions of the image size.
//! - [`PixelRect`]: Crop rectangle in pixels.
//! - [`MemoryBudget`]: Upper bound on a single decoded RGBA buffer.
//! - [`Sampled`]: A decoded buffer plus the sample factor it was produced with.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decoded image: an owned RGBA grid.
pub type PixelBuffer = RgbaImage;

/// Bytes per pixel of a [`PixelBuffer`].
pub const BYTES_PER_PIXEL: u64 = 4;

/// Intrinsic image size. A zero in either axis means the source is not a picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Quality setting for JPEG encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u8);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(100)
    }
}

/// Clockwise rotation needed to display an image upright.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Accepts exactly 0, 90, 180 or 270.
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Self::None),
            90 => Some(Self::Cw90),
            180 => Some(Self::Cw180),
            270 => Some(Self::Cw270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Cw90 => 90,
            Self::Cw180 => 180,
            Self::Cw270 => 270,
        }
    }

    /// Map an EXIF `Orientation` tag value.
    ///
    /// Only the pure rotations (3, 6, 8) are honored; mirrored orientations
    /// are displayed as stored.
    pub fn from_exif(orientation: u32) -> Self {
        match orientation {
            3 => Self::Cw180,
            6 => Self::Cw90,
            8 => Self::Cw270,
            _ => Self::None,
        }
    }
}

/// Crop rectangle expressed as fractions (0.0–1.0) of the image dimensions.
///
/// Resolution independent: the same rect addresses the same content in a
/// full-size decode and in a down-sampled one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FittedRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl FittedRect {
    /// Returns `None` unless `0 <= left < right <= 1` and `0 <= top < bottom <= 1`.
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Option<Self> {
        let valid = (0.0..1.0).contains(&left)
            && left < right
            && right <= 1.0
            && (0.0..1.0).contains(&top)
            && top < bottom
            && bottom <= 1.0;
        valid.then_some(Self {
            left,
            top,
            right,
            bottom,
        })
    }

    /// The whole image.
    pub fn full() -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            right: 1.0,
            bottom: 1.0,
        }
    }

    /// Resolve against concrete dimensions, rounding each edge to the nearest pixel.
    ///
    /// The result is clamped to the image and is at least 1×1.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let edge = |fraction: f32, extent: u32| -> u32 {
            ((fraction * extent as f32).round() as u32).min(extent)
        };
        let left = edge(self.left, width).min(width.saturating_sub(1));
        let top = edge(self.top, height).min(height.saturating_sub(1));
        let right = edge(self.right, width).max(left + 1);
        let bottom = edge(self.bottom, height).max(top + 1);
        PixelRect {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }
}

impl fmt::Display for FittedRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Crop rectangle in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Upper bound on the size of any single decoded buffer.
///
/// Stands in for the device heap: a request for a buffer larger than
/// `max_bytes` is treated as memory exhaustion and triggers the caller's
/// down-sampling retry. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryBudget {
    pub max_bytes: Option<u64>,
}

impl MemoryBudget {
    pub fn unlimited() -> Self {
        Self { max_bytes: None }
    }

    pub fn bytes(max_bytes: u64) -> Self {
        Self {
            max_bytes: Some(max_bytes),
        }
    }

    pub fn megabytes(mb: u64) -> Self {
        Self::bytes(mb.saturating_mul(1024 * 1024))
    }

    /// Size in bytes of an RGBA buffer of the given dimensions.
    pub fn buffer_bytes(width: u32, height: u32) -> u64 {
        width as u64 * height as u64 * BYTES_PER_PIXEL
    }

    /// Whether a `width × height` RGBA buffer fits.
    pub fn allows(&self, width: u32, height: u32) -> bool {
        self.max_bytes
            .is_none_or(|max| Self::buffer_bytes(width, height) <= max)
    }
}

/// A decoded buffer and the sample factor (or scale divisor) that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sampled {
    pub buffer: PixelBuffer,
    pub sample_size: u32,
}
