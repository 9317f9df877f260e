//! Pixel compositing primitives.
//!
//! The watermark and orientation code never touch pixels directly; they ask
//! a [`Renderer`] to draw, scale, measure, and rotate. [`RustRenderer`] does
//! this with `image::imageops` and `imageproc` text drawing over an embedded
//! DejaVu Sans, which keeps the pipeline headless and independent of system
//! fonts. Tests and alternative graphics backends can swap in their own
//! implementation.

use super::params::{PixelBuffer, Rotation};
use ab_glyph::{FontRef, PxScale};
use image::Rgba;
use image::imageops::{self, FilterType};
use imageproc::drawing::{draw_text_mut, text_size};
use log::error;
use std::sync::LazyLock;

static FONT_BYTES: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

static FONT: LazyLock<Option<FontRef<'static>>> = LazyLock::new(|| {
    FontRef::try_from_slice(FONT_BYTES)
        .map_err(|e| error!("embedded watermark font is unreadable: {e}"))
        .ok()
});

/// Glyph size and color for text drawing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    /// Line height in pixels, ascent to descent.
    pub size: u32,
    pub color: Rgba<u8>,
}

impl Default for TextStyle {
    /// 16 px opaque red.
    fn default() -> Self {
        Self {
            size: 16,
            color: Rgba([0xFF, 0x00, 0x00, 0xFF]),
        }
    }
}

/// Drawing capability used by the compositor and normalizer.
pub trait Renderer: Send + Sync {
    /// Alpha-blend `image` onto `canvas` with its top-left corner at `(x, y)`.
    /// Parts outside the canvas are clipped.
    fn draw_image(&self, canvas: &mut PixelBuffer, image: &PixelBuffer, x: i64, y: i64);

    /// Resample `image` to exactly `width × height`.
    fn scale(&self, image: &PixelBuffer, width: u32, height: u32) -> PixelBuffer;

    /// Pixel bounding box `(width, height)` of `text` drawn with `style`.
    fn measure_text(&self, text: &str, style: &TextStyle) -> (u32, u32);

    /// Draw `text` with the top-left of its bounding box at `(x, y)`.
    fn draw_text(&self, canvas: &mut PixelBuffer, text: &str, x: i64, y: i64, style: &TextStyle);

    /// Rotate clockwise. Consumes the input so only the result stays alive.
    fn rotate(&self, image: PixelBuffer, rotation: Rotation) -> PixelBuffer;
}

/// [`Renderer`] backed by `image::imageops` and `imageproc`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustRenderer;

impl RustRenderer {
    pub fn new() -> Self {
        Self
    }
}

fn scale_of(style: &TextStyle) -> PxScale {
    PxScale::from(style.size.max(1) as f32)
}

impl Renderer for RustRenderer {
    fn draw_image(&self, canvas: &mut PixelBuffer, image: &PixelBuffer, x: i64, y: i64) {
        imageops::overlay(canvas, image, x, y);
    }

    fn scale(&self, image: &PixelBuffer, width: u32, height: u32) -> PixelBuffer {
        if image.dimensions() == (width, height) {
            return image.clone();
        }
        imageops::resize(image, width, height, FilterType::Triangle)
    }

    fn measure_text(&self, text: &str, style: &TextStyle) -> (u32, u32) {
        let Some(font) = FONT.as_ref() else {
            return (0, 0);
        };
        if text.is_empty() {
            return (0, 0);
        }
        // Glyphs sit on the ascent line, so the full line height is the box.
        let (width, _) = text_size(scale_of(style), font, text);
        (width, style.size)
    }

    fn draw_text(&self, canvas: &mut PixelBuffer, text: &str, x: i64, y: i64, style: &TextStyle) {
        let Some(font) = FONT.as_ref() else {
            return;
        };
        let (w, h) = self.measure_text(text, style);
        let visible = x < canvas.width() as i64
            && y < canvas.height() as i64
            && x + w as i64 > 0
            && y + h as i64 > 0;
        if !visible {
            return;
        }
        draw_text_mut(
            canvas,
            style.color,
            x as i32,
            y as i32,
            scale_of(style),
            font,
            text,
        );
    }

    fn rotate(&self, image: PixelBuffer, rotation: Rotation) -> PixelBuffer {
        match rotation {
            Rotation::None => image,
            Rotation::Cw90 => imageops::rotate90(&image),
            Rotation::Cw180 => imageops::rotate180(&image),
            Rotation::Cw270 => imageops::rotate270(&image),
        }
    }
}
