//! High-level image operations: orientation normalization and watermark
//! compositing.
//!
//! These combine the placement math in
//! [`calculations`](super::calculations) with a [`Renderer`].

use super::calculations::{Anchor, anchor_position, overlay_scale, scaled_overlay_dimensions};
use super::params::{PixelBuffer, Rotation};
use super::renderer::{Renderer, TextStyle};
use log::{debug, warn};

/// Rotate `buffer` upright. [`Rotation::None`] hands the input straight back.
pub fn normalize(renderer: &dyn Renderer, buffer: PixelBuffer, rotation: Rotation) -> PixelBuffer {
    if rotation == Rotation::None {
        return buffer;
    }
    debug!("rotating {} degrees", rotation.degrees());
    renderer.rotate(buffer, rotation)
}

/// Text drawn as a watermark.
#[derive(Debug, Clone, PartialEq)]
pub struct TextOverlay {
    pub text: String,
    pub style: TextStyle,
}

impl TextOverlay {
    /// Text in the default 16 px red style.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: TextStyle::default(),
        }
    }
}

/// What gets stamped onto the image.
#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    Image(PixelBuffer),
    Text(TextOverlay),
}

/// Full description of one watermark.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkSpec {
    pub overlay: Overlay,
    /// Overlay width as a fraction of the base width. Image overlays only.
    pub size_ratio: f32,
    pub anchor: Anchor,
    /// Distance in pixels from the two edges adjacent to the anchor corner.
    pub margin: u32,
}

/// Draw `spec` onto a copy of `base`.
///
/// Image overlays are scaled so their width is `base.width * size_ratio`.
/// Text is drawn at its own style size; the ratio does not resize it. An
/// [`Anchor::Unrecognized`] corner draws nothing and returns the base as is.
pub fn composite(renderer: &dyn Renderer, base: &PixelBuffer, spec: &WatermarkSpec) -> PixelBuffer {
    let mut canvas = base.clone();
    let base_dims = base.dimensions();

    match &spec.overlay {
        Overlay::Image(overlay) => {
            let (w, h) = scaled_overlay_dimensions(base.width(), spec.size_ratio, overlay.dimensions());
            match anchor_position(base_dims, (w, h), &spec.anchor, spec.margin) {
                Some((x, y)) => {
                    let scaled = renderer.scale(overlay, w, h);
                    renderer.draw_image(&mut canvas, &scaled, x, y);
                }
                None => warn!("unrecognized anchor '{}', watermark skipped", spec.anchor.name()),
            }
        }
        Overlay::Text(text) => {
            let bounds = renderer.measure_text(&text.text, &text.style);
            debug!(
                "text '{}' measures {}x{}, ratio scale {:.3} not applied",
                text.text,
                bounds.0,
                bounds.1,
                overlay_scale(base.width(), spec.size_ratio, bounds.0)
            );
            match anchor_position(base_dims, bounds, &spec.anchor, spec.margin) {
                Some((x, y)) => renderer.draw_text(&mut canvas, &text.text, x, y, &text.style),
                None => warn!("unrecognized anchor '{}', watermark skipped", spec.anchor.name()),
            }
        }
    }

    canvas
}
