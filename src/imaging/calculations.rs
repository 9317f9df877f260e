//! Pure calculation functions for sample factors and overlay placement.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::Dimensions;

/// Largest sample factor a decode may use. Beyond this the image is
/// declared undecodable.
pub const MAX_DECODE_FACTOR: u32 = 512;

/// Largest sample multiplier (or scale divisor) used by the crop paths.
pub const MAX_CROP_FACTOR: u32 = 8;

/// Smallest power-of-two factor that brings the image to roughly twice the
/// requested bound.
///
/// The factor keeps doubling only while *both* halved dimensions are still
/// above their bound, so the result may leave the image up to 2× larger than
/// requested. That slack avoids over-shrinking.
///
/// ```
/// # use datemark::imaging::factor_for_bounds;
/// assert_eq!(factor_for_bounds(4000, 3000, 1000, 1000), 2);
/// assert_eq!(factor_for_bounds(800, 600, 1000, 1000), 1);
/// ```
pub fn factor_for_bounds(width: u32, height: u32, max_width: u32, max_height: u32) -> u32 {
    let mut factor = 1u32;
    if height > max_height || width > max_width {
        while (height / 2 / factor) > max_height && (width / 2 / factor) > max_width {
            factor *= 2;
        }
    }
    factor
}

/// Smallest power-of-two factor that fits both dimensions within the
/// device texture limit. Unknown limits (`None` or 0) yield 1.
pub fn factor_for_device_limit(width: u32, height: u32, max_texture: Option<u32>) -> u32 {
    let Some(limit) = max_texture.filter(|&l| l > 0) else {
        return 1;
    };
    let mut factor = 1u32;
    while width / factor > limit || height / factor > limit {
        factor *= 2;
    }
    factor
}

/// The most aggressive of two factors wins.
pub fn combined_factor(by_bounds: u32, by_device: u32) -> u32 {
    by_bounds.max(by_device)
}

/// Dimensions of a buffer decoded at `factor`: each axis rounded up.
pub fn sampled_dimensions(dims: Dimensions, factor: u32) -> Dimensions {
    let factor = factor.max(1);
    Dimensions {
        width: dims.width.div_ceil(factor),
        height: dims.height.div_ceil(factor),
    }
}

/// Bounded retry schedule: `start, 2·start, 4·start, …` up to `ceiling`.
///
/// Every memory-exhaustion retry loop walks one of these, so each loop has an
/// explicit step bound and an explicit terminal state (`None`).
#[derive(Debug, Clone)]
pub struct SampleLadder {
    next: Option<u32>,
    ceiling: u32,
    steps: u32,
}

impl SampleLadder {
    pub fn new(start: u32, ceiling: u32) -> Self {
        let start = start.max(1);
        Self {
            next: (start <= ceiling).then_some(start),
            ceiling,
            steps: 0,
        }
    }

    /// Number of rungs handed out so far.
    pub fn steps(&self) -> u32 {
        self.steps
    }
}

impl Iterator for SampleLadder {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let current = self.next?;
        self.steps += 1;
        self.next = current
            .checked_mul(2)
            .filter(|&doubled| doubled <= self.ceiling);
        Some(current)
    }
}

/// Corner an overlay is pinned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    /// Any other name. Compositing with it draws nothing.
    Unrecognized(String),
}

impl Anchor {
    /// Parse `topLeft`/`top-left`/`top_left` style names; anything else is kept
    /// as [`Anchor::Unrecognized`].
    pub fn parse(name: &str) -> Self {
        let normalized: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "topleft" => Self::TopLeft,
            "topright" => Self::TopRight,
            "bottomleft" => Self::BottomLeft,
            "bottomright" => Self::BottomRight,
            _ => Self::Unrecognized(name.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::TopLeft => "topLeft",
            Self::TopRight => "topRight",
            Self::BottomLeft => "bottomLeft",
            Self::BottomRight => "bottomRight",
            Self::Unrecognized(name) => name,
        }
    }
}

/// Top-left corner of an `overlay`-sized box pinned to `anchor` of `base`,
/// `margin` pixels in from both adjacent edges.
///
/// Returns `None` for [`Anchor::Unrecognized`]. Coordinates are signed:
/// an overlay wider than the base lands partly off-canvas.
pub fn anchor_position(
    base: (u32, u32),
    overlay: (u32, u32),
    anchor: &Anchor,
    margin: u32,
) -> Option<(i64, i64)> {
    let (base_w, base_h) = (base.0 as i64, base.1 as i64);
    let (over_w, over_h) = (overlay.0 as i64, overlay.1 as i64);
    let m = margin as i64;
    match anchor {
        Anchor::TopLeft => Some((m, m)),
        Anchor::TopRight => Some((base_w - over_w - m, m)),
        Anchor::BottomLeft => Some((m, base_h - over_h - m)),
        Anchor::BottomRight => Some((base_w - over_w - m, base_h - over_h - m)),
        Anchor::Unrecognized(_) => None,
    }
}

/// Overlay dimensions after scaling its width to `base_width * ratio`,
/// aspect preserved, never smaller than 1×1.
pub fn scaled_overlay_dimensions(base_width: u32, ratio: f32, overlay: (u32, u32)) -> (u32, u32) {
    let (w, h) = overlay;
    if w == 0 || h == 0 {
        return (1, 1);
    }
    let scale = overlay_scale(base_width, ratio, w);
    let out_w = ((w as f32 * scale).round() as u32).max(1);
    let out_h = ((h as f32 * scale).round() as u32).max(1);
    (out_w, out_h)
}

/// Scale factor that makes an overlay `overlay_width` wide span
/// `base_width * ratio` pixels.
pub fn overlay_scale(base_width: u32, ratio: f32, overlay_width: u32) -> f32 {
    if overlay_width == 0 {
        return 1.0;
    }
    (base_width as f32 * ratio) / overlay_width as f32
}
