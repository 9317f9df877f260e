//! Stamping configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! overridden by the user's file, then by command-line flags.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [watermark]
//! kind = "date"              # "date", "text" or "image"
//! # text = "© me"            # Required when kind = "text"
//! # image = "logo.png"       # Required when kind = "image"
//! anchor = "bottomRight"     # topLeft, topRight, bottomLeft, bottomRight
//! size_ratio = 0.2           # Image overlay width as a fraction of the photo width
//! margin_ratio = 0.045       # Margin as a fraction of the photo width
//! # margin_px = 40           # Fixed margin, overrides margin_ratio
//! text_size_ratio = 0.035    # Glyph size as a fraction of the photo height
//! # text_size_px = 48        # Fixed glyph size, overrides text_size_ratio
//! text_color = "#ffffff"     # #RRGGBB or #RRGGBBAA
//!
//! [output]
//! quality = 100              # JPEG quality (1-100)
//! name_pattern = "{date}_{index}"
//!
//! [decode]
//! # max_width = 4096         # Decode bounds, both or neither; omit for full size
//! # max_height = 4096
//! # max_texture_size = 8192  # Omit to use DATEMARK_MAX_TEXTURE_SIZE
//! # memory_budget_mb = 256   # Largest single decoded buffer
//!
//! [processing]
//! max_processes = 4          # Max parallel workers (omit for auto = CPU cores)
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse. Override just the values you want:
//!
//! ```toml
//! [watermark]
//! anchor = "topLeft"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{Anchor, Destination, ImageSource, MemoryBudget, PixelBuffer, Quality};
use crate::naming::{DEFAULT_PATTERN, NamePattern};
use crate::process::{Length, OverlayKind, TextureLimit, WatermarkJob};
use image::Rgba;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Cannot load watermark image: {0}")]
    Image(#[from] image::ImageError),
}

/// Stamping configuration loaded from `config.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatemarkConfig {
    /// What to stamp and where.
    pub watermark: WatermarkConfig,
    /// Encoding and file naming.
    pub output: OutputConfig,
    /// Decode bounds and memory limits.
    pub decode: DecodeConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl DatemarkConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let wm = &self.watermark;
        if !(1..=100).contains(&self.output.quality) {
            return Err(ConfigError::Validation(
                "output.quality must be 1-100".into(),
            ));
        }
        NamePattern::parse(&self.output.name_pattern)
            .map_err(|e| ConfigError::Validation(format!("output.name_pattern: {e}")))?;
        parse_color(&wm.text_color)
            .map_err(|e| ConfigError::Validation(format!("watermark.text_color: {e}")))?;
        if !(0.0..=1.0).contains(&wm.size_ratio) {
            return Err(ConfigError::Validation(
                "watermark.size_ratio must be 0-1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&wm.margin_ratio) {
            return Err(ConfigError::Validation(
                "watermark.margin_ratio must be 0-1".into(),
            ));
        }
        if !(wm.text_size_ratio > 0.0 && wm.text_size_ratio <= 1.0) {
            return Err(ConfigError::Validation(
                "watermark.text_size_ratio must be greater than 0 and at most 1".into(),
            ));
        }
        if wm.text_size_px == Some(0) {
            return Err(ConfigError::Validation(
                "watermark.text_size_px must be non-zero".into(),
            ));
        }
        match wm.kind {
            WatermarkKind::Date => {}
            WatermarkKind::Text => {
                if wm.text.as_deref().is_none_or(|t| t.trim().is_empty()) {
                    return Err(ConfigError::Validation(
                        "watermark.text is required when kind = \"text\"".into(),
                    ));
                }
            }
            WatermarkKind::Image => {
                if wm.image.is_none() {
                    return Err(ConfigError::Validation(
                        "watermark.image is required when kind = \"image\"".into(),
                    ));
                }
                if wm.size_ratio == 0.0 {
                    return Err(ConfigError::Validation(
                        "watermark.size_ratio must be non-zero for image watermarks".into(),
                    ));
                }
            }
        }
        let d = &self.decode;
        if d.max_width.is_some() != d.max_height.is_some() {
            return Err(ConfigError::Validation(
                "decode.max_width and decode.max_height must be set together".into(),
            ));
        }
        if d.max_width == Some(0) || d.max_height == Some(0) {
            return Err(ConfigError::Validation(
                "decode.max_width and decode.max_height must be non-zero".into(),
            ));
        }
        if d.max_texture_size == Some(0) {
            return Err(ConfigError::Validation(
                "decode.max_texture_size must be non-zero".into(),
            ));
        }
        if d.memory_budget_mb == Some(0) {
            return Err(ConfigError::Validation(
                "decode.memory_budget_mb must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Load the overlay the watermark section asks for. Relative image paths
    /// resolve against `base_dir`.
    pub fn overlay(&self, base_dir: &Path) -> Result<OverlayKind, ConfigError> {
        let wm = &self.watermark;
        Ok(match wm.kind {
            WatermarkKind::Date => OverlayKind::Date,
            WatermarkKind::Text => OverlayKind::Text(wm.text.clone().unwrap_or_default()),
            WatermarkKind::Image => {
                let path = base_dir.join(wm.image.as_deref().unwrap_or_default());
                let image: PixelBuffer = image::open(path)?.into_rgba8();
                OverlayKind::Image(Arc::new(image))
            }
        })
    }

    /// Build a job for one source from this config.
    ///
    /// Call [`validate`](Self::validate) first; unparseable values fall back
    /// to their defaults here.
    pub fn job(
        &self,
        source: Arc<dyn ImageSource>,
        destination: Destination,
        overlay: OverlayKind,
    ) -> WatermarkJob {
        let wm = &self.watermark;
        let d = &self.decode;
        WatermarkJob {
            overlay,
            size_ratio: wm.size_ratio,
            anchor: Anchor::parse(&wm.anchor),
            margin: wm
                .margin_px
                .map_or(Length::Fraction(wm.margin_ratio), Length::Pixels),
            text_size: wm
                .text_size_px
                .map_or(Length::Fraction(wm.text_size_ratio), Length::Pixels),
            text_color: parse_color(&wm.text_color).unwrap_or(Rgba([0xFF, 0xFF, 0xFF, 0xFF])),
            quality: Quality::new(self.output.quality),
            max_bounds: d.max_width.zip(d.max_height),
            texture_limit: d
                .max_texture_size
                .map_or(TextureLimit::Device, TextureLimit::Fixed),
            budget: d
                .memory_budget_mb
                .map_or(MemoryBudget::unlimited(), MemoryBudget::megabytes),
            crop: None,
            ..WatermarkJob::new(source, destination)
        }
    }

    /// The output name pattern, or the default when it does not parse.
    pub fn name_pattern(&self) -> NamePattern {
        NamePattern::parse(&self.output.name_pattern).unwrap_or_default()
    }
}

/// Overlay kinds selectable from config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkKind {
    #[default]
    Date,
    Text,
    Image,
}

/// Watermark content and placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatermarkConfig {
    pub kind: WatermarkKind,
    /// Text to stamp when `kind = "text"`.
    pub text: Option<String>,
    /// Overlay image path when `kind = "image"`.
    pub image: Option<String>,
    /// Corner name. Unrecognized names stamp nothing.
    pub anchor: String,
    /// Image overlay width as a fraction of the photo width. Text ignores it.
    pub size_ratio: f32,
    /// Fixed margin in pixels. Takes precedence over `margin_ratio`.
    pub margin_px: Option<u32>,
    pub margin_ratio: f64,
    /// Fixed glyph size in pixels. Takes precedence over `text_size_ratio`.
    pub text_size_px: Option<u32>,
    pub text_size_ratio: f64,
    pub text_color: String,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            kind: WatermarkKind::Date,
            text: None,
            image: None,
            anchor: "bottomRight".to_string(),
            size_ratio: 0.2,
            margin_px: None,
            margin_ratio: 0.045,
            text_size_px: None,
            text_size_ratio: 0.035,
            text_color: "#ffffff".to_string(),
        }
    }
}

/// Encoding and file naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// JPEG encoding quality (1 = worst, 100 = best).
    pub quality: u32,
    /// Output filename without extension. See [`crate::naming`].
    pub name_pattern: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            quality: 100,
            name_pattern: DEFAULT_PATTERN.to_string(),
        }
    }
}

/// Decode bounds and memory limits. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecodeConfig {
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    /// Overrides the probed device texture limit.
    pub max_texture_size: Option<u32>,
    /// Largest single decoded buffer, in MiB.
    pub memory_budget_mb: Option<u64>,
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel image processing workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Parse `#RRGGBB` or `#RRGGBBAA`.
pub fn parse_color(value: &str) -> Result<Rgba<u8>, String> {
    let hex = value
        .strip_prefix('#')
        .ok_or_else(|| format!("'{value}' must start with '#'"))?;
    if !(hex.len() == 6 || hex.len() == 8) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("'{value}' is not #RRGGBB or #RRGGBBAA"));
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string());
    let alpha = if hex.len() == 8 { channel(6)? } else { 0xFF };
    Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(DatemarkConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<DatemarkConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: DatemarkConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the given file.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<DatemarkConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Datemark Configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Command-line flags override values from this file.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Watermark
# ---------------------------------------------------------------------------
[watermark]
# What to stamp: "date" (capture date from EXIF, else file modification
# date), "text" (the `text` value) or "image" (the `image` file).
kind = "date"

# text = "(c) Jane Doe"
# image = "logo.png"

# Corner to pin the watermark to: topLeft, topRight, bottomLeft, bottomRight.
# Any other value stamps nothing.
anchor = "bottomRight"

# Image watermark width as a fraction of the photo width.
# Text watermarks are sized by text_size_* instead.
size_ratio = 0.2

# Distance from the two edges next to the anchor corner, as a fraction of
# the photo width. Set margin_px for a fixed distance.
margin_ratio = 0.045
# margin_px = 40

# Glyph size as a fraction of the photo height. Set text_size_px for a
# fixed size.
text_size_ratio = 0.035
# text_size_px = 48

# Text color as #RRGGBB or #RRGGBBAA.
text_color = "#ffffff"

# ---------------------------------------------------------------------------
# Output
# ---------------------------------------------------------------------------
[output]
# JPEG encoding quality (1 = worst, 100 = best).
quality = 100

# Output filename, ".jpg" is appended. Placeholders:
#   {date}  capture date, YYYY-MM-DD
#   {stem}  source filename without extension
#   {index} position of the source on the command line, from 0
name_pattern = "{date}_{index}"

# ---------------------------------------------------------------------------
# Decoding
# ---------------------------------------------------------------------------
[decode]
# Shrink large photos by powers of two until they are at most about twice
# these bounds. Set both or neither; omit to decode at full size.
# max_width = 4096
# max_height = 4096

# Largest texture the display can handle, in pixels. Omit to read
# DATEMARK_MAX_TEXTURE_SIZE from the environment (unset = no limit).
# max_texture_size = 8192

# Largest single decoded image buffer, in MiB. Photos that would exceed it
# are decoded at half size, then quarter size, and so on.
# memory_budget_mb = 256

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel image-processing workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
