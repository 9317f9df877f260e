//! Process-wide device limits.
//!
//! The largest texture the display stack can upload bounds how big a decoded
//! image may be, independent of memory. There is no GPU to ask on a headless
//! host, so the limit is read once from `DATEMARK_MAX_TEXTURE_SIZE` and
//! cached for the life of the process. When the variable is unset or not a
//! number the limit is unknown and does not constrain decoding.

use log::debug;
use std::sync::OnceLock;

/// Environment variable holding the texture limit in pixels.
pub const TEXTURE_SIZE_ENV: &str = "DATEMARK_MAX_TEXTURE_SIZE";

/// Smallest limit ever reported; smaller probe results are raised to this.
pub const MIN_TEXTURE_SIZE: u32 = 2048;

static MAX_TEXTURE_SIZE: OnceLock<Option<u32>> = OnceLock::new();

/// Memoized texture limit. Computed on first call, never reset.
pub fn max_texture_size() -> Option<u32> {
    *MAX_TEXTURE_SIZE.get_or_init(|| {
        let limit = parse_texture_size(std::env::var(TEXTURE_SIZE_ENV).ok().as_deref());
        debug!("device texture limit: {limit:?}");
        limit
    })
}

/// Interpret a raw probe value. Zero or garbage means unknown.
fn parse_texture_size(raw: Option<&str>) -> Option<u32> {
    let size: u32 = raw?.trim().parse().ok()?;
    if size == 0 {
        return None;
    }
    Some(size.max(MIN_TEXTURE_SIZE))
}
