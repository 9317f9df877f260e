//! # Datemark
//!
//! Stamps photos with their capture date (or a fixed text or logo) in one
//! corner, decoding each photo no larger than memory and the display allow.
//!
//! # Architecture: One Pipeline Per Photo
//!
//! ```text
//! metadata → bounds → factor → decode / crop → normalize → watermark → encode → write
//! ```
//!
//! Every run is independent. A batch submits one run per photo to a bounded
//! worker pool and collects exactly one result per photo, in submission order.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`imaging`] | Sample factors, bounded decode and crop ladders, orientation, compositing, JPEG encode |
//! | [`process`] | Job description, pipeline orchestration, worker pool, batch reports |
//! | [`metadata`] | EXIF orientation and capture date, with file-time fallback |
//! | [`device`] | Process-wide texture size limit |
//! | [`naming`] | Output filename patterns (`{date}_{index}`) |
//! | [`config`] | `config.toml` loading, validation, merging, job construction |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Degrade Instead of Failing
//!
//! Decoding a 50-megapixel photo at full size can exhaust memory on small
//! machines. Instead of failing, the decoder doubles its sample factor and
//! tries again, up to 1/512. Memory exhaustion is a regular
//! [`imaging::BackendError`] variant, and a [`imaging::MemoryBudget`] turns
//! "too big" into a deterministic check before any pixels are allocated.
//!
//! ## Power-of-Two Sampling
//!
//! Sample factors are always powers of two, matching what JPEG decoders can
//! produce cheaply. The starting factor is the larger of the one implied by
//! the decode bounds and the one implied by the texture limit.
//!
//! ## Pure-Rust Imaging
//!
//! The [`imaging`] module uses the `image` crate for decoding, resampling and
//! JPEG encoding, `jpeg-decoder` for JPEG decodes scaled inside the IDCT, and
//! `imageproc` for text drawn with an embedded font. Metadata comes from
//! `kamadak-exif`. There are no system dependencies; the binary is
//! self-contained.

pub mod config;
pub mod device;
pub mod imaging;
pub mod metadata;
pub mod naming;
pub mod output;
pub mod process;
