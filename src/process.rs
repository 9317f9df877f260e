//! Watermark pipeline orchestration.
//!
//! One run turns one source into one stamped JPEG (or buffer):
//!
//! ```text
//! metadata → bounds → factor → decode / crop → normalize → watermark → encode → write
//! ```
//!
//! Every stage either hands its buffer to the next stage by value or drops
//! it, so a run never holds two full-size buffers longer than one transform.
//! Failures short-circuit into a [`WatermarkError`]; nothing is written
//! unless encoding has fully succeeded in memory.
//!
//! ## Sample factor
//!
//! The decode factor is the more aggressive of two:
//!
//! ```text
//! factor_for_bounds(w, h, max_width, max_height)   bounds default to the image itself
//! factor_for_device_limit(w, h, texture limit)     unknown limit → 1
//! ```
//!
//! The decode and crop ladders may push it further when memory runs out.
//!
//! ## Parallel Processing
//!
//! Runs are independent and share only immutable context, so a
//! [`WorkerPool`] executes them on a bounded [rayon](https://docs.rs/rayon)
//! pool. Each submission returns a [`TaskHandle`] that can cancel the run
//! or wait for its single result. Cancellation is checked before the run
//! starts and before the result is delivered; a run already decoding
//! finishes first.

use crate::device;
use crate::imaging::{
    Anchor, Destination, Dimensions, FittedRect, ImageBackend, ImageSource, MemoryBudget, Overlay,
    PixelBuffer, Quality, Renderer, Rotation, RustBackend, RustRenderer, Sampled, TextOverlay,
    TextStyle, WatermarkSpec, combined_factor, composite, crop_region, decode, decode_bounds,
    factor_for_bounds, factor_for_device_limit, normalize, sampled_dimensions,
};
use crate::metadata::{ExifReader, ImageMetadata, MetadataReader, resolve_date};
use crate::naming::{self, NameFields};
use image::Rgba;
use log::{debug, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatermarkError {
    #[error("Cannot read {source_id}: {reason}")]
    UnreadableSource { source_id: String, reason: String },
    #[error(
        "Out of memory decoding {source_id}: gave up after {attempts} attempts at factor {last_factor}"
    )]
    DecodeExhausted {
        source_id: String,
        attempts: u32,
        last_factor: u32,
    },
    #[error("Out of memory cropping {source_id}: gave up after {attempts} attempts")]
    CropExhausted { source_id: String, attempts: u32 },
    #[error("Cannot write {destination}: {reason}")]
    WriteFailure { destination: String, reason: String },
    #[error("Invalid job: {0}")]
    InvalidJob(String),
}

/// A length given in pixels or as a fraction of a reference dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Length {
    Pixels(u32),
    Fraction(f64),
}

impl Length {
    /// Pixels for a given reference size. Fractions are truncated.
    pub fn resolve(self, reference: u32) -> u32 {
        match self {
            Self::Pixels(px) => px,
            Self::Fraction(f) => (reference as f64 * f) as u32,
        }
    }
}

/// Texture size limit used when picking the decode factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureLimit {
    /// Ask [`device::max_texture_size`].
    #[default]
    Device,
    Fixed(u32),
    Unlimited,
}

impl TextureLimit {
    fn resolve(self) -> Option<u32> {
        match self {
            Self::Device => device::max_texture_size(),
            Self::Fixed(px) => Some(px),
            Self::Unlimited => None,
        }
    }
}

/// What the watermark shows.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayKind {
    /// The capture date, `YYYY-MM-DD`.
    Date,
    Text(String),
    Image(Arc<PixelBuffer>),
}

/// Everything one run needs to know.
#[derive(Clone)]
pub struct WatermarkJob {
    pub source: Arc<dyn ImageSource>,
    pub destination: Destination,
    pub overlay: OverlayKind,
    /// Image overlay width as a fraction of the stamped image width.
    pub size_ratio: f32,
    pub anchor: Anchor,
    /// Margin from the anchor edges; fractions are of the stamped width.
    pub margin: Length,
    /// Glyph size for text overlays; fractions are of the stamped height.
    pub text_size: Length,
    pub text_color: Rgba<u8>,
    pub quality: Quality,
    /// Decode bounds. `None` decodes at full size unless memory or the
    /// texture limit say otherwise.
    pub max_bounds: Option<(u32, u32)>,
    pub texture_limit: TextureLimit,
    pub budget: MemoryBudget,
    pub crop: Option<FittedRect>,
}

impl WatermarkJob {
    /// Date watermark in white at the bottom-right corner, 4.5 % of the
    /// width in from the edges, glyphs 3.5 % of the height, JPEG quality 100.
    pub fn new(source: Arc<dyn ImageSource>, destination: Destination) -> Self {
        Self {
            source,
            destination,
            overlay: OverlayKind::Date,
            size_ratio: 0.2,
            anchor: Anchor::BottomRight,
            margin: Length::Fraction(0.045),
            text_size: Length::Fraction(0.035),
            text_color: Rgba([0xFF, 0xFF, 0xFF, 0xFF]),
            quality: Quality::default(),
            max_bounds: None,
            texture_limit: TextureLimit::default(),
            budget: MemoryBudget::unlimited(),
            crop: None,
        }
    }

    fn needs_date(&self) -> bool {
        let named_by_date = matches!(
            &self.destination,
            Destination::Directory { pattern, .. } if pattern.uses_date()
        );
        self.overlay == OverlayKind::Date || named_by_date
    }
}

/// Collaborators shared by every run.
#[derive(Clone)]
pub struct PipelineContext {
    pub backend: Arc<dyn ImageBackend>,
    pub renderer: Arc<dyn Renderer>,
    pub metadata: Arc<dyn MetadataReader>,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self {
            backend: Arc::new(RustBackend::new()),
            renderer: Arc::new(RustRenderer::new()),
            metadata: Arc::new(ExifReader::new()),
        }
    }
}

/// Where the stamped image ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Written(PathBuf),
    Buffer(PixelBuffer),
}

/// A successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped {
    pub output: Output,
    /// Intrinsic size of the source.
    pub original: Dimensions,
    /// Size of the stamped image.
    pub dimensions: Dimensions,
    pub sample_size: u32,
    pub rotation: Rotation,
    pub date: Option<String>,
}

pub type OperationResult = Result<Stamped, WatermarkError>;

/// Cooperative cancellation flag shared between a run and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Execute one job. `None` means the run was cancelled and delivers nothing.
///
/// Cancellation is checked before any work starts and again before the
/// result is encoded and written, so a run cancelled mid-way leaves no file.
pub fn run(ctx: &PipelineContext, job: &WatermarkJob, cancel: &CancelToken) -> Option<OperationResult> {
    if cancel.is_cancelled() {
        debug!("{}: cancelled before start", job.source.id());
        return None;
    }
    let prepared = prepare(ctx, job);
    if cancel.is_cancelled() {
        debug!("{}: cancelled before delivery", job.source.id());
        return None;
    }
    Some(prepared.and_then(|prepared| finish(ctx, job, prepared)))
}

/// A stamped buffer waiting for delivery.
struct Prepared {
    buffer: PixelBuffer,
    original: Dimensions,
    sample_size: u32,
    rotation: Rotation,
    date: Option<String>,
}

fn prepare(ctx: &PipelineContext, job: &WatermarkJob) -> Result<Prepared, WatermarkError> {
    let source = job.source.as_ref();
    let id = source.id();
    let backend = ctx.backend.as_ref();
    info!("{id}: stamping");

    let metadata = ctx.metadata.read(source).unwrap_or_else(|e| {
        warn!("{id}: metadata unavailable, assuming upright: {e}");
        ImageMetadata::default()
    });
    let date = resolve_date(&metadata, source.modified());
    if date.is_none() && job.needs_date() {
        return Err(WatermarkError::InvalidJob(format!(
            "{id} has no capture date or modification time"
        )));
    }

    let original = decode_bounds(backend, source)?;
    let plan = DecodePlan::new(job, original);
    debug!(
        "{id}: {}x{} → factor {} (bounds {}x{}, texture {:?})",
        original.width,
        original.height,
        plan.factor,
        plan.bounds.0,
        plan.bounds.1,
        plan.texture_limit
    );

    let Sampled {
        buffer,
        sample_size,
    } = match job.crop {
        Some(rect) => crop_region(backend, source, rect, original, plan.crop_target(), &job.budget)?,
        None => decode(backend, source, plan.factor, &job.budget)?,
    };

    let upright = normalize(ctx.renderer.as_ref(), buffer, metadata.rotation);
    let spec = watermark_spec(job, &upright, date.as_deref())?;
    let buffer = composite(ctx.renderer.as_ref(), &upright, &spec);

    Ok(Prepared {
        buffer,
        original,
        sample_size,
        rotation: metadata.rotation,
        date,
    })
}

fn finish(ctx: &PipelineContext, job: &WatermarkJob, prepared: Prepared) -> OperationResult {
    let id = job.source.id();
    let Prepared {
        buffer,
        original,
        sample_size,
        rotation,
        date,
    } = prepared;
    let dimensions = Dimensions::new(buffer.width(), buffer.height());
    let output = deliver(ctx, job, buffer, date.as_deref(), &id)?;
    info!(
        "{id}: done at 1/{sample_size}, {}x{}",
        dimensions.width, dimensions.height
    );

    Ok(Stamped {
        output,
        original,
        dimensions,
        sample_size,
        rotation,
        date,
    })
}

/// Starting factor and limits for one source.
struct DecodePlan {
    bounds: (u32, u32),
    texture_limit: Option<u32>,
    factor: u32,
}

impl DecodePlan {
    fn new(job: &WatermarkJob, original: Dimensions) -> Self {
        let bounds = job.max_bounds.unwrap_or((original.width, original.height));
        let texture_limit = job.texture_limit.resolve();
        let factor = combined_factor(
            factor_for_bounds(original.width, original.height, bounds.0, bounds.1),
            factor_for_device_limit(original.width, original.height, texture_limit),
        );
        Self {
            bounds,
            texture_limit,
            factor,
        }
    }

    /// Crop output bounds, clamped to the texture limit.
    fn crop_target(&self) -> (u32, u32) {
        match self.texture_limit {
            Some(limit) => (self.bounds.0.min(limit), self.bounds.1.min(limit)),
            None => self.bounds,
        }
    }
}

/// What a run would do with a source, without decoding any pixels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inspection {
    pub source: String,
    pub original: Dimensions,
    pub sample_size: u32,
    /// Size after sampling and before any memory degradation.
    pub sampled: Dimensions,
    /// Clockwise degrees applied to stand the image upright.
    pub rotation: u32,
    pub date: Option<String>,
}

/// Read metadata and bounds and report the planned decode.
pub fn inspect(ctx: &PipelineContext, job: &WatermarkJob) -> Result<Inspection, WatermarkError> {
    let source = job.source.as_ref();
    let metadata = ctx.metadata.read(source).unwrap_or_else(|e| {
        warn!("{}: metadata unavailable: {e}", source.id());
        ImageMetadata::default()
    });
    let original = decode_bounds(ctx.backend.as_ref(), source)?;
    let plan = DecodePlan::new(job, original);
    let sampled = sampled_dimensions(original, plan.factor);
    let upright = match metadata.rotation {
        Rotation::Cw90 | Rotation::Cw270 => Dimensions::new(sampled.height, sampled.width),
        _ => sampled,
    };
    Ok(Inspection {
        source: source.id(),
        original,
        sample_size: plan.factor,
        sampled: upright,
        rotation: metadata.rotation.degrees(),
        date: resolve_date(&metadata, source.modified()),
    })
}

fn watermark_spec(
    job: &WatermarkJob,
    base: &PixelBuffer,
    date: Option<&str>,
) -> Result<WatermarkSpec, WatermarkError> {
    let text = |text: &str| {
        Overlay::Text(TextOverlay {
            text: text.to_string(),
            style: TextStyle {
                size: job.text_size.resolve(base.height()).max(1),
                color: job.text_color,
            },
        })
    };
    let overlay = match &job.overlay {
        OverlayKind::Image(image) => Overlay::Image(PixelBuffer::clone(image)),
        OverlayKind::Text(value) => text(value),
        OverlayKind::Date => text(date.ok_or_else(|| {
            WatermarkError::InvalidJob(format!("{} has no date to stamp", job.source.id()))
        })?),
    };
    let margin = job.margin.resolve(base.width());
    debug!(
        "{}: watermark at {} margin {margin}px",
        job.source.id(),
        job.anchor.name()
    );
    Ok(WatermarkSpec {
        overlay,
        size_ratio: job.size_ratio,
        anchor: job.anchor.clone(),
        margin,
    })
}

/// Encode and write, or hand the buffer back for in-memory destinations.
fn deliver(
    ctx: &PipelineContext,
    job: &WatermarkJob,
    buffer: PixelBuffer,
    date: Option<&str>,
    id: &str,
) -> Result<Output, WatermarkError> {
    let path = match &job.destination {
        Destination::Memory => return Ok(Output::Buffer(buffer)),
        Destination::File(path) => path.clone(),
        Destination::Directory {
            dir,
            pattern,
            index,
        } => {
            let stem = naming::source_stem(id);
            let fields = NameFields {
                date,
                stem: &stem,
                index: *index,
            };
            dir.join(pattern.render(&fields).map_err(WatermarkError::InvalidJob)?)
        }
    };
    let write_failure = |reason: String| WatermarkError::WriteFailure {
        destination: path.display().to_string(),
        reason,
    };

    let bytes = ctx
        .backend
        .encode_jpeg(&buffer, job.quality)
        .map_err(|e| write_failure(e.to_string()))?;
    drop(buffer);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_failure(e.to_string()))?;
    }
    std::fs::write(&path, bytes).map_err(|e| write_failure(e.to_string()))?;
    debug!("{id}: wrote {}", path.display());
    Ok(Output::Written(path))
}

// =============================================================================
// Worker pool
// =============================================================================

/// Handle on one submitted run.
pub struct TaskHandle {
    cancel: CancelToken,
    receiver: Receiver<OperationResult>,
}

impl TaskHandle {
    /// Ask the run not to start, or not to deliver if it already started.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the run finishes. `None` when it was cancelled.
    pub fn wait(self) -> Option<OperationResult> {
        self.receiver.recv().ok()
    }
}

/// Bounded pool executing watermark runs.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    ctx: PipelineContext,
}

impl WorkerPool {
    pub fn new(ctx: PipelineContext, threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("datemark-worker-{i}"))
            .build()?;
        Ok(Self { pool, ctx })
    }

    pub fn submit(&self, job: WatermarkJob) -> TaskHandle {
        self.submit_cancellable(job, CancelToken::new())
    }

    /// Submit under an existing token, e.g. one shared by a whole batch.
    pub fn submit_cancellable(&self, job: WatermarkJob, cancel: CancelToken) -> TaskHandle {
        let (tx, rx) = mpsc::channel();
        self.submit_with(job, cancel.clone(), move |result| {
            // The handle may already be gone; nobody is waiting then.
            tx.send(result).ok();
        });
        TaskHandle {
            cancel,
            receiver: rx,
        }
    }

    /// Submit and deliver the result to `continuation` on the worker thread.
    /// A cancelled run never calls it.
    pub fn submit_with<F>(&self, job: WatermarkJob, cancel: CancelToken, continuation: F)
    where
        F: FnOnce(OperationResult) + Send + 'static,
    {
        let ctx = self.ctx.clone();
        self.pool.spawn(move || {
            if let Some(result) = run(&ctx, &job, &cancel) {
                continuation(result);
            }
        });
    }

    /// Run every job, reporting each one as it completes in submission order.
    pub fn run_batch(
        &self,
        jobs: Vec<WatermarkJob>,
        cancel: &CancelToken,
        events: Option<Sender<ProcessEvent>>,
    ) -> Vec<ImageReport> {
        if let Some(tx) = &events {
            tx.send(ProcessEvent::BatchStarted {
                image_count: jobs.len(),
            })
            .ok();
        }
        let handles: Vec<(String, TaskHandle)> = jobs
            .into_iter()
            .map(|job| (job.source.id(), self.submit_cancellable(job, cancel.clone())))
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(index, (source, handle))| {
                let report = ImageReport::new(index, source, handle.wait().as_ref());
                if let Some(tx) = &events {
                    tx.send(ProcessEvent::ImageFinished(report.clone())).ok();
                }
                report
            })
            .collect()
    }
}

// =============================================================================
// Reporting
// =============================================================================

/// Progress events emitted by [`WorkerPool::run_batch`].
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    BatchStarted { image_count: usize },
    ImageFinished(ImageReport),
}

/// Serializable outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageReport {
    pub index: usize,
    pub source: String,
    #[serde(flatten)]
    pub status: ReportStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportStatus {
    Stamped {
        output: String,
        width: u32,
        height: u32,
        sample_size: u32,
        rotation: u32,
        date: Option<String>,
    },
    Failed {
        error: String,
    },
    Cancelled,
}

impl ImageReport {
    pub fn new(index: usize, source: String, result: Option<&OperationResult>) -> Self {
        let status = match result {
            None => ReportStatus::Cancelled,
            Some(Err(e)) => ReportStatus::Failed {
                error: e.to_string(),
            },
            Some(Ok(stamped)) => ReportStatus::Stamped {
                output: match &stamped.output {
                    Output::Written(path) => path.display().to_string(),
                    Output::Buffer(_) => Destination::Memory.describe(),
                },
                width: stamped.dimensions.width,
                height: stamped.dimensions.height,
                sample_size: stamped.sample_size,
                rotation: stamped.rotation.degrees(),
                date: stamped.date.clone(),
            },
        };
        Self {
            index,
            source,
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ReportStatus::Stamped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{CountingSource, MockBackend, RecordedOp};
    use crate::imaging::rust_backend::tests::test_jpeg_bytes;
    use crate::imaging::MemorySource;
    use crate::metadata::MetadataError;
    use crate::naming::NamePattern;
    use std::io;
    use tempfile::TempDir;

    /// Metadata reader returning fixed values.
    struct FixedMetadata(ImageMetadata);

    impl MetadataReader for FixedMetadata {
        fn read(&self, _source: &dyn ImageSource) -> Result<ImageMetadata, MetadataError> {
            Ok(self.0.clone())
        }
    }

    /// Reader that cancels the run it is reading for.
    struct CancellingMetadata(CancelToken);

    impl MetadataReader for CancellingMetadata {
        fn read(&self, _source: &dyn ImageSource) -> Result<ImageMetadata, MetadataError> {
            self.0.cancel();
            Ok(dated(Rotation::None))
        }
    }

    struct BrokenMetadata;

    impl MetadataReader for BrokenMetadata {
        fn read(&self, _source: &dyn ImageSource) -> Result<ImageMetadata, MetadataError> {
            Err(MetadataError::Io(io::Error::other("corrupt")))
        }
    }

    fn dated(rotation: Rotation) -> ImageMetadata {
        ImageMetadata {
            rotation,
            date_time: Some("2020:09:09 10:11:12".into()),
            ..ImageMetadata::default()
        }
    }

    fn mock_ctx(backend: Arc<MockBackend>, metadata: ImageMetadata) -> PipelineContext {
        PipelineContext {
            backend,
            renderer: Arc::new(RustRenderer::new()),
            metadata: Arc::new(FixedMetadata(metadata)),
        }
    }

    fn memory_job(source: Arc<dyn ImageSource>) -> WatermarkJob {
        WatermarkJob {
            texture_limit: TextureLimit::Unlimited,
            ..WatermarkJob::new(source, Destination::Memory)
        }
    }

    fn buffer_of(result: Option<OperationResult>) -> (Stamped, PixelBuffer) {
        let stamped = result.expect("not cancelled").expect("run succeeded");
        match &stamped.output {
            Output::Buffer(buf) => {
                let buf = buf.clone();
                (stamped, buf)
            }
            other => panic!("expected buffer, got {other:?}"),
        }
    }

    // =========================================================================
    // Length tests
    // =========================================================================

    #[test]
    fn length_fraction_truncates() {
        assert_eq!(Length::Fraction(0.045).resolve(1000), 45);
        assert_eq!(Length::Fraction(0.035).resolve(3000), 105);
        assert_eq!(Length::Fraction(0.045).resolve(10), 0);
        assert_eq!(Length::Pixels(12).resolve(5000), 12);
    }

    // =========================================================================
    // run tests
    // =========================================================================

    #[test]
    fn end_to_end_degrades_until_budget_fits() {
        let backend = Arc::new(MockBackend::new(4000, 3000));
        let ctx = mock_ctx(backend.clone(), dated(Rotation::None));
        let budget = MemoryBudget::bytes(MemoryBudget::buffer_bytes(1000, 750));
        let job = WatermarkJob {
            budget,
            ..memory_job(Arc::new(CountingSource::new("big.jpg")))
        };

        let (stamped, buffer) = buffer_of(run(&ctx, &job, &CancelToken::new()));
        let f = stamped.sample_size;
        let expected = sampled_dimensions(Dimensions::new(4000, 3000), f);
        assert_eq!(f, 4);
        assert_eq!(buffer.dimensions(), (expected.width, expected.height));
        assert_eq!(stamped.original, Dimensions::new(4000, 3000));
        assert_eq!(backend.decode_factors(), vec![1, 2, 4]);
        assert_eq!(stamped.date.as_deref(), Some("2020-09-09"));
    }

    #[test]
    fn max_bounds_pick_starting_factor() {
        let backend = Arc::new(MockBackend::new(4000, 3000));
        let ctx = mock_ctx(backend.clone(), dated(Rotation::None));
        let job = WatermarkJob {
            max_bounds: Some((1000, 1000)),
            ..memory_job(Arc::new(CountingSource::new("big.jpg")))
        };
        let (stamped, _) = buffer_of(run(&ctx, &job, &CancelToken::new()));
        assert_eq!(stamped.sample_size, 2);
        assert_eq!(backend.decode_factors(), vec![2]);
    }

    #[test]
    fn texture_limit_wins_when_stricter() {
        let backend = Arc::new(MockBackend::new(4000, 3000));
        let ctx = mock_ctx(backend.clone(), dated(Rotation::None));
        let job = WatermarkJob {
            max_bounds: Some((1000, 1000)),
            texture_limit: TextureLimit::Fixed(900),
            ..memory_job(Arc::new(CountingSource::new("big.jpg")))
        };
        let (stamped, buffer) = buffer_of(run(&ctx, &job, &CancelToken::new()));
        assert_eq!(stamped.sample_size, 8);
        assert_eq!(buffer.dimensions(), (500, 375));
    }

    #[test]
    fn rotation_swaps_dimensions() {
        let backend = Arc::new(MockBackend::new(400, 300));
        let ctx = mock_ctx(backend, dated(Rotation::Cw90));
        let job = memory_job(Arc::new(CountingSource::new("turned.jpg")));
        let (stamped, buffer) = buffer_of(run(&ctx, &job, &CancelToken::new()));
        assert_eq!(buffer.dimensions(), (300, 400));
        assert_eq!(stamped.rotation, Rotation::Cw90);
        assert_eq!(stamped.dimensions, Dimensions::new(300, 400));
    }

    #[test]
    fn date_text_is_stamped_bottom_right() {
        let backend = Arc::new(MockBackend::new(1000, 800));
        let ctx = mock_ctx(backend, dated(Rotation::None));
        let job = WatermarkJob {
            text_color: Rgba([255, 0, 255, 255]),
            ..memory_job(Arc::new(CountingSource::new("a.jpg")))
        };
        let (_, buffer) = buffer_of(run(&ctx, &job, &CancelToken::new()));

        // margin 45, 28 px line: box ends at (955, 755)
        let magenta: Vec<(u32, u32)> = buffer
            .enumerate_pixels()
            .filter(|(_, _, p)| **p == Rgba([255, 0, 255, 255]))
            .map(|(x, y, _)| (x, y))
            .collect();
        assert!(!magenta.is_empty());
        assert!(magenta.iter().all(|&(x, y)| x >= 500 && x < 955 && y >= 700 && y < 755));
    }

    #[test]
    fn crop_path_used_when_rect_given() {
        let backend = Arc::new(MockBackend::new(1000, 800));
        let ctx = mock_ctx(backend.clone(), dated(Rotation::None));
        let job = WatermarkJob {
            crop: FittedRect::new(0.0, 0.0, 0.5, 0.5),
            ..memory_job(Arc::new(CountingSource::new("a.jpg")))
        };
        let (_, buffer) = buffer_of(run(&ctx, &job, &CancelToken::new()));
        assert_eq!(buffer.dimensions(), (500, 400));
        assert!(!backend.region_factors().is_empty());
    }

    #[test]
    fn broken_metadata_is_not_fatal() {
        let backend = Arc::new(MockBackend::new(100, 100));
        let ctx = PipelineContext {
            metadata: Arc::new(BrokenMetadata),
            ..mock_ctx(backend, ImageMetadata::default())
        };
        let job = WatermarkJob {
            overlay: OverlayKind::Text("hello".into()),
            ..memory_job(Arc::new(CountingSource::new("a.jpg")))
        };
        let (stamped, _) = buffer_of(run(&ctx, &job, &CancelToken::new()));
        assert_eq!(stamped.rotation, Rotation::None);
        assert_eq!(stamped.date, None);
    }

    #[test]
    fn missing_date_fails_before_decoding() {
        let backend = Arc::new(MockBackend::new(100, 100));
        let ctx = mock_ctx(backend.clone(), ImageMetadata::default());
        let job = memory_job(Arc::new(CountingSource::new("undated.jpg")));
        let result = run(&ctx, &job, &CancelToken::new()).unwrap();
        assert!(matches!(result, Err(WatermarkError::InvalidJob(_))));
        assert!(backend.get_operations().is_empty());
    }

    #[test]
    fn decode_exhaustion_is_reported() {
        let backend = Arc::new(MockBackend::new(4000, 3000));
        let ctx = mock_ctx(backend, dated(Rotation::None));
        let job = WatermarkJob {
            budget: MemoryBudget::bytes(0),
            ..memory_job(Arc::new(CountingSource::new("huge.jpg")))
        };
        let err = run(&ctx, &job, &CancelToken::new()).unwrap().unwrap_err();
        assert!(matches!(
            err,
            WatermarkError::DecodeExhausted {
                last_factor: 512,
                ..
            }
        ));
    }

    #[test]
    fn image_overlay_is_scaled_by_ratio() {
        let backend = Arc::new(MockBackend::new(1000, 800));
        let ctx = mock_ctx(backend, dated(Rotation::None));
        let blue = Rgba([0, 0, 255, 255]);
        let job = WatermarkJob {
            overlay: OverlayKind::Image(Arc::new(PixelBuffer::from_pixel(200, 100, blue))),
            size_ratio: 0.1,
            anchor: Anchor::TopLeft,
            margin: Length::Pixels(10),
            ..memory_job(Arc::new(CountingSource::new("a.jpg")))
        };
        let (_, buffer) = buffer_of(run(&ctx, &job, &CancelToken::new()));
        assert_eq!(*buffer.get_pixel(10, 10), blue);
        assert_eq!(*buffer.get_pixel(109, 59), blue);
        assert_ne!(*buffer.get_pixel(110, 60), blue);
    }

    // =========================================================================
    // Destination tests
    // =========================================================================

    #[test]
    fn writes_named_jpeg_into_directory() {
        let tmp = TempDir::new().unwrap();
        let source = Arc::new(MemorySource::new("IMG_1.jpg", test_jpeg_bytes(64, 48)));
        let ctx = PipelineContext {
            metadata: Arc::new(FixedMetadata(dated(Rotation::None))),
            ..PipelineContext::default()
        };
        let job = WatermarkJob {
            texture_limit: TextureLimit::Unlimited,
            ..WatermarkJob::new(
                source,
                Destination::Directory {
                    dir: tmp.path().join("out"),
                    pattern: NamePattern::default(),
                    index: 3,
                },
            )
        };

        let stamped = run(&ctx, &job, &CancelToken::new()).unwrap().unwrap();
        let expected = tmp.path().join("out").join("2020-09-09_3.jpg");
        assert_eq!(stamped.output, Output::Written(expected.clone()));
        let written = image::open(&expected).unwrap();
        assert_eq!((written.width(), written.height()), (64, 48));
    }

    #[test]
    fn encode_uses_requested_quality() {
        let tmp = TempDir::new().unwrap();
        let backend = Arc::new(MockBackend::new(40, 30));
        let ctx = mock_ctx(backend.clone(), dated(Rotation::None));
        let job = WatermarkJob {
            quality: Quality::new(80),
            texture_limit: TextureLimit::Unlimited,
            ..WatermarkJob::new(
                Arc::new(CountingSource::new("a.jpg")),
                Destination::File(tmp.path().join("a.jpg")),
            )
        };
        run(&ctx, &job, &CancelToken::new()).unwrap().unwrap();
        assert!(backend.get_operations().contains(&RecordedOp::Encode {
            width: 40,
            height: 30,
            quality: 80
        }));
        assert!(tmp.path().join("a.jpg").exists());
    }

    #[test]
    fn unwritable_destination_is_write_failure() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let backend = Arc::new(MockBackend::new(10, 10));
        let ctx = mock_ctx(backend, dated(Rotation::None));
        let job = WatermarkJob {
            texture_limit: TextureLimit::Unlimited,
            ..WatermarkJob::new(
                Arc::new(CountingSource::new("a.jpg")),
                Destination::File(blocker.join("out.jpg")),
            )
        };
        let err = run(&ctx, &job, &CancelToken::new()).unwrap().unwrap_err();
        assert!(matches!(err, WatermarkError::WriteFailure { .. }));
    }

    // =========================================================================
    // Cancellation and pool tests
    // =========================================================================

    #[test]
    fn cancelled_before_start_has_no_effects() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("never.jpg");
        let backend = Arc::new(MockBackend::new(100, 100));
        let ctx = mock_ctx(backend.clone(), dated(Rotation::None));
        let source = Arc::new(CountingSource::new("a.jpg"));
        let job = WatermarkJob::new(source.clone(), Destination::File(out.clone()));

        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(run(&ctx, &job, &cancel).is_none());
        assert!(!out.exists());
        assert_eq!(source.open_count(), 0);
        assert!(backend.get_operations().is_empty());
    }

    #[test]
    fn cancelled_mid_run_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("never.jpg");
        let backend = Arc::new(MockBackend::new(100, 100));
        let cancel = CancelToken::new();
        let ctx = PipelineContext {
            metadata: Arc::new(CancellingMetadata(cancel.clone())),
            ..mock_ctx(backend.clone(), ImageMetadata::default())
        };
        let job = WatermarkJob::new(
            Arc::new(CountingSource::new("a.jpg")),
            Destination::File(out.clone()),
        );

        assert!(run(&ctx, &job, &cancel).is_none());
        assert!(cancel.is_cancelled());
        assert!(!out.exists());
        assert!(
            !backend
                .get_operations()
                .iter()
                .any(|op| matches!(op, RecordedOp::Encode { .. }))
        );
    }

    #[test]
    fn continuation_skipped_when_cancelled_mid_run() {
        let backend = Arc::new(MockBackend::new(50, 40));
        let cancel = CancelToken::new();
        let ctx = PipelineContext {
            metadata: Arc::new(CancellingMetadata(cancel.clone())),
            ..mock_ctx(backend, ImageMetadata::default())
        };
        let pool = WorkerPool::new(ctx, 1).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit_with(
            memory_job(Arc::new(CountingSource::new("a.jpg"))),
            cancel.clone(),
            move |result| tx.send(result.is_ok()).unwrap(),
        );
        // The sender is dropped unused once the run ends without delivering.
        assert!(rx.recv().is_err());
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn pool_delivers_one_result_per_submission() {
        let backend = Arc::new(MockBackend::new(50, 40));
        let pool = WorkerPool::new(mock_ctx(backend, dated(Rotation::None)), 2).unwrap();
        let handles: Vec<TaskHandle> = (0..4)
            .map(|_| pool.submit(memory_job(Arc::new(CountingSource::new("a.jpg")))))
            .collect();
        for handle in handles {
            let result = handle.wait().expect("delivered");
            assert!(result.is_ok());
        }
    }

    #[test]
    fn pool_skips_cancelled_submission() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("never.jpg");
        let backend = Arc::new(MockBackend::new(50, 40));
        let pool = WorkerPool::new(mock_ctx(backend, dated(Rotation::None)), 1).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let job = WatermarkJob::new(
            Arc::new(CountingSource::new("a.jpg")),
            Destination::File(out.clone()),
        );
        let handle = pool.submit_cancellable(job, cancel);
        assert!(handle.wait().is_none());
        assert!(!out.exists());
    }

    #[test]
    fn submit_with_calls_continuation() {
        let backend = Arc::new(MockBackend::new(50, 40));
        let pool = WorkerPool::new(mock_ctx(backend, dated(Rotation::None)), 1).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit_with(
            memory_job(Arc::new(CountingSource::new("a.jpg"))),
            CancelToken::new(),
            move |result| tx.send(result.is_ok()).unwrap(),
        );
        assert!(rx.recv().unwrap());
    }

    #[test]
    fn batch_reports_in_submission_order() {
        let backend = Arc::new(MockBackend::new(50, 40));
        let pool = WorkerPool::new(mock_ctx(backend, dated(Rotation::None)), 2).unwrap();
        let jobs = vec![
            memory_job(Arc::new(CountingSource::new("one.jpg"))),
            memory_job(Arc::new(CountingSource::failing("two.jpg"))),
        ];
        let (tx, rx) = mpsc::channel();
        let reports = pool.run_batch(jobs, &CancelToken::new(), Some(tx));

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].source, "one.jpg");
        assert!(reports[0].is_success());
        assert!(matches!(reports[1].status, ReportStatus::Failed { .. }));

        let events: Vec<ProcessEvent> = rx.iter().collect();
        assert!(matches!(events[0], ProcessEvent::BatchStarted { image_count: 2 }));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn report_serializes_with_status_tag() {
        let report = ImageReport::new(0, "a.jpg".into(), None);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "cancelled");
        assert_eq!(json["source"], "a.jpg");
    }

    // =========================================================================
    // inspect tests
    // =========================================================================

    #[test]
    fn inspect_reports_plan_without_decoding() {
        let backend = Arc::new(MockBackend::new(4000, 3000));
        let ctx = mock_ctx(backend.clone(), dated(Rotation::Cw90));
        let job = WatermarkJob {
            max_bounds: Some((1000, 1000)),
            ..memory_job(Arc::new(CountingSource::new("tall.jpg")))
        };

        let report = inspect(&ctx, &job).unwrap();
        assert_eq!(report.original, Dimensions::new(4000, 3000));
        assert_eq!(report.sample_size, 2);
        assert_eq!(report.sampled, Dimensions::new(1500, 2000));
        assert_eq!(report.rotation, 90);
        assert_eq!(report.date.as_deref(), Some("2020-09-09"));
        assert!(backend.decode_factors().is_empty());
    }

    #[test]
    fn inspect_unreadable_source_fails() {
        let backend = Arc::new(MockBackend::new(10, 10));
        let ctx = mock_ctx(backend, dated(Rotation::None));
        let job = memory_job(Arc::new(CountingSource::failing("gone.jpg")));
        assert!(matches!(
            inspect(&ctx, &job),
            Err(WatermarkError::UnreadableSource { .. })
        ));
    }
}
