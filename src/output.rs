//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Stamp
//!
//! ```text
//! Stamping 3 photos
//! 001 IMG_0001.jpg
//!     Output: out/2020-09-09_0.jpg
//!     Size: 2000x1500 (1/2), rotated 90°
//! 002 IMG_0002.jpg
//!     Failed: Out of memory decoding IMG_0002.jpg: gave up after 10 attempts at factor 512
//! 003 IMG_0003.jpg
//!     Cancelled
//!
//! Stamped 1 of 3 photos (1 failed, 1 cancelled)
//! ```
//!
//! ## Inspect
//!
//! ```text
//! IMG_0001.jpg
//!     Size: 4000x3000
//!     Decode: 1/2 → 1500x2000
//!     Orientation: 90°
//!     Date: 2020-09-09
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::process::{ImageReport, Inspection, ProcessEvent, ReportStatus};

/// Format a 0-based position as a 1-based, 3-digit zero-padded index.
fn format_index(index: usize) -> String {
    format!("{:0>3}", index + 1)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn photos(n: usize) -> String {
    if n == 1 {
        "1 photo".to_string()
    } else {
        format!("{n} photos")
    }
}

/// Lines describing one finished image.
pub fn format_report(report: &ImageReport) -> Vec<String> {
    let mut lines = vec![format!("{} {}", format_index(report.index), report.source)];
    match &report.status {
        ReportStatus::Stamped {
            output,
            width,
            height,
            sample_size,
            rotation,
            ..
        } => {
            lines.push(format!("{}Output: {output}", indent(1)));
            let mut size = format!("{}Size: {width}x{height} (1/{sample_size})", indent(1));
            if *rotation != 0 {
                size.push_str(&format!(", rotated {rotation}°"));
            }
            lines.push(size);
        }
        ReportStatus::Failed { error } => lines.push(format!("{}Failed: {error}", indent(1))),
        ReportStatus::Cancelled => lines.push(format!("{}Cancelled", indent(1))),
    }
    lines
}

/// Format a single batch progress event as display lines.
pub fn format_process_event(event: &ProcessEvent) -> Vec<String> {
    match event {
        ProcessEvent::BatchStarted { image_count } => {
            vec![format!("Stamping {}", photos(*image_count))]
        }
        ProcessEvent::ImageFinished(report) => format_report(report),
    }
}

/// Closing summary line for a batch.
pub fn format_batch_summary(reports: &[ImageReport]) -> Vec<String> {
    let stamped = reports.iter().filter(|r| r.is_success()).count();
    let failed = reports
        .iter()
        .filter(|r| matches!(r.status, ReportStatus::Failed { .. }))
        .count();
    let cancelled = reports.len() - stamped - failed;

    let mut details = Vec::new();
    if failed > 0 {
        details.push(format!("{failed} failed"));
    }
    if cancelled > 0 {
        details.push(format!("{cancelled} cancelled"));
    }
    let mut line = format!("Stamped {stamped} of {}", photos(reports.len()));
    if !details.is_empty() {
        line.push_str(&format!(" ({})", details.join(", ")));
    }
    vec![String::new(), line]
}

pub fn print_batch_summary(reports: &[ImageReport]) {
    for line in format_batch_summary(reports) {
        println!("{}", line);
    }
}

/// Format the result of `inspect` for one source.
pub fn format_inspect(inspection: &Inspection) -> Vec<String> {
    let Inspection {
        source,
        original,
        sample_size,
        sampled,
        rotation,
        date,
    } = inspection;
    vec![
        source.clone(),
        format!("{}Size: {}x{}", indent(1), original.width, original.height),
        format!(
            "{}Decode: 1/{sample_size} → {}x{}",
            indent(1),
            sampled.width,
            sampled.height
        ),
        format!("{}Orientation: {rotation}°", indent(1)),
        format!(
            "{}Date: {}",
            indent(1),
            date.as_deref().unwrap_or("unknown")
        ),
    ]
}

pub fn print_inspect(inspection: &Inspection) {
    for line in format_inspect(inspection) {
        println!("{}", line);
    }
}
