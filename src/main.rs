use clap::{Parser, Subcommand};
use datemark::config::{self, DatemarkConfig};
use datemark::imaging::{Destination, FileSource, FittedRect, ImageSource};
use datemark::output;
use datemark::process::{self, CancelToken, OverlayKind, PipelineContext, WorkerPool};
use log::warn;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "datemark")]
#[command(about = "Stamp photos with their capture date, memory permitting")]
#[command(long_about = "\
Stamp photos with their capture date, memory permitting

Each photo is decoded at the largest size that fits the decode bounds, the
display texture limit and the memory budget, turned upright according to its
EXIF orientation, stamped in one corner and written out as a JPEG.

Watermark date (first available wins):
  EXIF DateTime → DateTimeOriginal → DateTimeDigitized → file modified time

Output names default to {date}_{index}.jpg, e.g. 2020-09-09_0.jpg.

Run 'datemark gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Config file (missing file = defaults)
    #[arg(long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watermark photos into an output directory
    Stamp(StampArgs),
    /// Show how a photo would be decoded, without decoding it
    Inspect {
        input: PathBuf,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct StampArgs {
    /// Photos to stamp
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory
    #[arg(long, short, default_value = "stamped")]
    out: PathBuf,

    /// Corner for the watermark (overrides config)
    #[arg(long)]
    anchor: Option<String>,

    /// JPEG quality 1-100 (overrides config)
    #[arg(long)]
    quality: Option<u32>,

    /// Crop to a fractional rectangle before stamping: left,top,right,bottom
    #[arg(long, value_parser = parse_crop)]
    crop: Option<FittedRect>,

    /// Print results as JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Stamp(args) => {
            let mut config = config::load_config(&cli.config)?;
            if let Some(anchor) = &args.anchor {
                config.watermark.anchor = anchor.clone();
            }
            if let Some(quality) = args.quality {
                config.output.quality = quality;
            }
            config.validate()?;
            stamp(&config, &cli.config, args)?;
        }
        Command::Inspect { input, json } => {
            let config = config::load_config(&cli.config)?;
            let source: Arc<dyn ImageSource> = Arc::new(FileSource::new(input));
            let job = config.job(source, Destination::Memory, OverlayKind::Date);
            let inspection = process::inspect(&PipelineContext::default(), &job)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&inspection)?);
            } else {
                output::print_inspect(&inspection);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn stamp(
    config: &DatemarkConfig,
    config_path: &Path,
    args: StampArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let overlay = config.overlay(config_dir(config_path))?;
    let pattern = config.name_pattern();

    let jobs: Vec<_> = args
        .inputs
        .iter()
        .enumerate()
        .filter(|(_, input)| {
            let stamped = is_inside(input, &args.out);
            if stamped {
                warn!("{}: already in {}, skipping", input.display(), args.out.display());
            }
            !stamped
        })
        .map(|(index, input)| {
            let source: Arc<dyn ImageSource> = Arc::new(FileSource::new(input));
            let destination = Destination::Directory {
                dir: args.out.clone(),
                pattern: pattern.clone(),
                index,
            };
            let mut job = config.job(source, destination, overlay.clone());
            job.crop = args.crop;
            job
        })
        .collect();

    let threads = config::effective_threads(&config.processing);
    let pool = WorkerPool::new(PipelineContext::default(), threads)?;
    let cancel = CancelToken::new();

    let reports = if args.json {
        let reports = pool.run_batch(jobs, &cancel, None);
        println!("{}", serde_json::to_string_pretty(&reports)?);
        reports
    } else {
        let (tx, rx) = std::sync::mpsc::channel();
        let printer = std::thread::spawn(move || {
            for event in rx {
                for line in output::format_process_event(&event) {
                    println!("{}", line);
                }
            }
        });
        let reports = pool.run_batch(jobs, &cancel, Some(tx));
        printer.join().ok();
        output::print_batch_summary(&reports);
        reports
    };

    let failed = reports.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        return Err(format!("{failed} of {} photos were not stamped", reports.len()).into());
    }
    Ok(())
}

/// Parse `left,top,right,bottom` fractions.
fn parse_crop(value: &str) -> Result<FittedRect, String> {
    let parts: Vec<f32> = value
        .split(',')
        .map(|p| p.trim().parse::<f32>().map_err(|e| format!("'{p}': {e}")))
        .collect::<Result<_, _>>()?;
    let [left, top, right, bottom] = parts[..] else {
        return Err("expected four values: left,top,right,bottom".into());
    };
    FittedRect::new(left, top, right, bottom)
        .ok_or_else(|| "need 0 <= left < right <= 1 and 0 <= top < bottom <= 1".into())
}

/// Directory that relative paths in the config file resolve against.
fn config_dir(config_path: &Path) -> &Path {
    config_path.parent().unwrap_or(Path::new("."))
}

/// Whether `input` sits directly in `dir`, i.e. is an earlier output.
fn is_inside(input: &Path, dir: &Path) -> bool {
    let (Ok(input), Ok(dir)) = (input.canonicalize(), dir.canonicalize()) else {
        return false;
    };
    input.parent() == Some(dir.as_path())
}
