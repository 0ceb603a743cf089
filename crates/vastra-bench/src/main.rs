//! vastra-bench: CLI tool for replaying landmark tracks through the overlay engine.
//!
//! Feeds a recorded track of per-frame landmark sets through one
//! try-on session, printing per-stage diagnostics for every frame and an
//! aggregate summary. Useful for:
//!
//! - Tuning the confidence threshold and smoothing window against real
//!   detector output
//! - Checking freeze behaviour through detector dropouts
//! - Measuring per-stage durations to identify bottlenecks
//! - Eyeballing garment placement on a background frame
//!
//! # Track format
//!
//! A JSON array with one entry per frame: either `null` (no subject) or
//! `{"landmarks": [{"name": "left_shoulder", "position": {"x": .., "y": ..},
//! "visibility": ..}, ..]}`.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin vastra-bench -- [OPTIONS] <TRACK_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;
use vastra_overlay::diagnostics::{Clock, FrameDiagnostics};
use vastra_overlay::{
    Dimensions, GarmentVariant, LandmarkSet, OverlayConfig, OverlayEngine, OverlayStatus,
    ReplaySource, Rgb, RgbaImage,
};

/// Landmark track replay and diagnostics for vastra.
///
/// Runs every frame of a recorded landmark track through the overlay
/// engine and prints per-stage timing and freeze diagnostics.
#[derive(Parser)]
#[command(name = "vastra-bench", version)]
struct Cli {
    /// Path to the landmark track (JSON).
    track_path: PathBuf,

    /// Background frame (PNG, JPEG, BMP, WebP). A flat grey frame is
    /// used when omitted.
    #[arg(long)]
    frame: Option<PathBuf>,

    /// Width of the generated background frame.
    #[arg(long, default_value_t = 640, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    width: u32,

    /// Height of the generated background frame.
    #[arg(long, default_value_t = 480, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    height: u32,

    /// Track positions are normalized to `[0, 1]` and scaled by the
    /// frame size.
    #[arg(long)]
    normalized: bool,

    /// Garment to draw (tshirt, shirt, kurta, dress, hoodie, jacket).
    #[arg(long, default_value = "tshirt")]
    variant: GarmentVariant,

    /// Garment colour as `#RRGGBB`.
    #[arg(long, default_value = "#667EEA")]
    color: Rgb,

    /// Render low-confidence frames live instead of holding the last
    /// stable render.
    #[arg(long)]
    no_freeze: bool,

    /// Minimum stabilized confidence for a pose to count as stable.
    #[arg(long, default_value_t = OverlayConfig::DEFAULT_CONFIDENCE_THRESHOLD)]
    confidence_threshold: f64,

    /// Number of recent samples averaged by the stabilizer.
    #[arg(long, default_value_t = OverlayConfig::DEFAULT_SMOOTHING_WINDOW, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    smoothing_window: usize,

    /// Shoulder tilt (radians) above which the garment is rotated.
    #[arg(long, default_value_t = OverlayConfig::DEFAULT_TILT_THRESHOLD)]
    tilt_threshold: f64,

    /// Drop the frozen state after this many consecutive frozen frames.
    #[arg(long)]
    max_frozen_frames: Option<u32>,

    /// Write composited frames as PNGs into this directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Output one JSON record per frame instead of human-readable reports.
    #[arg(long)]
    json: bool,

    /// Full overlay config as a JSON string.
    ///
    /// When provided, all other config flags are ignored. The JSON must
    /// be a valid `OverlayConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// One line of `--json` output.
#[derive(Serialize)]
struct FrameRecord<'a> {
    frame: usize,
    status: &'a OverlayStatus,
    diagnostics: &'a FrameDiagnostics,
}

/// Build an [`OverlayConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual config flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<OverlayConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    let defaults = OverlayConfig::default();
    Ok(OverlayConfig {
        confidence_threshold: cli.confidence_threshold,
        smoothing_window: cli.smoothing_window,
        history_capacity: defaults.history_capacity.max(cli.smoothing_window),
        tilt_threshold: cli.tilt_threshold,
        max_frozen_frames: cli.max_frozen_frames,
        ..defaults
    })
}

fn load_frame(cli: &Cli) -> Result<RgbaImage, String> {
    cli.frame.as_ref().map_or_else(
        || {
            Ok(RgbaImage::from_pixel(
                cli.width,
                cli.height,
                image::Rgba([96, 96, 96, 255]),
            ))
        },
        |path| {
            image::open(path)
                .map(|img| img.to_rgba8())
                .map_err(|e| format!("Error reading {}: {e}", path.display()))
        },
    )
}

fn load_track(
    path: &Path,
    normalized: bool,
    frame: Dimensions,
) -> Result<Vec<Option<LandmarkSet>>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    let track: Vec<Option<LandmarkSet>> = serde_json::from_str(&text)
        .map_err(|e| format!("Error parsing track {}: {e}", path.display()))?;

    if !normalized {
        return Ok(track);
    }
    Ok(track
        .into_iter()
        .map(|set| set.map(|s| LandmarkSet::from_normalized(s.landmarks, frame)))
        .collect())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let frame = match load_frame(&cli) {
        Ok(f) => f,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let track = match load_track(&cli.track_path, cli.normalized, Dimensions::of(&frame)) {
        Ok(t) => t,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    let frame_count = track.len();

    let engine = match OverlayEngine::new(ReplaySource::new(track), config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(ref dir) = cli.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("Error creating {}: {e}", dir.display());
        return ExitCode::FAILURE;
    }

    eprintln!(
        "Track: {} ({frame_count} frames)",
        cli.track_path.display()
    );
    eprintln!("Frame: {}x{}", frame.width(), frame.height());
    eprintln!("Garment: {} {}", cli.variant, cli.color);
    eprintln!("Config: {:#?}", engine.config());
    eprintln!();

    let mut session = engine.new_session();
    let mut all_diagnostics = Vec::with_capacity(frame_count);

    for index in 0..frame_count {
        let (_, composite, diagnostics) = engine.process_frame_with_diagnostics(
            &mut session,
            &frame,
            cli.variant,
            cli.color,
            !cli.no_freeze,
            &StdClock,
        );

        if cli.json {
            let record = FrameRecord {
                frame: index,
                status: &composite.status,
                diagnostics: &diagnostics,
            };
            match serde_json::to_string(&record) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing diagnostics: {e}");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            println!("--- Frame {}/{frame_count} ---", index + 1);
            println!("{}", diagnostics.report());
            if let Some(ref error) = composite.status.error {
                println!("Error: {error}");
            }
            println!();
        }

        if let Some(ref dir) = cli.output_dir {
            let path = dir.join(format!("frame_{index:04}.png"));
            if let Err(e) = composite.image.save(&path) {
                eprintln!("Error writing {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        }

        all_diagnostics.push(diagnostics);
    }

    if !all_diagnostics.is_empty() && !cli.json {
        print_track_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&FrameDiagnostics) -> Option<Duration>;

/// Print aggregated statistics across every frame of the track.
#[allow(clippy::cast_precision_loss)]
fn print_track_summary(all_diagnostics: &[FrameDiagnostics]) {
    println!(
        "Summary ({} frames)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    let live = all_diagnostics
        .iter()
        .filter(|d| d.summary.success && !d.summary.frozen)
        .count();
    let frozen = all_diagnostics.iter().filter(|d| d.summary.frozen).count();
    let failed = all_diagnostics.len() - live - frozen;
    println!("Live: {live}  |  Frozen: {frozen}  |  Failed: {failed}");

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| vastra_overlay::diagnostics::duration_ms(d.total_duration))
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Detect", |d| Some(d.detect.duration)),
        ("Stabilize", |d| d.stabilize.as_ref().map(|s| s.duration)),
        ("Garment", |d| d.garment.as_ref().map(|s| s.duration)),
        ("Warp", |d| d.warp.as_ref().map(|s| s.duration)),
        ("Blend", |d| d.blend.as_ref().map(|s| s.duration)),
    ];

    for (name, extractor) in stage_extractors {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(extractor)
            .map(vastra_overlay::diagnostics::duration_ms)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
