//! Per-frame diagnostics: timing and metrics for each overlay stage.
//!
//! Collected by
//! [`OverlayEngine::process_frame_with_diagnostics`](crate::OverlayEngine::process_frame_with_diagnostics)
//! for tuning and for the bench CLI. The core never reads the system
//! clock directly; callers pass a [`Clock`]. [`WebClock`] is backed by
//! the `web-time` crate, which uses `performance.now()` on WASM and
//! `std::time::Instant` on native.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::garment::GarmentVariant;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// A monotonic time source.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by [`web_time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WebClock;

impl Clock for WebClock {
    type Instant = web_time::Instant;

    fn now(&self) -> web_time::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, since: &web_time::Instant) -> Duration {
        since.elapsed()
    }
}

/// Diagnostics collected from one processed frame.
///
/// Stages after pose gating are `None` when the frame never reached
/// them (failed pose, or a frozen render served from the cache).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameDiagnostics {
    /// Landmark detection and pose sampling.
    pub detect: StageDiagnostics,
    /// Temporal stabilization and stability gating.
    pub stabilize: Option<StageDiagnostics>,
    /// Garment raster build (or cache lookup).
    pub garment: Option<StageDiagnostics>,
    /// Perspective warp into frame space.
    pub warp: Option<StageDiagnostics>,
    /// Alpha blend onto the frame.
    pub blend: Option<StageDiagnostics>,
    /// Total wall-clock duration of the frame (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Outcome summary.
    pub summary: FrameSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Landmark detection and sampling.
    Detect {
        /// Keypoints the landmark source reported.
        keypoint_count: usize,
        /// Raw (unsmoothed) confidence, 0 when sampling failed.
        raw_confidence: f64,
    },
    /// Stabilization and gating.
    Stabilize {
        /// Samples in the stabilizer history after this push.
        history_len: usize,
        /// Confidence after smoothing.
        smoothed_confidence: f64,
        /// Whether the gate froze on the last stable pose.
        frozen: bool,
    },
    /// Garment raster.
    Garment {
        /// Silhouette drawn.
        variant: GarmentVariant,
        /// Raster width in pixels.
        width: u32,
        /// Raster height in pixels.
        height: u32,
    },
    /// Perspective warp.
    Warp {
        /// Rotation compensation applied, in radians.
        rotation: f64,
        /// Frame pixels with non-zero garment alpha.
        covered_pixel_count: u64,
    },
    /// Alpha blend.
    Blend {
        /// Frame width in pixels.
        width: u32,
        /// Frame height in pixels.
        height: u32,
    },
}

/// High-level outcome of the frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSummary {
    /// Frame width in pixels.
    pub frame_width: u32,
    /// Frame height in pixels.
    pub frame_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Whether an overlay (live or frozen) was produced.
    pub success: bool,
    /// Whether the output was served from the freeze cache.
    pub frozen: bool,
    /// Confidence reported in the status.
    pub confidence: f64,
}

impl FrameDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Frame Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Frame: {}x{} ({} pixels)",
            self.summary.frame_width, self.summary.frame_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Success: {}  |  Frozen: {}  |  Confidence: {:.3}",
            self.summary.success, self.summary.frozen, self.summary.confidence,
        ));

        lines.join("\n")
    }

    /// The stages that ran, in pipeline order.
    #[must_use]
    pub fn stages(&self) -> Vec<(&'static str, &StageDiagnostics)> {
        let mut stages = vec![("Detect", &self.detect)];
        for (name, stage) in [
            ("Stabilize", &self.stabilize),
            ("Garment", &self.garment),
            ("Warp", &self.warp),
            ("Blend", &self.blend),
        ] {
            if let Some(diag) = stage {
                stages.push((name, diag));
            }
        }
        stages
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
pub fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Detect {
            keypoint_count,
            raw_confidence,
        } => format!("{keypoint_count} keypoints, confidence={raw_confidence:.3}"),
        StageMetrics::Stabilize {
            history_len,
            smoothed_confidence,
            frozen,
        } => {
            let state = if *frozen { "frozen" } else { "live" };
            format!("history={history_len} smoothed={smoothed_confidence:.3} {state}")
        }
        StageMetrics::Garment {
            variant,
            width,
            height,
        } => format!("{variant} {width}x{height}"),
        StageMetrics::Warp {
            rotation,
            covered_pixel_count,
        } => format!(
            "rotation={:.1}deg covered={covered_pixel_count}",
            rotation.to_degrees()
        ),
        StageMetrics::Blend { width, height } => format!("{width}x{height}"),
    }
}
