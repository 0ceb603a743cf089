//! The overlay engine: `detect_pose` and `apply_clothing`.
//!
//! [`OverlayEngine`] wires the landmark source, sampler, stabilizer,
//! stability gate, garment generator and compositor together. It holds
//! only immutable configuration plus the shared garment cache; all
//! frame-to-frame memory is in the [`Session`] passed to each call.
//!
//! Both operations are total: every [`OverlayError`] is folded into the
//! returned status and the caller always gets an image back.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::compositor::{self, Placement};
use crate::config::OverlayConfig;
use crate::diagnostics::{
    Clock, FrameDiagnostics, FrameSummary, StageDiagnostics, StageMetrics, WebClock,
};
use crate::garment::{GarmentCache, GarmentKey, GarmentVariant};
use crate::gate::{GateDecision, StabilityGate};
use crate::landmarks::LandmarkSource;
use crate::sampler::{Landmarks, Measurements, PoseSample, PoseSampler, now_seconds};
use crate::session::{Session, SessionRegistry};
use crate::types::{Dimensions, OverlayError, Rgb, RgbaImage};

/// Result of [`OverlayEngine::detect_pose`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseResult {
    /// Whether a usable pose is attached.
    pub success: bool,
    /// The stabilized (or frozen) pose. `None` on failure.
    pub sample: Option<PoseSample>,
    /// Stabilized confidence of this frame; 0 on failure.
    pub confidence: f64,
    /// Whether `sample` is the stored stable pose rather than this
    /// frame's.
    pub frozen: bool,
    /// Failure description.
    pub error: Option<String>,
}

impl PoseResult {
    /// A successful result carrying a live sample.
    #[must_use]
    pub fn live(sample: PoseSample) -> Self {
        Self {
            success: true,
            confidence: sample.confidence,
            sample: Some(sample),
            frozen: false,
            error: None,
        }
    }

    /// A successful result carrying the stored stable pose, tagged with
    /// the confidence of the frame that failed the gate.
    #[must_use]
    pub fn frozen(stable: &PoseSample, confidence: f64) -> Self {
        Self {
            success: true,
            sample: Some(stable.clone()),
            confidence,
            frozen: true,
            error: None,
        }
    }

    /// A failed result.
    #[must_use]
    pub fn failure(error: &OverlayError) -> Self {
        Self {
            success: false,
            sample: None,
            confidence: 0.0,
            frozen: false,
            error: Some(error.to_string()),
        }
    }

    /// Keypoints of the attached pose.
    #[must_use]
    pub fn landmarks(&self) -> Option<&Landmarks> {
        self.sample.as_ref().map(|s| &s.landmarks)
    }

    /// Measurements of the attached pose.
    #[must_use]
    pub fn measurements(&self) -> Option<&Measurements> {
        self.sample.as_ref().map(|s| &s.measurements)
    }
}

/// Status half of [`CompositeFrame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayStatus {
    /// Whether the image carries an overlay (live or frozen).
    pub success: bool,
    /// Confidence of the pose this call was given.
    pub confidence: f64,
    /// Whether the image is the session's last stable render.
    pub frozen: bool,
    /// The garment drawn, when the variant was valid.
    pub outfit_type: Option<GarmentVariant>,
    /// Failure description, or the render error a frozen frame
    /// recovered from.
    pub error: Option<String>,
}

/// Output of [`OverlayEngine::apply_clothing`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeFrame {
    /// The composited frame, a frozen render, or the unchanged input.
    pub image: RgbaImage,
    /// What happened.
    pub status: OverlayStatus,
}

impl CompositeFrame {
    fn failure(frame: &RgbaImage, error: &str, outfit_type: Option<GarmentVariant>) -> Self {
        Self {
            image: frame.clone(),
            status: OverlayStatus {
                success: false,
                confidence: 0.0,
                frozen: false,
                outfit_type,
                error: Some(error.to_string()),
            },
        }
    }

    fn frozen(
        render: &RgbaImage,
        confidence: f64,
        outfit_type: GarmentVariant,
        error: Option<String>,
    ) -> Self {
        Self {
            image: render.clone(),
            status: OverlayStatus {
                success: true,
                confidence,
                frozen: true,
                outfit_type: Some(outfit_type),
                error,
            },
        }
    }
}

/// Stage timings gathered while processing one frame.
#[derive(Debug, Default)]
struct Trace {
    stabilize: Option<StageDiagnostics>,
    garment: Option<StageDiagnostics>,
    warp: Option<StageDiagnostics>,
    blend: Option<StageDiagnostics>,
}

/// Pose stabilization and garment compositing engine.
///
/// Cheap to share: `&OverlayEngine` may be used from many threads at
/// once as long as each thread drives its own sessions and the landmark
/// source is `Sync`.
#[derive(Debug)]
pub struct OverlayEngine<S> {
    source: S,
    config: OverlayConfig,
    sampler: PoseSampler,
    gate: StabilityGate,
    garments: GarmentCache,
}

impl<S: LandmarkSource> OverlayEngine<S> {
    /// Create an engine around a landmark source.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::InvalidConfig`] if `config` fails
    /// [`OverlayConfig::validate`].
    pub fn new(source: S, config: OverlayConfig) -> Result<Self, OverlayError> {
        config.validate()?;
        Ok(Self {
            source,
            sampler: PoseSampler::new(config.baseline_shoulder_px),
            gate: StabilityGate::new(config.confidence_threshold, config.max_frozen_frames),
            garments: GarmentCache::new(
                config.garment_cache_capacity,
                config.edge_blur_sigma,
                config.max_garment_dimension,
            ),
            config,
        })
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// The landmark source.
    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// The shared garment raster cache.
    #[must_use]
    pub const fn garment_cache(&self) -> &GarmentCache {
        &self.garments
    }

    /// A fresh session sized for this engine.
    #[must_use]
    pub fn new_session(&self) -> Session {
        Session::new(&self.config)
    }

    /// An empty session registry sized for this engine.
    #[must_use]
    pub fn session_registry(&self) -> SessionRegistry {
        SessionRegistry::new(&self.config)
    }

    /// Detect, sample, stabilize and gate the pose in `frame`.
    ///
    /// Returns the live stabilized pose, the session's stored stable pose
    /// (`frozen = true`) when this frame's stabilized confidence is below
    /// the threshold, or a failure with confidence 0.
    pub fn detect_pose(&self, session: &mut Session, frame: &RgbaImage) -> PoseResult {
        let mut trace = Trace::default();
        self.detect_traced(session, frame, &WebClock, &mut trace).0
    }

    /// Draw `variant` in `color` onto `frame` at `pose`.
    ///
    /// With `freeze_on_low_confidence`, a failed or low-confidence pose
    /// (and any render error) returns the session's last stable render
    /// tagged `frozen`. Without it, low-confidence poses are rendered
    /// live but never cached. A successful render at or above the
    /// threshold becomes the new stable render.
    pub fn apply_clothing(
        &self,
        session: &mut Session,
        frame: &RgbaImage,
        variant: GarmentVariant,
        color: Rgb,
        pose: &PoseResult,
        freeze_on_low_confidence: bool,
    ) -> CompositeFrame {
        let mut trace = Trace::default();
        self.apply_traced(
            session,
            frame,
            variant,
            color,
            pose,
            freeze_on_low_confidence,
            &WebClock,
            &mut trace,
        )
    }

    /// [`apply_clothing`](Self::apply_clothing) with a string garment key.
    ///
    /// Unknown keys fail with the frame unchanged, regardless of pose
    /// quality or freeze state.
    pub fn apply_clothing_named(
        &self,
        session: &mut Session,
        frame: &RgbaImage,
        variant: &str,
        color: Rgb,
        pose: &PoseResult,
        freeze_on_low_confidence: bool,
    ) -> CompositeFrame {
        match variant.parse::<GarmentVariant>() {
            Ok(v) => {
                self.apply_clothing(session, frame, v, color, pose, freeze_on_low_confidence)
            }
            Err(err) => CompositeFrame::failure(frame, &err.to_string(), None),
        }
    }

    /// Run [`detect_pose`](Self::detect_pose) then
    /// [`apply_clothing`](Self::apply_clothing) on one frame.
    pub fn process_frame(
        &self,
        session: &mut Session,
        frame: &RgbaImage,
        variant: GarmentVariant,
        color: Rgb,
        freeze_on_low_confidence: bool,
    ) -> (PoseResult, CompositeFrame) {
        let (pose, composite, _) = self.process_frame_with_diagnostics(
            session,
            frame,
            variant,
            color,
            freeze_on_low_confidence,
            &WebClock,
        );
        (pose, composite)
    }

    /// [`process_frame`](Self::process_frame), also returning per-stage
    /// timings measured with `clock`.
    pub fn process_frame_with_diagnostics<C: Clock>(
        &self,
        session: &mut Session,
        frame: &RgbaImage,
        variant: GarmentVariant,
        color: Rgb,
        freeze_on_low_confidence: bool,
        clock: &C,
    ) -> (PoseResult, CompositeFrame, FrameDiagnostics) {
        let start = clock.now();
        let mut trace = Trace::default();

        let (pose, detect) = self.detect_traced(session, frame, clock, &mut trace);
        let composite = self.apply_traced(
            session,
            frame,
            variant,
            color,
            &pose,
            freeze_on_low_confidence,
            clock,
            &mut trace,
        );

        let dims = Dimensions::of(frame);
        let diagnostics = FrameDiagnostics {
            detect,
            stabilize: trace.stabilize,
            garment: trace.garment,
            warp: trace.warp,
            blend: trace.blend,
            total_duration: clock.elapsed(&start),
            summary: FrameSummary {
                frame_width: dims.width,
                frame_height: dims.height,
                pixel_count: dims.pixel_count(),
                success: composite.status.success,
                frozen: composite.status.frozen,
                confidence: composite.status.confidence,
            },
        };
        (pose, composite, diagnostics)
    }

    fn detect_traced<C: Clock>(
        &self,
        session: &mut Session,
        frame: &RgbaImage,
        clock: &C,
        trace: &mut Trace,
    ) -> (PoseResult, StageDiagnostics) {
        session.touch();

        let start = clock.now();
        let landmarks = self.source.detect(frame);
        let sampled = self.sampler.sample(landmarks.as_ref(), now_seconds());
        let detect = StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: StageMetrics::Detect {
                keypoint_count: landmarks.as_ref().map_or(0, |set| set.landmarks.len()),
                raw_confidence: sampled.as_ref().map_or(0.0, |s| s.confidence),
            },
        };

        let sample = match sampled {
            Ok(sample) => sample,
            Err(err) => {
                tracing::debug!(%err, "pose sampling failed");
                return (PoseResult::failure(&err), detect);
            }
        };

        let start = clock.now();
        let (stabilizer, state) = session.parts_mut();
        let (result, smoothed_confidence) = match stabilizer.push(sample) {
            Ok(smoothed) => {
                let confidence = smoothed.confidence;
                let result = match self.gate.admit(state, smoothed) {
                    GateDecision::Live(sample) => PoseResult::live(sample),
                    GateDecision::Frozen { pose, confidence } => {
                        PoseResult::frozen(&pose, confidence)
                    }
                    GateDecision::Rejected(err) => PoseResult::failure(&err),
                };
                (result, confidence)
            }
            Err(err) => (PoseResult::failure(&err), 0.0),
        };
        trace.stabilize = Some(StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: StageMetrics::Stabilize {
                history_len: stabilizer.len(),
                smoothed_confidence,
                frozen: result.frozen,
            },
        });

        (result, detect)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_traced<C: Clock>(
        &self,
        session: &mut Session,
        frame: &RgbaImage,
        variant: GarmentVariant,
        color: Rgb,
        pose: &PoseResult,
        freeze: bool,
        clock: &C,
        trace: &mut Trace,
    ) -> CompositeFrame {
        // Detect-level freezes were already counted towards the timeout.
        let count_frame = !pose.frozen;

        let sample = match (&pose.sample, pose.success) {
            (Some(sample), true) => sample,
            _ => {
                let error = pose.error.as_deref().unwrap_or("pose detection failed");
                if freeze
                    && let Some(render) = self.gate.fallback_render(session.state_mut(), count_frame)
                {
                    tracing::debug!(error, "pose failed, holding last stable render");
                    return CompositeFrame::frozen(&render, pose.confidence, variant, None);
                }
                return CompositeFrame::failure(frame, error, Some(variant));
            }
        };

        let confidence = pose.confidence;
        let stable = self.gate.passes(confidence);
        if !stable && freeze {
            return match self.gate.fallback_render(session.state_mut(), count_frame) {
                Some(render) => {
                    tracing::debug!(confidence, "low confidence, holding last stable render");
                    CompositeFrame::frozen(&render, confidence, variant, None)
                }
                None => CompositeFrame::failure(
                    frame,
                    &OverlayError::LowConfidence { confidence }.to_string(),
                    Some(variant),
                ),
            };
        }

        match self.render(frame, sample, variant, color, clock, trace) {
            Ok(image) => {
                if stable {
                    session
                        .state_mut()
                        .record_render(Arc::new(sample.clone()), Arc::new(image.clone()));
                }
                CompositeFrame {
                    image,
                    status: OverlayStatus {
                        success: true,
                        confidence,
                        frozen: false,
                        outfit_type: Some(variant),
                        error: None,
                    },
                }
            }
            Err(err) => {
                // The gate already stored this pose; keep it paired with the last render.
                if stable {
                    session.state_mut().discard_unrendered_pose();
                }
                if freeze
                    && let Some(render) = self.gate.fallback_render(session.state_mut(), count_frame)
                {
                    tracing::warn!(%err, "render failed, holding last stable render");
                    return CompositeFrame::frozen(&render, confidence, variant, Some(err.to_string()));
                }
                tracing::warn!(%err, "render failed");
                CompositeFrame::failure(frame, &err.to_string(), Some(variant))
            }
        }
    }

    fn render<C: Clock>(
        &self,
        frame: &RgbaImage,
        sample: &PoseSample,
        variant: GarmentVariant,
        color: Rgb,
        clock: &C,
        trace: &mut Trace,
    ) -> Result<RgbaImage, OverlayError> {
        let start = clock.now();
        let placement = Placement::compute(sample, variant, &self.config)?;
        let raster = self.garments.get_or_build(GarmentKey {
            variant,
            width: placement.raster_width,
            height: placement.raster_height,
            color,
        })?;
        trace.garment = Some(StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: StageMetrics::Garment {
                variant,
                width: raster.width(),
                height: raster.height(),
            },
        });

        let start = clock.now();
        let dims = Dimensions::of(frame);
        let warped = compositor::warp(&raster, &placement, dims)?;
        trace.warp = Some(StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: StageMetrics::Warp {
                rotation: placement.rotation,
                covered_pixel_count: warped.pixels().filter(|p| p.0[3] > 0).count() as u64,
            },
        });

        let start = clock.now();
        let mut out = frame.clone();
        compositor::alpha_blend(&mut out, &warped)?;
        trace.blend = Some(StageDiagnostics {
            duration: clock.elapsed(&start),
            metrics: StageMetrics::Blend {
                width: dims.width,
                height: dims.height,
            },
        });

        Ok(out)
    }
}
