//! Stability gate: decide between the live pose and the last stable one.
//!
//! A stabilized sample whose confidence meets the threshold is emitted
//! live and becomes the new stable reference. Below the threshold the
//! gate falls back to the stored stable pose/render ("freeze"), or fails
//! outright when nothing stable has been seen yet.
//!
//! The gate itself only holds parameters. The memory it reads and
//! writes is a per-session [`StabilityState`], so concurrent sessions
//! never observe each other's frozen frames.

use std::sync::Arc;

use crate::sampler::PoseSample;
use crate::types::{OverlayError, RgbaImage};

/// A session's freeze memory.
///
/// Both snapshots are immutable and replaced wholesale when a newer
/// frame passes the gate. The pose is recorded when the gate admits it
/// and the render once it is drawn; if drawing fails, the pose is
/// rolled back with [`discard_unrendered_pose`](Self::discard_unrendered_pose)
/// so the two always describe the same frame afterwards.
#[derive(Debug, Clone, Default)]
pub struct StabilityState {
    last_stable_pose: Option<Arc<PoseSample>>,
    last_stable_render: Option<Arc<RgbaImage>>,
    rendered_pose: Option<Arc<PoseSample>>,
    frozen_streak: u32,
}

impl StabilityState {
    /// An empty state: nothing stable seen yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent pose that passed the gate.
    #[must_use]
    pub const fn last_stable_pose(&self) -> Option<&Arc<PoseSample>> {
        self.last_stable_pose.as_ref()
    }

    /// The most recent render whose pose passed the gate.
    #[must_use]
    pub const fn last_stable_render(&self) -> Option<&Arc<RgbaImage>> {
        self.last_stable_render.as_ref()
    }

    /// Consecutive frames served from this state since the last stable
    /// frame.
    #[must_use]
    pub const fn frozen_streak(&self) -> u32 {
        self.frozen_streak
    }

    /// Record a pose that passed the gate, ahead of rendering.
    pub fn record_pose(&mut self, pose: Arc<PoseSample>) {
        self.last_stable_pose = Some(pose);
        self.frozen_streak = 0;
    }

    /// Record a rendered frame together with the pose it was drawn from.
    pub fn record_render(&mut self, pose: Arc<PoseSample>, render: Arc<RgbaImage>) {
        self.rendered_pose = Some(Arc::clone(&pose));
        self.last_stable_pose = Some(pose);
        self.last_stable_render = Some(render);
        self.frozen_streak = 0;
    }

    /// Restore the stable pose to the one behind the stored render,
    /// dropping a pose recorded by the gate that was never drawn.
    pub fn discard_unrendered_pose(&mut self) {
        self.last_stable_pose.clone_from(&self.rendered_pose);
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Outcome of gating one stabilized sample.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// The sample passed; emit it.
    Live(PoseSample),
    /// The sample failed but a stable pose exists; emit that instead.
    Frozen {
        /// The stored stable pose.
        pose: Arc<PoseSample>,
        /// Confidence of the sample that failed the gate.
        confidence: f64,
    },
    /// The sample failed and there is nothing to fall back to.
    Rejected(OverlayError),
}

/// Confidence threshold plus optional freeze timeout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityGate {
    threshold: f64,
    max_frozen_frames: Option<u32>,
}

impl StabilityGate {
    /// Create a gate.
    #[must_use]
    pub const fn new(threshold: f64, max_frozen_frames: Option<u32>) -> Self {
        Self {
            threshold,
            max_frozen_frames,
        }
    }

    /// Whether `confidence` is high enough to pass.
    #[must_use]
    pub fn passes(&self, confidence: f64) -> bool {
        confidence >= self.threshold
    }

    /// Gate a freshly stabilized sample, updating `state` when it passes.
    pub fn admit(&self, state: &mut StabilityState, smoothed: PoseSample) -> GateDecision {
        let confidence = smoothed.confidence;
        if self.passes(confidence) {
            state.record_pose(Arc::new(smoothed.clone()));
            return GateDecision::Live(smoothed);
        }

        match self.fallback_pose(state) {
            Some(pose) => {
                tracing::debug!(
                    confidence,
                    stable_confidence = pose.confidence,
                    streak = state.frozen_streak(),
                    "low confidence, holding last stable pose"
                );
                GateDecision::Frozen { pose, confidence }
            }
            None => GateDecision::Rejected(OverlayError::LowConfidence { confidence }),
        }
    }

    /// Serve one frozen frame from the stored stable pose.
    ///
    /// Counts towards the freeze timeout. Returns `None` when no stable
    /// pose is stored or the timeout just expired.
    pub fn fallback_pose(&self, state: &mut StabilityState) -> Option<Arc<PoseSample>> {
        let pose = state
            .last_stable_pose()
            .filter(|p| self.passes(p.confidence))
            .cloned()?;
        self.tick(state).then_some(pose)
    }

    /// Serve one frozen frame from the stored stable render.
    ///
    /// `count_frame` is `false` when the frame was already counted by
    /// [`fallback_pose`](Self::fallback_pose) upstream.
    pub fn fallback_render(
        &self,
        state: &mut StabilityState,
        count_frame: bool,
    ) -> Option<Arc<RgbaImage>> {
        let render = state.last_stable_render().cloned()?;
        if count_frame && !self.tick(state) {
            return None;
        }
        Some(render)
    }

    /// Advance the frozen streak. Clears `state` and returns `false` once
    /// the streak exceeds the timeout.
    fn tick(&self, state: &mut StabilityState) -> bool {
        state.frozen_streak = state.frozen_streak.saturating_add(1);
        match self.max_frozen_frames {
            Some(max) if state.frozen_streak > max => {
                tracing::warn!(
                    max_frozen_frames = max,
                    "frozen state timed out, dropping stable pose and render"
                );
                state.clear();
                false
            }
            _ => true,
        }
    }
}
