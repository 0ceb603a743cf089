//! Temporal stabilization: a flat moving average over recent samples.
//!
//! Detector jitter is high-frequency and roughly zero-mean, so a short
//! unweighted mean removes single-frame spikes without visibly lagging
//! the subject. Samples must be pushed in capture order; no reordering
//! by timestamp is attempted.

use std::collections::VecDeque;

use crate::sampler::{Landmarks, Measurements, PoseSample};
use crate::types::{OverlayError, Point};

/// Rolling history of pose samples with moving-average output.
#[derive(Debug, Clone)]
pub struct TemporalStabilizer {
    history: VecDeque<PoseSample>,
    capacity: usize,
    window: usize,
}

impl TemporalStabilizer {
    /// Create a stabilizer keeping `capacity` samples and averaging the
    /// most recent `window` of them.
    ///
    /// Both values are raised to at least 1, and `window` is capped at
    /// `capacity`.
    #[must_use]
    pub fn new(capacity: usize, window: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            window: window.clamp(1, capacity),
        }
    }

    /// Record a sample (evicting the oldest when full) and return the
    /// smoothed sample.
    ///
    /// # Errors
    ///
    /// Never fails in practice: the history is non-empty right after a
    /// push. The `Result` mirrors [`smoothed`](Self::smoothed).
    pub fn push(&mut self, sample: PoseSample) -> Result<PoseSample, OverlayError> {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(sample);
        self.smoothed()
    }

    /// Mean of the most recent `window` samples.
    ///
    /// Each numeric field is averaged independently: both shoulders,
    /// confidence, shoulder distance, tilt and depth scale. The body
    /// centre is the midpoint of the averaged shoulders. Elbows, nose and
    /// timestamp are taken from the newest sample.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::EmptyStabilizer`] if nothing has been
    /// pushed yet.
    pub fn smoothed(&self) -> Result<PoseSample, OverlayError> {
        let newest = self.history.back().ok_or(OverlayError::EmptyStabilizer)?;
        let recent: Vec<&PoseSample> = self.history.iter().rev().take(self.window).collect();

        #[allow(clippy::cast_precision_loss)]
        let n = recent.len() as f64;
        let mean = |field: fn(&PoseSample) -> f64| recent.iter().map(|s| field(s)).sum::<f64>() / n;

        let left_shoulder = Point::new(
            mean(|s| s.landmarks.left_shoulder.x),
            mean(|s| s.landmarks.left_shoulder.y),
        );
        let right_shoulder = Point::new(
            mean(|s| s.landmarks.right_shoulder.x),
            mean(|s| s.landmarks.right_shoulder.y),
        );

        Ok(PoseSample {
            landmarks: Landmarks {
                left_shoulder,
                right_shoulder,
                ..newest.landmarks
            },
            measurements: Measurements {
                shoulder_distance: mean(|s| s.measurements.shoulder_distance),
                shoulder_tilt: mean(|s| s.measurements.shoulder_tilt),
                depth_scale: mean(|s| s.measurements.depth_scale),
                body_center: left_shoulder.midpoint(right_shoulder),
            },
            confidence: mean(|s| s.confidence),
            timestamp: newest.timestamp,
        })
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Returns `true` if no sample has been pushed (or after a reset).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Drop all history.
    pub fn reset(&mut self) {
        self.history.clear();
    }
}
