//! Pose sampling: raw detector landmarks in, [`PoseSample`] out.
//!
//! Only the two shoulders are load-bearing. Elbows and nose are carried
//! along when reported and otherwise parked at the origin (see
//! [`Point::is_near_origin`]); they never affect confidence.

use serde::{Deserialize, Serialize};

use crate::landmarks::LandmarkSet;
use crate::types::{Keypoint, OverlayError, Point};

/// Keypoint positions of one pose sample, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmarks {
    /// Image-left shoulder.
    pub left_shoulder: Point,
    /// Image-right shoulder.
    pub right_shoulder: Point,
    /// Left elbow, or the origin when unavailable.
    pub left_elbow: Point,
    /// Right elbow, or the origin when unavailable.
    pub right_elbow: Point,
    /// Nose tip, or the origin when unavailable.
    pub nose: Point,
}

impl Landmarks {
    /// Position of a keypoint, or `None` if it sits at the origin
    /// placeholder.
    #[must_use]
    pub fn available(&self, name: Keypoint) -> Option<Point> {
        let p = match name {
            Keypoint::LeftShoulder => self.left_shoulder,
            Keypoint::RightShoulder => self.right_shoulder,
            Keypoint::LeftElbow => self.left_elbow,
            Keypoint::RightElbow => self.right_elbow,
            Keypoint::Nose => self.nose,
        };
        (!p.is_near_origin()).then_some(p)
    }
}

/// Scalars derived from the shoulder pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    /// Euclidean distance between the shoulders, in pixels.
    pub shoulder_distance: f64,
    /// Angle of the left-to-right shoulder vector, in radians.
    pub shoulder_tilt: f64,
    /// Shoulder distance relative to the calibration baseline.
    pub depth_scale: f64,
    /// Midpoint of the shoulders.
    pub body_center: Point,
}

impl Measurements {
    /// Derive measurements from a shoulder pair.
    #[must_use]
    pub fn from_shoulders(left: Point, right: Point, baseline_shoulder_px: f64) -> Self {
        let shoulder_distance = left.distance(right);
        Self {
            shoulder_distance,
            shoulder_tilt: left.angle_to(right),
            depth_scale: shoulder_distance / baseline_shoulder_px,
            body_center: left.midpoint(right),
        }
    }
}

/// One tracking observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    /// Keypoint positions.
    pub landmarks: Landmarks,
    /// Derived measurements.
    pub measurements: Measurements,
    /// Mean shoulder visibility, in `[0, 1]`.
    pub confidence: f64,
    /// Capture time in seconds since the Unix epoch. Diagnostic only.
    pub timestamp: f64,
}

/// Turns detector output into [`PoseSample`]s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSampler {
    baseline_shoulder_px: f64,
}

impl PoseSampler {
    /// Create a sampler with the given depth calibration baseline.
    #[must_use]
    pub const fn new(baseline_shoulder_px: f64) -> Self {
        Self {
            baseline_shoulder_px,
        }
    }

    /// Build a sample from one frame's detector output.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::NoPoseDetected`] if `set` is `None` or
    /// empty, and [`OverlayError::MissingKeypoint`] if either shoulder
    /// was not reported.
    pub fn sample(
        &self,
        set: Option<&LandmarkSet>,
        timestamp: f64,
    ) -> Result<PoseSample, OverlayError> {
        let set = set
            .filter(|s| !s.is_empty())
            .ok_or(OverlayError::NoPoseDetected)?;

        let left = set
            .get(Keypoint::LeftShoulder)
            .ok_or(OverlayError::MissingKeypoint(Keypoint::LeftShoulder))?;
        let right = set
            .get(Keypoint::RightShoulder)
            .ok_or(OverlayError::MissingKeypoint(Keypoint::RightShoulder))?;

        let optional = |name| set.get(name).map_or(Point::ORIGIN, |lm| lm.position);

        Ok(PoseSample {
            landmarks: Landmarks {
                left_shoulder: left.position,
                right_shoulder: right.position,
                left_elbow: optional(Keypoint::LeftElbow),
                right_elbow: optional(Keypoint::RightElbow),
                nose: optional(Keypoint::Nose),
            },
            measurements: Measurements::from_shoulders(
                left.position,
                right.position,
                self.baseline_shoulder_px,
            ),
            confidence: f64::midpoint(left.clamped_visibility(), right.clamped_visibility()),
            timestamp,
        })
    }
}

/// Current wall-clock time in seconds since the Unix epoch.
///
/// Uses `web-time` so the same call works natively and on WASM.
#[must_use]
pub fn now_seconds() -> f64 {
    web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}
