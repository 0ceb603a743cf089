//! Landmark source boundary.
//!
//! The body/face landmark detector is an external collaborator. This
//! module defines the shape of its output ([`LandmarkSet`]) and the
//! [`LandmarkSource`] trait the engine calls once per frame. A subject
//! that cannot be found is reported as `None` or an empty set, never as
//! an error.
//!
//! [`ReplaySource`] plays back a recorded track of landmark sets and is
//! what tests and the bench CLI drive the engine with.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, Keypoint, Point, RgbaImage};

/// One detected keypoint with its visibility score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawLandmark {
    /// Which keypoint this is.
    pub name: Keypoint,
    /// Position in pixel coordinates.
    pub position: Point,
    /// Detector visibility/confidence, nominally in `[0, 1]`.
    pub visibility: f64,
}

impl RawLandmark {
    /// Create a landmark.
    #[must_use]
    pub const fn new(name: Keypoint, position: Point, visibility: f64) -> Self {
        Self {
            name,
            position,
            visibility,
        }
    }

    /// Visibility clamped to `[0, 1]`; non-finite scores count as 0.
    #[must_use]
    pub fn clamped_visibility(&self) -> f64 {
        if self.visibility.is_finite() {
            self.visibility.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// All keypoints the detector reported for one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    /// Reported keypoints. Order is irrelevant; if a keypoint appears
    /// more than once the first occurrence wins.
    pub landmarks: Vec<RawLandmark>,
}

impl LandmarkSet {
    /// Create a set from pixel-space landmarks.
    #[must_use]
    pub const fn new(landmarks: Vec<RawLandmark>) -> Self {
        Self { landmarks }
    }

    /// Create a set from detector output in normalized `[0, 1]`
    /// coordinates, scaling each position by the frame dimensions.
    #[must_use]
    pub fn from_normalized(landmarks: Vec<RawLandmark>, frame: Dimensions) -> Self {
        let (w, h) = (f64::from(frame.width), f64::from(frame.height));
        Self {
            landmarks: landmarks
                .into_iter()
                .map(|lm| RawLandmark {
                    position: Point::new(lm.position.x * w, lm.position.y * h),
                    ..lm
                })
                .collect(),
        }
    }

    /// Returns `true` if the detector reported nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    /// Look up a keypoint by name.
    #[must_use]
    pub fn get(&self, name: Keypoint) -> Option<&RawLandmark> {
        self.landmarks.iter().find(|lm| lm.name == name)
    }
}

/// A per-frame body landmark detector.
///
/// Implementations wrap the actual ML model. `None` (or an empty set)
/// means no subject was found. Detectors that need mutable state must
/// provide their own interior mutability so one engine can be shared.
pub trait LandmarkSource {
    /// Detect landmarks in a decoded frame.
    fn detect(&self, frame: &RgbaImage) -> Option<LandmarkSet>;
}

impl<S: LandmarkSource + ?Sized> LandmarkSource for &S {
    fn detect(&self, frame: &RgbaImage) -> Option<LandmarkSet> {
        (**self).detect(frame)
    }
}

/// Plays back a recorded landmark track, one entry per `detect` call.
///
/// `None` entries replay frames in which the subject was lost. Once the
/// track is exhausted every further frame reports no subject.
#[derive(Debug, Default)]
pub struct ReplaySource {
    track: Mutex<VecDeque<Option<LandmarkSet>>>,
}

impl ReplaySource {
    /// Create a source from a recorded track.
    #[must_use]
    pub fn new(track: impl IntoIterator<Item = Option<LandmarkSet>>) -> Self {
        Self {
            track: Mutex::new(track.into_iter().collect()),
        }
    }

    /// Number of frames left to replay.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.track.lock().map_or(0, |track| track.len())
    }
}

impl LandmarkSource for ReplaySource {
    fn detect(&self, _frame: &RgbaImage) -> Option<LandmarkSet> {
        let mut track = self.track.lock().ok()?;
        track.pop_front().flatten().filter(|set| !set.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shoulder(name: Keypoint, x: f64, y: f64) -> RawLandmark {
        RawLandmark::new(name, Point::new(x, y), 0.9)
    }

    #[test]
    fn visibility_is_clamped() {
        let mut lm = shoulder(Keypoint::LeftShoulder, 0.0, 0.0);
        lm.visibility = 1.7;
        assert!((lm.clamped_visibility() - 1.0).abs() < f64::EPSILON);
        lm.visibility = -0.2;
        assert!(lm.clamped_visibility().abs() < f64::EPSILON);
        lm.visibility = f64::NAN;
        assert!(lm.clamped_visibility().abs() < f64::EPSILON);
    }

    #[test]
    fn from_normalized_scales_to_pixels() {
        let set = LandmarkSet::from_normalized(
            vec![shoulder(Keypoint::LeftShoulder, 0.25, 0.5)],
            Dimensions {
                width: 400,
                height: 300,
            },
        );
        let lm = set.get(Keypoint::LeftShoulder);
        assert_eq!(lm.map(|l| l.position), Some(Point::new(100.0, 150.0)));
    }

    #[test]
    fn first_occurrence_wins() {
        let set = LandmarkSet::new(vec![
            shoulder(Keypoint::Nose, 1.0, 1.0),
            shoulder(Keypoint::Nose, 2.0, 2.0),
        ]);
        assert_eq!(
            set.get(Keypoint::Nose).map(|l| l.position),
            Some(Point::new(1.0, 1.0)),
        );
        assert!(set.get(Keypoint::LeftElbow).is_none());
    }

    #[test]
    fn replay_source_plays_track_in_order_then_runs_dry() {
        let frame = RgbaImage::new(4, 4);
        let first = LandmarkSet::new(vec![shoulder(Keypoint::LeftShoulder, 1.0, 2.0)]);
        let source = ReplaySource::new([Some(first.clone()), None, Some(LandmarkSet::default())]);

        assert_eq!(source.remaining(), 3);
        assert_eq!(source.detect(&frame), Some(first));
        assert_eq!(source.detect(&frame), None);
        // An empty set is the same as no subject.
        assert_eq!(source.detect(&frame), None);
        assert_eq!(source.detect(&frame), None);
        assert_eq!(source.remaining(), 0);
    }
}
