//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::types::OverlayError;

/// Tunables for pose stabilization and garment compositing.
///
/// All parameters have defaults matching the behaviour the overlay was
/// calibrated with. [`OverlayEngine::new`](crate::OverlayEngine::new)
/// rejects configurations that fail [`validate`](Self::validate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Stabilized confidence at or above which a frame passes the
    /// stability gate.
    pub confidence_threshold: f64,

    /// Capacity of the stabilizer's rolling history.
    pub history_capacity: usize,

    /// Number of most recent samples averaged per push. Must not exceed
    /// `history_capacity`.
    pub smoothing_window: usize,

    /// Shoulder distance in pixels that maps to a depth scale of 1.0.
    pub baseline_shoulder_px: f64,

    /// Shoulder tilt magnitude (radians) above which the garment is
    /// rotated to follow the shoulder line.
    pub tilt_threshold: f64,

    /// Garment top width as a multiple of the shoulder distance.
    pub width_allowance: f64,

    /// Garment bottom width as a multiple of the top width.
    pub hem_flare: f64,

    /// Fraction of the garment height placed above the shoulder line.
    pub top_margin: f64,

    /// Gaussian sigma used to soften garment edges before warping.
    /// Zero disables the blur.
    pub edge_blur_sigma: f32,

    /// Consecutive frozen frames after which a session drops its stable
    /// state. `None` freezes until a stable frame returns.
    pub max_frozen_frames: Option<u32>,

    /// Number of garment rasters kept in the shared cache. Zero disables
    /// caching.
    pub garment_cache_capacity: usize,

    /// Largest garment raster side built, in pixels. Larger garments are
    /// rendered from a downscaled raster.
    pub max_garment_dimension: u32,
}

impl OverlayConfig {
    /// Default stability gate threshold.
    pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.60;
    /// Default stabilizer history capacity.
    pub const DEFAULT_HISTORY_CAPACITY: usize = 5;
    /// Default moving-average window.
    pub const DEFAULT_SMOOTHING_WINDOW: usize = 3;
    /// Default depth calibration baseline (pixels).
    pub const DEFAULT_BASELINE_SHOULDER_PX: f64 = 200.0;
    /// Default rotation compensation threshold (radians).
    pub const DEFAULT_TILT_THRESHOLD: f64 = 0.1;
    /// Default top-width allowance beyond the shoulder span.
    pub const DEFAULT_WIDTH_ALLOWANCE: f64 = 1.2;
    /// Default hem flare.
    pub const DEFAULT_HEM_FLARE: f64 = 1.1;
    /// Default share of the garment height above the shoulder line.
    pub const DEFAULT_TOP_MARGIN: f64 = 0.1;
    /// Default edge blur sigma (the sigma of a 5x5 Gaussian kernel).
    pub const DEFAULT_EDGE_BLUR_SIGMA: f32 = 1.1;
    /// Default garment cache capacity.
    pub const DEFAULT_GARMENT_CACHE_CAPACITY: usize = 32;
    /// Default maximum garment raster side.
    pub const DEFAULT_MAX_GARMENT_DIMENSION: u32 = 4096;

    /// Check every field against its valid range.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::InvalidConfig`] naming the first field
    /// that is out of range.
    pub fn validate(&self) -> Result<(), OverlayError> {
        let invalid = |msg: String| Err(OverlayError::InvalidConfig(msg));

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return invalid(format!(
                "confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if self.history_capacity == 0 {
            return invalid("history_capacity must be at least 1".to_string());
        }
        if self.smoothing_window == 0 || self.smoothing_window > self.history_capacity {
            return invalid(format!(
                "smoothing_window must be in 1..={}, got {}",
                self.history_capacity, self.smoothing_window
            ));
        }
        if !(self.baseline_shoulder_px.is_finite() && self.baseline_shoulder_px > 0.0) {
            return invalid(format!(
                "baseline_shoulder_px must be positive, got {}",
                self.baseline_shoulder_px
            ));
        }
        if !(self.tilt_threshold.is_finite() && self.tilt_threshold >= 0.0) {
            return invalid(format!(
                "tilt_threshold must be non-negative, got {}",
                self.tilt_threshold
            ));
        }
        for (name, value) in [
            ("width_allowance", self.width_allowance),
            ("hem_flare", self.hem_flare),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!("{name} must be positive, got {value}"));
            }
        }
        if !(0.0..1.0).contains(&self.top_margin) {
            return invalid(format!(
                "top_margin must be in [0, 1), got {}",
                self.top_margin
            ));
        }
        if !(self.edge_blur_sigma.is_finite() && self.edge_blur_sigma >= 0.0) {
            return invalid(format!(
                "edge_blur_sigma must be non-negative, got {}",
                self.edge_blur_sigma
            ));
        }
        if self.max_frozen_frames == Some(0) {
            return invalid("max_frozen_frames must be at least 1 when set".to_string());
        }
        if self.max_garment_dimension == 0 {
            return invalid("max_garment_dimension must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: Self::DEFAULT_CONFIDENCE_THRESHOLD,
            history_capacity: Self::DEFAULT_HISTORY_CAPACITY,
            smoothing_window: Self::DEFAULT_SMOOTHING_WINDOW,
            baseline_shoulder_px: Self::DEFAULT_BASELINE_SHOULDER_PX,
            tilt_threshold: Self::DEFAULT_TILT_THRESHOLD,
            width_allowance: Self::DEFAULT_WIDTH_ALLOWANCE,
            hem_flare: Self::DEFAULT_HEM_FLARE,
            top_margin: Self::DEFAULT_TOP_MARGIN,
            edge_blur_sigma: Self::DEFAULT_EDGE_BLUR_SIGMA,
            max_frozen_frames: None,
            garment_cache_capacity: Self::DEFAULT_GARMENT_CACHE_CAPACITY,
            max_garment_dimension: Self::DEFAULT_MAX_GARMENT_DIMENSION,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OverlayConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.confidence_threshold - 0.60).abs() < f64::EPSILON);
        assert_eq!(config.history_capacity, 5);
        assert_eq!(config.smoothing_window, 3);
        assert!((config.baseline_shoulder_px - 200.0).abs() < f64::EPSILON);
        assert!(config.max_frozen_frames.is_none());
    }

    #[test]
    fn window_larger_than_history_is_rejected() {
        let config = OverlayConfig {
            smoothing_window: 6,
            ..OverlayConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(OverlayError::InvalidConfig(msg)) if msg.contains("smoothing_window")
        ));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let config = OverlayConfig {
            confidence_threshold: 1.5,
            ..OverlayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_freeze_timeout_is_rejected() {
        let config = OverlayConfig {
            max_frozen_frames: Some(0),
            ..OverlayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: OverlayConfig =
            serde_json::from_str(r#"{"confidence_threshold": 0.7, "max_frozen_frames": 30}"#)
                .unwrap();
        assert!((config.confidence_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.max_frozen_frames, Some(30));
        assert_eq!(config.history_capacity, OverlayConfig::DEFAULT_HISTORY_CAPACITY);
    }
}
