//! Shared types for the vastra overlay core.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Re-export `RgbaImage` so downstream crates can pass frames and
/// receive composites without depending on `image` directly.
pub use image::RgbaImage;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// The image origin, also used as the placeholder for keypoints the
    /// landmark source did not report.
    pub const ORIGIN: Self = Self::new(0.0, 0.0);

    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Midpoint between `self` and `other`.
    #[must_use]
    pub fn midpoint(self, other: Self) -> Self {
        Self::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    /// Angle in radians of the vector from `self` to `other`
    /// (`atan2(dy, dx)`, image y axis pointing down).
    #[must_use]
    pub fn angle_to(self, other: Self) -> f64 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    /// Rotate this point about `pivot` by `theta` radians.
    ///
    /// Positive angles turn the +x axis towards +y, which in image
    /// coordinates (y down) reads as clockwise on screen.
    #[must_use]
    pub fn rotate_about(self, pivot: Self, theta: f64) -> Self {
        let (sin, cos) = theta.sin_cos();
        let dx = self.x - pivot.x;
        let dy = self.y - pivot.y;
        Self::new(
            dx.mul_add(cos, -dy * sin) + pivot.x,
            dx.mul_add(sin, dy * cos) + pivot.y,
        )
    }

    /// Whether this point sits within one pixel of the origin.
    ///
    /// Optional keypoints the landmark source did not report are stored
    /// at the origin; such points must be read as "unavailable".
    #[must_use]
    pub fn is_near_origin(self) -> bool {
        self.distance_squared(Self::ORIGIN) < 1.0
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an existing image.
    #[must_use]
    pub fn of(image: &RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Total number of pixels.
    #[must_use]
    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Named body/face keypoints the overlay core consumes.
///
/// Shoulders are load-bearing for placement; elbows and nose are
/// cosmetic and may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Keypoint {
    /// Shoulder on the image-left side of the shoulder line.
    LeftShoulder,
    /// Shoulder on the image-right side of the shoulder line.
    RightShoulder,
    /// Left elbow.
    LeftElbow,
    /// Right elbow.
    RightElbow,
    /// Nose tip.
    Nose,
}

impl Keypoint {
    /// All keypoints, in a stable order.
    pub const ALL: [Self; 5] = [
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::Nose,
    ];

    /// The snake-case key used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::Nose => "nose",
        }
    }
}

impl fmt::Display for Keypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A flat RGB garment colour.
///
/// Parses from `#RRGGBB` or `RRGGBB` hex strings and displays as
/// `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    /// Colour used when the caller does not choose one (`#667EEA`).
    pub const DEFAULT: Self = Self([102, 126, 234]);

    /// Create a colour from its three channels.
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<(u8, u8, u8)> for Rgb {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Self([r, g, b])
    }
}

impl FromStr for Rgb {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim();
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(OverlayError::InvalidColor(s.to_string()));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| OverlayError::InvalidColor(s.to_string()))
        };
        Ok(Self([channel(0..2)?, channel(2..4)?, channel(4..6)?]))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{r:02X}{g:02X}{b:02X}")
    }
}

/// Errors raised inside the overlay core.
///
/// The public operations never return these directly: they are folded
/// into the `error` string of a status object at the operation boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum OverlayError {
    /// The landmark source found no subject in the frame.
    #[error("no pose detected")]
    NoPoseDetected,

    /// A subject was found but a load-bearing keypoint was not reported.
    #[error("no pose detected: {0} missing")]
    MissingKeypoint(Keypoint),

    /// Stabilized confidence fell below the acceptance threshold and no
    /// stable state exists to fall back to.
    #[error("low pose confidence ({confidence:.2}) and no stable pose to fall back to")]
    LowConfidence {
        /// The stabilized confidence that failed the gate.
        confidence: f64,
    },

    /// The garment key is not one of the supported variants.
    #[error("invalid clothing type: {0} (expected one of tshirt, shirt, kurta, dress, hoodie, jacket)")]
    InvalidVariant(String),

    /// The colour string is not `#RRGGBB` / `RRGGBB`.
    #[error("invalid color: {0} (expected #RRGGBB or RRGGBB)")]
    InvalidColor(String),

    /// Engine configuration is out of range.
    #[error("invalid overlay configuration: {0}")]
    InvalidConfig(String),

    /// Shape generation or the perspective warp failed.
    #[error("overlay failed: {0}")]
    Render(String),

    /// The stabilizer was asked for a smoothed sample before any sample
    /// was pushed.
    #[error("stabilizer has no samples")]
    EmptyStabilizer,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // --- Point tests ---

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(b) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn point_midpoint() {
        let m = Point::new(100.0, 200.0).midpoint(Point::new(300.0, 170.0));
        assert_eq!(m, Point::new(200.0, 185.0));
    }

    #[test]
    fn angle_to_follows_image_axes() {
        let left = Point::new(100.0, 200.0);
        assert!(left.angle_to(Point::new(300.0, 200.0)).abs() < f64::EPSILON);
        // Right shoulder higher on screen (smaller y) gives a negative tilt.
        let tilt = left.angle_to(Point::new(300.0, 170.0));
        assert!((tilt - (-30.0_f64).atan2(200.0)).abs() < 1e-12);
        assert!(tilt < 0.0);
    }

    #[test]
    fn rotate_about_quarter_turn() {
        let p = Point::new(2.0, 1.0).rotate_about(Point::new(1.0, 1.0), std::f64::consts::FRAC_PI_2);
        assert!((p.x - 1.0).abs() < 1e-12);
        assert!((p.y - 2.0).abs() < 1e-12);
    }

    #[test]
    fn near_origin_marks_unavailable_keypoints() {
        assert!(Point::ORIGIN.is_near_origin());
        assert!(Point::new(0.5, 0.3).is_near_origin());
        assert!(!Point::new(12.0, 0.0).is_near_origin());
    }

    // --- Rgb tests ---

    #[test]
    fn rgb_parses_with_and_without_hash() {
        assert_eq!("#667eea".parse::<Rgb>().unwrap(), Rgb::DEFAULT);
        assert_eq!("FF0080".parse::<Rgb>().unwrap(), Rgb::new(255, 0, 128));
    }

    #[test]
    fn rgb_rejects_malformed_strings() {
        for bad in ["", "#12345", "#1234567", "GGGGGG", "#éééé", "+1+1+1"] {
            assert!(
                matches!(bad.parse::<Rgb>(), Err(OverlayError::InvalidColor(_))),
                "expected {bad:?} to be rejected",
            );
        }
    }

    #[test]
    fn rgb_display_round_trips() {
        let c = Rgb::new(1, 171, 255);
        assert_eq!(c.to_string(), "#01ABFF");
        assert_eq!(c.to_string().parse::<Rgb>().unwrap(), c);
    }

    // --- Error tests ---

    #[test]
    fn error_messages() {
        assert_eq!(OverlayError::NoPoseDetected.to_string(), "no pose detected");
        assert_eq!(
            OverlayError::MissingKeypoint(Keypoint::RightShoulder).to_string(),
            "no pose detected: right_shoulder missing",
        );
        assert_eq!(
            OverlayError::LowConfidence { confidence: 0.4 }.to_string(),
            "low pose confidence (0.40) and no stable pose to fall back to",
        );
    }

    #[test]
    fn error_serializes_for_status_payloads() {
        let err = OverlayError::MissingKeypoint(Keypoint::LeftShoulder);
        let json = serde_json::to_string(&err).unwrap();
        let back: OverlayError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
