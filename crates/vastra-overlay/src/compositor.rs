//! Perspective placement, warp and alpha blend.
//!
//! The garment raster is mapped onto a trapezoid hung from the shoulder
//! line: the top edge spans `shoulder_distance * width_allowance`, the hem
//! flares by `hem_flare`, and the length follows the variant's length
//! factor scaled by depth. When the shoulders tilt beyond the threshold
//! the whole quad is rotated rigidly about the body centre, so the top
//! edge lies along the shoulder line.
//!
//! The rotation is composed into the single projective map, so the raster
//! is resampled exactly once and the top edge angle equals the tilt.

use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use serde::{Deserialize, Serialize};

use crate::config::OverlayConfig;
use crate::garment::GarmentVariant;
use crate::sampler::PoseSample;
use crate::types::{Dimensions, OverlayError, Point, RgbaImage};

/// Destination quadrilateral in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    /// Raster `(0, 0)` lands here.
    pub top_left: Point,
    /// Raster `(w, 0)` lands here.
    pub top_right: Point,
    /// Raster `(w, h)` lands here.
    pub bottom_right: Point,
    /// Raster `(0, h)` lands here.
    pub bottom_left: Point,
}

impl Quad {
    /// Corners in raster-corner order (clockwise from top-left).
    #[must_use]
    pub const fn corners(&self) -> [Point; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
    }

    /// Angle of the top edge, in radians.
    #[must_use]
    pub fn top_edge_angle(&self) -> f64 {
        self.top_left.angle_to(self.top_right)
    }

    fn rotated(self, pivot: Point, theta: f64) -> Self {
        Self {
            top_left: self.top_left.rotate_about(pivot, theta),
            top_right: self.top_right.rotate_about(pivot, theta),
            bottom_right: self.bottom_right.rotate_about(pivot, theta),
            bottom_left: self.bottom_left.rotate_about(pivot, theta),
        }
    }
}

/// Where and how large to draw one garment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    /// Final destination quad, rotation included.
    pub quad: Quad,
    /// The quad before rotation compensation.
    pub upright: Quad,
    /// Rotation applied about [`pivot`](Self::pivot); zero when the tilt
    /// is within the threshold.
    pub rotation: f64,
    /// Rotation centre (the body centre).
    pub pivot: Point,
    /// Garment raster width to build. Matches the quad's widest edge
    /// unless capped by `max_garment_dimension`.
    pub raster_width: u32,
    /// Garment raster height to build, scaled with the width when capped.
    pub raster_height: u32,
}

impl Placement {
    /// Compute the placement of `variant` for a stabilized sample.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Render`] when the sample's shoulder span or
    /// depth scale would produce an empty or non-finite garment.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn compute(
        sample: &PoseSample,
        variant: GarmentVariant,
        config: &OverlayConfig,
    ) -> Result<Self, OverlayError> {
        let m = &sample.measurements;
        let top_w = m.shoulder_distance * config.width_allowance;
        let bottom_w = top_w * config.hem_flare;
        let height = m.shoulder_distance * variant.spec().length_factor * m.depth_scale;

        if !(top_w.is_finite() && bottom_w.is_finite() && height.is_finite())
            || top_w < 1.0
            || height < 1.0
        {
            return Err(OverlayError::Render(format!(
                "degenerate garment size {top_w:.1}x{height:.1} (shoulder distance {:.1}, depth {:.2})",
                m.shoulder_distance, m.depth_scale
            )));
        }

        let pivot = m.body_center;
        let top_y = height.mul_add(-config.top_margin, pivot.y);
        let bottom_y = top_y + height;
        let upright = Quad {
            top_left: Point::new(pivot.x - top_w / 2.0, top_y),
            top_right: Point::new(pivot.x + top_w / 2.0, top_y),
            bottom_right: Point::new(pivot.x + bottom_w / 2.0, bottom_y),
            bottom_left: Point::new(pivot.x - bottom_w / 2.0, bottom_y),
        };

        let rotation = if m.shoulder_tilt.abs() > config.tilt_threshold {
            m.shoulder_tilt
        } else {
            0.0
        };

        // Capped rasters are stretched onto the quad by the projection.
        let max_side = config.max_garment_dimension;
        let width = top_w.max(bottom_w);
        let scale = (f64::from(max_side) / width.max(height)).min(1.0);
        let raster_side = |len: f64| ((len * scale).ceil() as u32).clamp(1, max_side);

        Ok(Self {
            quad: upright.rotated(pivot, rotation),
            upright,
            rotation,
            pivot,
            raster_width: raster_side(width),
            raster_height: raster_side(height),
        })
    }

    /// Projection from raster coordinates to frame coordinates.
    ///
    /// The four raster corners are solved onto the upright quad, then the
    /// rigid rotation about the pivot is composed on top.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::Render`] if the perspective solve is
    /// singular.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn projection(&self) -> Result<Projection, OverlayError> {
        let (w, h) = (self.raster_width as f32, self.raster_height as f32);
        let from = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
        let to = self.upright.corners().map(|p| (p.x as f32, p.y as f32));

        let solved = Projection::from_control_points(from, to).ok_or_else(|| {
            OverlayError::Render("perspective solve failed for garment quad".to_string())
        })?;

        if self.rotation.abs() < f64::EPSILON {
            return Ok(solved);
        }
        let (cx, cy) = (self.pivot.x as f32, self.pivot.y as f32);
        Ok(Projection::translate(cx, cy)
            * Projection::rotate(self.rotation as f32)
            * Projection::translate(-cx, -cy)
            * solved)
    }
}

/// Warp `raster` into a transparent image of `frame` size.
///
/// Pixels outside the destination quad stay fully transparent.
///
/// # Errors
///
/// Propagates [`Placement::projection`] failures.
pub fn warp(
    raster: &RgbaImage,
    placement: &Placement,
    frame: Dimensions,
) -> Result<RgbaImage, OverlayError> {
    let projection = placement.projection()?;
    let mut out = RgbaImage::new(frame.width, frame.height);
    warp_into(
        raster,
        &projection,
        Interpolation::Bilinear,
        image::Rgba([0, 0, 0, 0]),
        &mut out,
    );
    Ok(out)
}

/// Blend `overlay` onto `frame` in place.
///
/// `out = frame * (1 - a) + overlay * a` per colour channel, with `a` the
/// overlay alpha in `[0, 1]`, computed in 8-bit linear space. The frame's
/// own alpha channel is preserved.
///
/// # Errors
///
/// Returns [`OverlayError::Render`] if the images differ in size.
pub fn alpha_blend(frame: &mut RgbaImage, overlay: &RgbaImage) -> Result<(), OverlayError> {
    if frame.dimensions() != overlay.dimensions() {
        return Err(OverlayError::Render(format!(
            "overlay is {:?} but frame is {:?}",
            overlay.dimensions(),
            frame.dimensions()
        )));
    }

    for (dst, src) in frame.pixels_mut().zip(overlay.pixels()) {
        let a = u32::from(src.0[3]);
        match a {
            0 => {}
            255 => dst.0[..3].copy_from_slice(&src.0[..3]),
            _ => {
                for c in 0..3 {
                    let mixed =
                        (u32::from(dst.0[c]) * (255 - a) + u32::from(src.0[c]) * a + 127) / 255;
                    // At most 255 by construction.
                    dst.0[c] = u8::try_from(mixed).unwrap_or(u8::MAX);
                }
            }
        }
    }
    Ok(())
}
