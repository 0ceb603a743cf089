//! Edge softening for garment rasters.
//!
//! Wraps [`imageproc::filter::gaussian_blur_f32`]. A garment raster is a
//! single flat colour with a coverage mask in the alpha channel, so only
//! the alpha channel needs blurring: blurring the colour channels too
//! would pull the transparent black surround into the edge and darken
//! it.

use image::GrayImage;

use crate::types::RgbaImage;

/// Apply Gaussian blur to a single-channel image.
///
/// Non-positive sigma values return the image unchanged, since
/// `imageproc`'s underlying function panics on `sigma <= 0.0`.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 {
        return image.clone();
    }

    imageproc::filter::gaussian_blur_f32(image, sigma)
}

/// Blur the alpha channel of `image` in place, leaving RGB untouched.
///
/// Non-positive sigma values and empty images are a no-op.
pub fn soften_alpha(image: &mut RgbaImage, sigma: f32) {
    let (w, h) = image.dimensions();
    if sigma <= 0.0 || w == 0 || h == 0 {
        return;
    }

    let alpha = GrayImage::from_fn(w, h, |x, y| image::Luma([image.get_pixel(x, y).0[3]]));
    let blurred = gaussian_blur(&alpha, sigma);

    for (dst, src) in image.pixels_mut().zip(blurred.pixels()) {
        dst.0[3] = src.0[0];
    }
}
