//! Per-frame filtering applied before matching.

use std::borrow::Cow;

use image::GrayImage;

/// Gaussian-blur `frame` with `sigma` pixels; `None` or a non-positive sigma
/// passes the frame through untouched.
pub fn preprocess_frame(frame: &GrayImage, blur_sigma: Option<f32>) -> Cow<'_, GrayImage> {
    match blur_sigma {
        Some(sigma) if sigma.is_finite() && sigma > 0.0 => {
            Cow::Owned(imageproc::filter::gaussian_blur_f32(frame, sigma))
        }
        _ => Cow::Borrowed(frame),
    }
}
