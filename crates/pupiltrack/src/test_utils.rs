//! Shared test utilities: synthetic eye frames and scratch directories.

use std::path::PathBuf;

use image::{GrayImage, Luma};

use crate::template::paint_disc;

/// Render a synthetic eye frame: a dark pupil disc on a bright background.
///
/// Intensities match the synthetic disc templates, so a disc template of the
/// same radius matches exactly. The pupil's continuous-coordinate center is
/// `center + 0.5`.
pub(crate) fn pupil_frame(w: u32, h: u32, center: [i64; 2], radius: u32) -> GrayImage {
    let mut img = GrayImage::from_pixel(w, h, Luma([255]));
    paint_disc(&mut img, center[0], center[1], radius, 0);
    img
}

/// Uniform frame, e.g. a closed eyelid filling the view.
pub(crate) fn flat_frame(w: u32, h: u32, value: u8) -> GrayImage {
    GrayImage::from_pixel(w, h, Luma([value]))
}

/// Fresh, empty directory under the system temp dir, unique per test name.
pub(crate) fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pupiltrack-{}-{}", name, std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir).expect("clear scratch dir");
    }
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}
