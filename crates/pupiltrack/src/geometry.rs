//! Rectangles in frame pixel coordinates.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::TrackError;

/// Search rectangle `[left, right) × [top, bottom)` in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchWindow {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl SearchWindow {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Window covering an entire `width × height` frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Clamp the window into a `width × height` frame.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let right = self.right.min(width);
        let bottom = self.bottom.min(height);
        Self {
            left: self.left.min(right),
            top: self.top.min(bottom),
            right,
            bottom,
        }
    }

    /// Copy the window's pixels out of `frame` (after clamping).
    pub fn crop(&self, frame: &GrayImage) -> GrayImage {
        let w = self.clamped(frame.width(), frame.height());
        image::imageops::crop_imm(frame, w.left, w.top, w.width(), w.height()).to_image()
    }

    /// Mean intensity of the clamped window; `NaN` when it is empty.
    pub fn mean_brightness(&self, frame: &GrayImage) -> f64 {
        let w = self.clamped(frame.width(), frame.height());
        if w.is_empty() {
            return f64::NAN;
        }
        let mut sum = 0u64;
        for y in w.top..w.bottom {
            for x in w.left..w.right {
                sum += u64::from(frame.get_pixel(x, y)[0]);
            }
        }
        sum as f64 / (u64::from(w.width()) * u64::from(w.height())) as f64
    }
}

/// Requested template crop; may extend past the frame on one side per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRect {
    pub left: i64,
    pub top: i64,
    pub width: u32,
    pub height: u32,
}

/// Result of clipping a [`PatchRect`] against the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClippedPatch {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Pixels removed from the left edge.
    pub cut_left: u32,
    /// Pixels removed from the top edge.
    pub cut_top: u32,
}

impl PatchRect {
    pub fn new(left: i64, top: i64, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Square patch of side `2·half + 1` centered on pixel `(cx, cy)`.
    pub fn centered(cx: i64, cy: i64, half: u32) -> Self {
        let side = 2 * half + 1;
        Self::new(cx - i64::from(half), cy - i64::from(half), side, side)
    }

    pub(crate) fn clip(&self, frame_w: u32, frame_h: u32) -> Result<ClippedPatch, TrackError> {
        let (x, width, cut_left) = clip_axis(self.left, self.width, frame_w, "horizontal")?;
        let (y, height, cut_top) = clip_axis(self.top, self.height, frame_h, "vertical")?;
        Ok(ClippedPatch {
            x,
            y,
            width,
            height,
            cut_left,
            cut_top,
        })
    }
}

fn clip_axis(
    start: i64,
    len: u32,
    limit: u32,
    axis: &str,
) -> Result<(u32, u32, u32), TrackError> {
    let end = start + i64::from(len);
    let limit = i64::from(limit);
    if start < 0 && end > limit {
        return Err(TrackError::Geometry {
            reason: format!(
                "{} extent [{}, {}) overflows both edges of [0, {})",
                axis, start, end, limit
            ),
        });
    }
    let lo = start.max(0);
    let hi = end.min(limit);
    if hi <= lo {
        return Err(TrackError::Geometry {
            reason: format!(
                "{} extent [{}, {}) does not intersect [0, {})",
                axis, start, end, limit
            ),
        });
    }
    Ok((lo as u32, (hi - lo) as u32, (lo - start) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_one_sided_overflow_keeps_cut_amount() {
        let c = PatchRect::new(-3, 5, 10, 4).clip(20, 20).unwrap();
        assert_eq!((c.x, c.y, c.width, c.height), (0, 5, 7, 4));
        assert_eq!((c.cut_left, c.cut_top), (3, 0));

        let c = PatchRect::new(15, 18, 10, 4).clip(20, 20).unwrap();
        assert_eq!((c.x, c.y, c.width, c.height), (15, 18, 5, 2));
        assert_eq!((c.cut_left, c.cut_top), (0, 0));
    }

    #[test]
    fn clip_rejects_opposite_edge_overflow() {
        let err = PatchRect::new(-1, 0, 30, 4).clip(20, 20).unwrap_err();
        assert!(matches!(err, TrackError::Geometry { .. }));
        let err = PatchRect::new(0, -2, 4, 25).clip(20, 20).unwrap_err();
        assert!(matches!(err, TrackError::Geometry { .. }));
    }

    #[test]
    fn clip_rejects_disjoint_patch() {
        let err = PatchRect::new(25, 0, 4, 4).clip(20, 20).unwrap_err();
        assert!(matches!(err, TrackError::Geometry { .. }));
    }

    #[test]
    fn window_clamps_and_averages() {
        let mut img = GrayImage::new(4, 4);
        img.put_pixel(3, 3, image::Luma([160]));
        let w = SearchWindow::new(2, 2, 10, 10);
        assert_eq!(w.clamped(4, 4), SearchWindow::new(2, 2, 4, 4));
        assert!((w.mean_brightness(&img) - 40.0).abs() < 1e-12);
        assert_eq!(w.crop(&img).dimensions(), (2, 2));
    }
}
