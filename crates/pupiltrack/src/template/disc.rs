//! Synthetic filled-disc templates used before any manual template exists.

use image::{GrayImage, Luma};

/// Background margin (pixels) around the synthesized disc.
pub(crate) const DISC_PADDING: u32 = 2;
/// Disc intensity (dark pupil).
pub(crate) const DISC_PIX: u8 = 0;
/// Background intensity.
pub(crate) const BACKGROUND_PIX: u8 = 255;

/// Render a filled disc centered on pixel `(cx, cy)` into an existing image.
///
/// Pixel `(x, y)` is painted with `disc_pix` when
/// `(x − cx)² + (y − cy)² <= radius²`.
pub(crate) fn paint_disc(img: &mut GrayImage, cx: i64, cy: i64, radius: u32, disc_pix: u8) {
    let r = i64::from(radius);
    let r2 = r * r;
    let (w, h) = (i64::from(img.width()), i64::from(img.height()));
    for y in (cy - r).max(0)..=(cy + r).min(h - 1) {
        for x in (cx - r).max(0)..=(cx + r).min(w - 1) {
            let dx = x - cx;
            let dy = y - cy;
            if dx * dx + dy * dy <= r2 {
                img.put_pixel(x as u32, y as u32, Luma([disc_pix]));
            }
        }
    }
}

/// Dark disc of `radius` on a bright square of side `2·radius + 1 + 2·DISC_PADDING`.
pub(crate) fn disc_patch(radius: u32) -> GrayImage {
    let side = 2 * (radius + DISC_PADDING) + 1;
    let mut img = GrayImage::from_pixel(side, side, Luma([BACKGROUND_PIX]));
    let c = i64::from(radius + DISC_PADDING);
    paint_disc(&mut img, c, c, radius, DISC_PIX);
    img
}
