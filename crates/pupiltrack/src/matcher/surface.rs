//! Correlation surfaces on a common "higher is better" scale.

use image::GrayImage;
use imageproc::template_matching::{match_template, MatchTemplateMethod};

use super::MatchMetric;

/// Dense score grid indexed by template top-left offset inside the window.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScoreSurface {
    width: u32,
    height: u32,
    values: Vec<f64>,
}

/// Optimum of a surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SurfacePeak {
    pub x: u32,
    pub y: u32,
    pub score: f64,
}

impl ScoreSurface {
    /// Correlate `template` over `window` and map raw values through the
    /// metric's transform. `None` when the template does not fit.
    pub(crate) fn compute(
        window: &GrayImage,
        template: &GrayImage,
        metric: MatchMetric,
    ) -> Option<Self> {
        if template.width() == 0
            || template.height() == 0
            || template.width() > window.width()
            || template.height() > window.height()
        {
            return None;
        }
        let raw = match_template(window, template, metric.method());
        let pixels = u64::from(template.width()) * u64::from(template.height());
        let values = raw
            .as_raw()
            .iter()
            .map(|&v| metric.to_score(f64::from(v), pixels))
            .collect();
        Some(Self {
            width: raw.width(),
            height: raw.height(),
            values,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_values(width: u32, height: u32, values: Vec<f64>) -> Self {
        assert_eq!(values.len(), (width * height) as usize);
        Self {
            width,
            height,
            values,
        }
    }

    pub(crate) fn width(&self) -> u32 {
        self.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.height
    }

    pub(crate) fn at(&self, x: u32, y: u32) -> f64 {
        self.values[(y as usize) * (self.width as usize) + x as usize]
    }

    /// Value at `(x, y)` after clamping the probe into the surface bounds.
    pub(crate) fn at_clamped(&self, x: i64, y: i64) -> f64 {
        let cx = x.clamp(0, i64::from(self.width) - 1) as u32;
        let cy = y.clamp(0, i64::from(self.height) - 1) as u32;
        self.at(cx, cy)
    }

    /// Highest finite score; row-major first occurrence wins ties.
    pub(crate) fn peak(&self) -> Option<SurfacePeak> {
        let mut best: Option<SurfacePeak> = None;
        for (i, &v) in self.values.iter().enumerate() {
            if !v.is_finite() {
                continue;
            }
            if best.map_or(true, |b| v > b.score) {
                best = Some(SurfacePeak {
                    x: (i % self.width as usize) as u32,
                    y: (i / self.width as usize) as u32,
                    score: v,
                });
            }
        }
        best
    }
}

impl MatchMetric {
    fn method(self) -> MatchTemplateMethod {
        match self {
            Self::SumOfSquaredErrors => MatchTemplateMethod::SumOfSquaredErrors,
            Self::SumOfSquaredErrorsNormalized => MatchTemplateMethod::SumOfSquaredErrorsNormalized,
            Self::CrossCorrelation => MatchTemplateMethod::CrossCorrelation,
            Self::CrossCorrelationNormalized => MatchTemplateMethod::CrossCorrelationNormalized,
        }
    }

    /// Map a raw surface value onto a scale where larger is a better match.
    ///
    /// - squared error: `255² · pixels − raw` (the largest possible sum minus
    ///   the observed one)
    /// - normalized squared error: `1 − raw`
    /// - cross-correlation variants: unchanged
    pub fn to_score(self, raw: f64, template_pixels: u64) -> f64 {
        match self {
            Self::SumOfSquaredErrors => 255.0 * 255.0 * template_pixels as f64 - raw,
            Self::SumOfSquaredErrorsNormalized => 1.0 - raw,
            Self::CrossCorrelation | Self::CrossCorrelationNormalized => raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::paint_disc;
    use image::Luma;

    #[test]
    fn squared_error_peak_is_exact_location() {
        let mut window = GrayImage::from_pixel(40, 30, Luma([220]));
        paint_disc(&mut window, 23, 11, 4, 15);
        let mut template = GrayImage::from_pixel(13, 13, Luma([220]));
        paint_disc(&mut template, 6, 6, 4, 15);

        for metric in [
            MatchMetric::SumOfSquaredErrors,
            MatchMetric::SumOfSquaredErrorsNormalized,
        ] {
            let s = ScoreSurface::compute(&window, &template, metric).unwrap();
            assert_eq!((s.width(), s.height()), (28, 18));
            let p = s.peak().unwrap();
            assert_eq!((p.x, p.y), (17, 5));
            let expected = metric.to_score(0.0, 169);
            assert!((p.score - expected).abs() < 1e-3, "{:?}: {}", metric, p.score);
        }
    }

    #[test]
    fn oversized_template_yields_no_surface() {
        let window = GrayImage::new(10, 10);
        let template = GrayImage::new(11, 3);
        assert!(ScoreSurface::compute(&window, &template, MatchMetric::CrossCorrelation).is_none());
    }

    #[test]
    fn clamped_probe_stays_inside() {
        let s = ScoreSurface {
            width: 3,
            height: 2,
            values: vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
        };
        assert_eq!(s.at_clamped(-4, -1), 0.0);
        assert_eq!(s.at_clamped(7, 0), 2.0);
        assert_eq!(s.at_clamped(1, 9), 4.0);
    }

    #[test]
    fn peak_skips_non_finite_values() {
        let s = ScoreSurface {
            width: 2,
            height: 2,
            values: vec![f64::NAN, 0.25, 0.75, 0.75],
        };
        let p = s.peak().unwrap();
        assert_eq!((p.x, p.y, p.score), (0, 1, 0.75));
    }
}
