//! Per-frame template matching with anti-template penalties.
//!
//! Every active template is correlated against the search window in
//! parallel. Anti-template surfaces are computed first (also in parallel) and
//! fully collected before any template is scored, so the penalty step only
//! ever reads complete surfaces.

mod surface;

use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::geometry::SearchWindow;
use crate::template::{Template, TemplateSelection, TemplateStore};

use surface::ScoreSurface;

/// Correlation metric used to score template placements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMetric {
    /// Raw sum of squared differences (optimum is the minimum).
    SumOfSquaredErrors,
    /// Sum of squared differences normalized by patch energies.
    #[default]
    SumOfSquaredErrorsNormalized,
    /// Raw cross-correlation.
    CrossCorrelation,
    /// Cross-correlation normalized by patch energies.
    CrossCorrelationNormalized,
}

/// Matcher configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub metric: MatchMetric,
    pub selection: TemplateSelection,
}

/// Best placement of one template in the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    /// Index into the store's positive template list.
    pub template_index: usize,
    /// Pupil center in frame coordinates.
    pub x: f64,
    pub y: f64,
    /// Declared radius of the matched template.
    pub radius: f64,
    /// Score after the anti-template penalty.
    pub score: f64,
    /// Score before the anti-template penalty.
    pub raw_score: f64,
}

/// Scores template sets against frames.
#[derive(Debug, Clone, Default)]
pub struct CorrelationMatcher {
    config: MatchConfig,
}

impl CorrelationMatcher {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Match the store's active templates inside `window` of `frame`.
    ///
    /// Results follow the store's template order; templates larger than the
    /// clamped window are skipped.
    pub fn match_frame(
        &self,
        frame: &GrayImage,
        window: SearchWindow,
        store: &TemplateStore,
    ) -> Vec<TemplateMatch> {
        let window = window.clamped(frame.width(), frame.height());
        if window.is_empty() {
            return Vec::new();
        }
        let sub = window.crop(frame);
        let active = store.active_templates(self.config.selection);
        let first_index = store.templates().len() - active.len();

        let mut matches = match_templates(&sub, active, store.anti_templates(), self.config.metric);
        for m in &mut matches {
            m.template_index += first_index;
            m.x += f64::from(window.left);
            m.y += f64::from(window.top);
        }
        matches
    }
}

/// Anti-template surface together with its template's size.
struct AntiSurface {
    surface: ScoreSurface,
    width: u32,
    height: u32,
}

/// Match `templates` against `window` (window-local coordinates).
pub(crate) fn match_templates(
    window: &GrayImage,
    templates: &[Template],
    anti_templates: &[Template],
    metric: MatchMetric,
) -> Vec<TemplateMatch> {
    let anti_surfaces: Vec<AntiSurface> = anti_templates
        .par_iter()
        .filter_map(|a| {
            ScoreSurface::compute(window, a.image(), metric).map(|surface| AntiSurface {
                surface,
                width: a.width(),
                height: a.height(),
            })
        })
        .collect();

    templates
        .par_iter()
        .enumerate()
        .filter_map(|(index, t)| {
            let surface = ScoreSurface::compute(window, t.image(), metric)?;
            let peak = surface.peak()?;
            let penalty = anti_penalty(&anti_surfaces, t, peak.x, peak.y);
            let center = t.center();
            Some(TemplateMatch {
                template_index: index,
                x: f64::from(peak.x) + center[0],
                y: f64::from(peak.y) + center[1],
                radius: t.radius().unwrap_or(f64::NAN),
                score: peak.score - penalty,
                raw_score: peak.score,
            })
        })
        .collect()
}

/// Largest anti-template score at the placement corresponding to a
/// template hit at `(tx, ty)`; `0` without anti-templates.
///
/// Offsets are translated so both patches share a center, then clamped into
/// each anti surface.
fn anti_penalty(anti: &[AntiSurface], template: &Template, tx: u32, ty: u32) -> f64 {
    anti.iter()
        .filter_map(|a| {
            let ax = i64::from(tx) + (i64::from(template.width()) - i64::from(a.width)) / 2;
            let ay = i64::from(ty) + (i64::from(template.height()) - i64::from(a.height)) / 2;
            let v = a.surface.at_clamped(ax, ay);
            v.is_finite().then_some(v)
        })
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
        .unwrap_or(0.0)
}
