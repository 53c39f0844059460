//! Calibration: fit pupil-to-target mappings from fixation samples.
//!
//! Each target axis gets its own [`RbfModel`]; hyperparameters come from an
//! exhaustive grid search scored by leave-one-out RMS error.

pub mod schedule;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TrackError;
use crate::location::LocationTable;
use crate::rbf::{RbfHyperparameters, RbfModel};

pub use schedule::{CalibrationParameters, FixationWindow};

/// Spacing of regularizer samples inside their range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Spacing {
    Linear,
    #[default]
    Log,
}

/// Finite hyperparameter grid searched during calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperparameterSpace {
    /// `[lo, hi]` base radius in observed-position units.
    pub base_radius: [f64; 2],
    /// Linearly spaced samples over `base_radius`, endpoints included.
    pub base_radius_samples: usize,
    /// Inclusive layer-count range.
    pub layers: [usize; 2],
    /// `[lo, hi]` regularizer range.
    pub regularizer: [f64; 2],
    /// Samples over `regularizer` in addition to the lower bound itself.
    pub regularizer_samples: usize,
    pub regularizer_spacing: Spacing,
}

impl Default for HyperparameterSpace {
    fn default() -> Self {
        Self {
            base_radius: [100.0, 400.0],
            base_radius_samples: 4,
            layers: [1, 3],
            regularizer: [0.0, 1e-2],
            regularizer_samples: 3,
            regularizer_spacing: Spacing::Log,
        }
    }
}

impl HyperparameterSpace {
    /// Space holding exactly one combination.
    pub fn single(params: RbfHyperparameters) -> Self {
        Self {
            base_radius: [params.base_radius; 2],
            base_radius_samples: 1,
            layers: [params.layers; 2],
            regularizer: [params.regularizer; 2],
            regularizer_samples: 0,
            regularizer_spacing: Spacing::Linear,
        }
    }

    pub fn base_radii(&self) -> Result<Vec<f64>, TrackError> {
        let [lo, hi] = self.base_radius;
        if !(lo.is_finite() && hi.is_finite() && lo > 0.0 && lo <= hi) {
            return Err(TrackError::InvalidInput(format!(
                "base radius range [{}, {}] is invalid",
                lo, hi
            )));
        }
        let n = self.base_radius_samples;
        if n == 0 {
            return Err(TrackError::InvalidInput(
                "base radius needs at least one sample".into(),
            ));
        }
        if n == 1 {
            return Ok(vec![lo]);
        }
        Ok((0..n)
            .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
            .collect())
    }

    pub fn layer_counts(&self) -> Result<Vec<usize>, TrackError> {
        let [lo, hi] = self.layers;
        if lo > hi {
            return Err(TrackError::InvalidInput(format!(
                "layer range [{}, {}] is empty",
                lo, hi
            )));
        }
        Ok((lo..=hi).collect())
    }

    /// Lower bound first, then `regularizer_samples` values up to the upper
    /// bound.
    pub fn regularizers(&self) -> Result<Vec<f64>, TrackError> {
        let [lo, hi] = self.regularizer;
        if !(lo.is_finite() && hi.is_finite() && lo >= 0.0 && lo <= hi) {
            return Err(TrackError::InvalidInput(format!(
                "regularizer range [{}, {}] is invalid",
                lo, hi
            )));
        }
        let n = self.regularizer_samples;
        let mut out = Vec::with_capacity(n + 1);
        out.push(lo);
        match self.regularizer_spacing {
            Spacing::Linear => {
                out.extend((1..=n).map(|i| lo + (hi - lo) * i as f64 / n as f64));
            }
            Spacing::Log => {
                // A zero lower bound has no logarithm; start three decades down.
                let start = if lo > 0.0 { lo } else { hi * 1e-3 };
                if start > 0.0 {
                    out.extend((1..=n).map(|i| start * (hi / start).powf(i as f64 / n as f64)));
                }
            }
        }
        Ok(out)
    }

    /// Every combination in search order: base radius outer, layer count
    /// middle, regularizer inner.
    pub fn candidates(&self) -> Result<Vec<RbfHyperparameters>, TrackError> {
        let radii = self.base_radii()?;
        let layers = self.layer_counts()?;
        let regs = self.regularizers()?;
        let mut out = Vec::with_capacity(radii.len() * layers.len() * regs.len());
        for &base_radius in &radii {
            for &layers in &layers {
                for &regularizer in &regs {
                    out.push(RbfHyperparameters {
                        base_radius,
                        layers,
                        regularizer,
                    });
                }
            }
        }
        Ok(out)
    }
}

/// One fixation: averaged pupil position and the target it looked at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub observed: [f64; 2],
    pub target: [f64; 2],
}

/// Fitted pupil-to-target mapping for both axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMapping {
    x_model: RbfModel,
    y_model: RbfModel,
    /// Combined leave-one-out error `sqrt(ex² + ey²)`.
    rms: f64,
}

impl CalibrationMapping {
    pub fn x_model(&self) -> &RbfModel {
        &self.x_model
    }

    pub fn y_model(&self) -> &RbfModel {
        &self.y_model
    }

    pub fn rms(&self) -> f64 {
        self.rms
    }

    pub fn map(&self, x: f64, y: f64) -> [f64; 2] {
        [self.x_model.evaluate(x, y), self.y_model.evaluate(x, y)]
    }

    /// Map every row of `table`; unlocated rows map to `NaN`.
    pub fn map_table(&self, table: &LocationTable) -> Vec<[f64; 2]> {
        table
            .rows()
            .iter()
            .map(|r| {
                if r.is_located() {
                    self.map(r.x, r.y)
                } else {
                    [f64::NAN; 2]
                }
            })
            .collect()
    }

    pub fn save_json(&self, path: &Path) -> Result<(), TrackError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| TrackError::InvalidInput(format!("serialize mapping: {}", e)))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self, TrackError> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            TrackError::InvalidInput(format!("parse mapping {}: {}", path.display(), e))
        })
    }
}

/// Grid-search calibration holding the latest successful mapping.
#[derive(Debug, Clone, Default)]
pub struct CalibrationEngine {
    space: HyperparameterSpace,
    mapping: Option<CalibrationMapping>,
}

impl CalibrationEngine {
    pub fn new(space: HyperparameterSpace) -> Self {
        Self {
            space,
            mapping: None,
        }
    }

    pub fn space(&self) -> &HyperparameterSpace {
        &self.space
    }

    pub fn mapping(&self) -> Option<&CalibrationMapping> {
        self.mapping.as_ref()
    }

    /// Fit and cross-validate every candidate; return the lowest-error model.
    ///
    /// Only a strictly lower error replaces the current best, so the first
    /// candidate in search order wins ties.
    pub fn search_hyperparameters(
        &self,
        xs: &[f64],
        ys: &[f64],
        values: &[f64],
    ) -> Result<RbfModel, TrackError> {
        let mut best: Option<(f64, RbfModel)> = None;
        for params in self.space.candidates()? {
            let model = RbfModel::fit(xs, ys, values, params)?.validated()?;
            let rms = model.loo_rms().unwrap_or(f64::NAN);
            tracing::debug!(
                "candidate r={:.3} layers={} lambda={:.3e}: loo rms {:.5}",
                params.base_radius,
                params.layers,
                params.regularizer,
                rms
            );
            let better = match &best {
                None => rms.is_finite(),
                Some((best_rms, _)) => rms < *best_rms,
            };
            if better {
                best = Some((rms, model));
            }
        }
        best.map(|(_, m)| m).ok_or_else(|| {
            TrackError::InvalidInput("no hyperparameter candidate produced a finite error".into())
        })
    }

    /// Fit both axes from `samples`. On failure the previous mapping stays.
    pub fn calibrate(
        &mut self,
        samples: &[CalibrationSample],
    ) -> Result<&CalibrationMapping, TrackError> {
        if samples.len() < 2 {
            return Err(TrackError::InvalidInput(format!(
                "calibration needs at least two samples, got {}",
                samples.len()
            )));
        }
        let xs: Vec<f64> = samples.iter().map(|s| s.observed[0]).collect();
        let ys: Vec<f64> = samples.iter().map(|s| s.observed[1]).collect();
        let tx: Vec<f64> = samples.iter().map(|s| s.target[0]).collect();
        let ty: Vec<f64> = samples.iter().map(|s| s.target[1]).collect();

        let x_model = self.search_hyperparameters(&xs, &ys, &tx)?;
        let y_model = self.search_hyperparameters(&xs, &ys, &ty)?;
        let ex = x_model.loo_rms().unwrap_or(f64::NAN);
        let ey = y_model.loo_rms().unwrap_or(f64::NAN);
        let rms = ex.hypot(ey);
        tracing::info!(
            "calibrated on {} samples: x {:?}, y {:?}, rms {:.4}",
            samples.len(),
            x_model.params(),
            y_model.params(),
            rms
        );
        Ok(self.mapping.insert(CalibrationMapping {
            x_model,
            y_model,
            rms,
        }))
    }

    pub fn map(&self, x: f64, y: f64) -> Result<[f64; 2], TrackError> {
        self.mapping
            .as_ref()
            .map(|m| m.map(x, y))
            .ok_or(TrackError::NotCalibrated)
    }
}
