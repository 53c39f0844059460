//! Calibration target layout and fixation timing.
//!
//! Targets are shown one at a time in `order`, each for `fixation_seconds`,
//! after an initial `delay_seconds`. The located pupil positions inside each
//! fixation are averaged into one [`CalibrationSample`].

use serde::{Deserialize, Serialize};

use super::{CalibrationSample, HyperparameterSpace};
use crate::error::TrackError;
use crate::location::LocationTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParameters {
    /// Target positions in stimulus coordinates.
    pub targets: Vec<[f64; 2]>,
    /// Presentation order as indices into `targets`; empty means in order.
    pub order: Vec<usize>,
    pub fixation_seconds: f64,
    pub delay_seconds: f64,
    pub search: HyperparameterSpace,
}

impl Default for CalibrationParameters {
    fn default() -> Self {
        Self {
            targets: grid(3, 3, 1920.0, 1080.0, 0.1),
            order: Vec::new(),
            fixation_seconds: 2.0,
            delay_seconds: 1.0,
            search: HyperparameterSpace::default(),
        }
    }
}

/// Row-major `columns × rows` grid inset by `margin` (fraction of each side).
pub fn grid(columns: usize, rows: usize, width: f64, height: f64, margin: f64) -> Vec<[f64; 2]> {
    let axis = |n: usize, extent: f64| -> Vec<f64> {
        let lo = extent * margin;
        let hi = extent * (1.0 - margin);
        match n {
            0 => Vec::new(),
            1 => vec![extent / 2.0],
            _ => (0..n)
                .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
                .collect(),
        }
    };
    let xs = axis(columns, width);
    let ys = axis(rows, height);
    ys.iter()
        .flat_map(|&y| xs.iter().map(move |&x| [x, y]))
        .collect()
}

/// Frames (relative to the calibration start) during which one target is
/// fixated; `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixationWindow {
    pub target_index: usize,
    pub start: usize,
    pub end: usize,
}

impl CalibrationParameters {
    /// Target indices in presentation order.
    pub fn presentation(&self) -> Result<Vec<usize>, TrackError> {
        if self.order.is_empty() {
            return Ok((0..self.targets.len()).collect());
        }
        if let Some(&bad) = self.order.iter().find(|&&i| i >= self.targets.len()) {
            return Err(TrackError::OutOfRange {
                context: "calibration target",
                index: bad,
                len: self.targets.len(),
            });
        }
        Ok(self.order.clone())
    }

    pub fn fixation_windows(&self, fps: f64) -> Result<Vec<FixationWindow>, TrackError> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(TrackError::InvalidInput(format!("invalid frame rate {}", fps)));
        }
        if !(self.fixation_seconds.is_finite() && self.fixation_seconds > 0.0)
            || !(self.delay_seconds.is_finite() && self.delay_seconds >= 0.0)
        {
            return Err(TrackError::InvalidInput(format!(
                "invalid fixation timing: {}s fixation, {}s delay",
                self.fixation_seconds, self.delay_seconds
            )));
        }
        let delay = (self.delay_seconds * fps).round() as usize;
        let span = ((self.fixation_seconds * fps).round() as usize).max(1);
        Ok(self
            .presentation()?
            .into_iter()
            .enumerate()
            .map(|(k, target_index)| FixationWindow {
                target_index,
                start: delay + k * span,
                end: delay + (k + 1) * span,
            })
            .collect())
    }

    /// Average located positions per fixation, starting at `start_frame`.
    ///
    /// Fixations with no located frame are skipped.
    pub fn observed_samples(
        &self,
        table: &LocationTable,
        start_frame: usize,
        fps: f64,
    ) -> Result<Vec<CalibrationSample>, TrackError> {
        let mut samples = Vec::new();
        for w in self.fixation_windows(fps)? {
            let lo = start_frame.saturating_add(w.start).min(table.len());
            let hi = start_frame.saturating_add(w.end).min(table.len());
            let (mut sx, mut sy, mut n) = (0.0f64, 0.0f64, 0usize);
            for r in &table.rows()[lo..hi] {
                if r.is_located() {
                    sx += r.x;
                    sy += r.y;
                    n += 1;
                }
            }
            if n == 0 {
                tracing::warn!(
                    "no located frames in fixation {}..{} for target {}",
                    lo,
                    hi,
                    w.target_index
                );
                continue;
            }
            samples.push(CalibrationSample {
                observed: [sx / n as f64, sy / n as f64],
                target: self.targets[w.target_index],
            });
        }
        Ok(samples)
    }
}
