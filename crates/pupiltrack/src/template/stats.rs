//! Welford running statistics over template brightness.

use serde::{Deserialize, Serialize};

use super::Template;

/// Online mean/variance accumulator (Welford).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    count: usize,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.mean
        }
    }

    /// Population variance.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            f64::NAN
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

impl FromIterator<f64> for RunningStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut stats = Self::default();
        for v in iter {
            stats.push(v);
        }
        stats
    }
}

/// Brightness statistics of the positive template set.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BrightnessStatistics {
    /// Mean patch intensity per template.
    pub pupil: RunningStats,
    /// Search-window intensity per template, captured at creation.
    ///
    /// `None` for auto-generated sets and for bundles loaded from the legacy
    /// schema; the window-brightness blink path is disabled in both cases.
    pub window: Option<RunningStats>,
}

impl BrightnessStatistics {
    pub(crate) fn compute(templates: &[Template], window_available: bool) -> Self {
        let pupil = templates.iter().map(|t| t.pupil_brightness).collect();
        let window = window_available
            .then(|| templates.iter().map(|t| t.window_brightness).collect());
        Self { pupil, window }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn welford_matches_two_pass() {
        let values = [12.0, 15.5, 9.25, 30.0, 18.0];
        let stats: RunningStats = values.iter().copied().collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        assert_eq!(stats.count(), 5);
        assert_relative_eq!(stats.mean(), mean, epsilon = 1e-12);
        assert_relative_eq!(stats.variance(), var, epsilon = 1e-12);
    }

    #[test]
    fn empty_stats_are_nan() {
        let stats = RunningStats::default();
        assert!(stats.mean().is_nan());
        assert!(stats.std_dev().is_nan());
    }
}
