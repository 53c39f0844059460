//! Blink detection and low-confidence early stop.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::location::PupilLocationRecord;
use crate::template::RunningStats;

/// Early-stop and blink-override policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Stop the run when the trailing confidence sum drops too low.
    pub stop_on_low_confidence: bool,
    /// Per-frame confidence the trailing window must average.
    pub threshold: f64,
    /// Length of the trailing window; also the evaluation period.
    pub threshold_frames: usize,
    /// Treat abnormally bright search windows as blinks.
    pub blink_override: bool,
    /// Standard deviations above the template set's mean window brightness
    /// at which a frame counts as a blink.
    pub window_brightness_threshold: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stop_on_low_confidence: true,
            threshold: 0.9,
            threshold_frames: 5,
            blink_override: true,
            window_brightness_threshold: 3.0,
        }
    }
}

/// Outcome of observing one committed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorDecision {
    Continue,
    StopLowConfidence,
}

/// Frame-scoped monitor state for one run.
///
/// The stop condition is evaluated every `threshold_frames` frames: at each
/// such boundary the last `threshold_frames` confidences are summed and
/// compared against `threshold · threshold_frames`.
#[derive(Debug, Clone)]
pub struct ConfidenceMonitor {
    config: MonitorConfig,
    trailing: VecDeque<f64>,
    frames_seen: usize,
}

impl ConfidenceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            trailing: VecDeque::with_capacity(config.threshold_frames.max(1)),
            frames_seen: 0,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Forget all state; called when a run starts.
    pub fn reset(&mut self) {
        self.trailing.clear();
        self.frames_seen = 0;
    }

    /// `true` when `window_brightness` lies more than the configured number
    /// of standard deviations above the template windows' mean.
    pub fn is_blink(&self, window_brightness: f64, window_stats: Option<&RunningStats>) -> bool {
        if !self.config.blink_override {
            return false;
        }
        let Some(stats) = window_stats.filter(|s| s.count() > 0) else {
            return false;
        };
        window_brightness > stats.mean() + self.config.window_brightness_threshold * stats.std_dev()
    }

    /// Inspect a freshly written record; may force its confidence to `1.0`
    /// when the frame is a blink.
    pub fn observe(
        &mut self,
        record: &mut PupilLocationRecord,
        window_brightness: f64,
        window_stats: Option<&RunningStats>,
    ) -> MonitorDecision {
        if self.is_blink(window_brightness, window_stats) {
            tracing::debug!(
                "blink: window brightness {:.1} overrides confidence {:.3}",
                window_brightness,
                record.confidence
            );
            record.confidence = 1.0;
        }

        let n = self.config.threshold_frames.max(1);
        if self.trailing.len() == n {
            self.trailing.pop_front();
        }
        self.trailing.push_back(record.confidence);
        self.frames_seen += 1;

        if !self.config.stop_on_low_confidence || self.frames_seen % n != 0 {
            return MonitorDecision::Continue;
        }
        let sum: f64 = self.trailing.iter().sum();
        if sum < self.config.threshold * n as f64 {
            tracing::warn!(
                "trailing confidence {:.3} over {} frames is below {:.3}",
                sum,
                n,
                self.config.threshold * n as f64
            );
            MonitorDecision::StopLowConfidence
        } else {
            MonitorDecision::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(confidence: f64) -> PupilLocationRecord {
        PupilLocationRecord {
            x: 1.0,
            y: 1.0,
            radius: 5.0,
            confidence,
        }
    }

    fn window_stats() -> RunningStats {
        [100.0, 110.0, 90.0, 100.0].into_iter().collect()
    }

    #[test]
    fn bright_window_forces_full_confidence() {
        let stats = window_stats();
        let limit = stats.mean() + 2.0 * stats.std_dev();
        let mut m = ConfidenceMonitor::new(MonitorConfig {
            window_brightness_threshold: 2.0,
            ..MonitorConfig::default()
        });

        let mut r = rec(0.12);
        m.observe(&mut r, limit + 0.5, Some(&stats));
        assert_eq!(r.confidence, 1.0);

        let mut r = rec(0.12);
        m.observe(&mut r, limit - 0.5, Some(&stats));
        assert_eq!(r.confidence, 0.12);
    }

    #[test]
    fn override_needs_statistics_and_flag() {
        let stats = window_stats();
        let mut m = ConfidenceMonitor::new(MonitorConfig::default());
        let mut r = rec(0.2);
        m.observe(&mut r, 250.0, None);
        assert_eq!(r.confidence, 0.2);

        let mut m = ConfidenceMonitor::new(MonitorConfig {
            blink_override: false,
            ..MonitorConfig::default()
        });
        let mut r = rec(0.2);
        m.observe(&mut r, 250.0, Some(&stats));
        assert_eq!(r.confidence, 0.2);
    }

    #[test]
    fn stop_is_evaluated_at_window_boundaries() {
        let mut m = ConfidenceMonitor::new(MonitorConfig::default());
        let mut decisions = Vec::new();
        for i in 0..15 {
            let c = if (10..15).contains(&i) { 0.5 } else { 1.0 };
            decisions.push(m.observe(&mut rec(c), 0.0, None));
        }
        let stops: Vec<_> = decisions
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == MonitorDecision::StopLowConfidence)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(stops, vec![14]);
    }

    #[test]
    fn disabled_stop_never_fires() {
        let mut m = ConfidenceMonitor::new(MonitorConfig {
            stop_on_low_confidence: false,
            ..MonitorConfig::default()
        });
        for _ in 0..20 {
            assert_eq!(m.observe(&mut rec(0.0), 0.0, None), MonitorDecision::Continue);
        }
    }

    #[test]
    fn reset_restarts_the_window() {
        let mut m = ConfidenceMonitor::new(MonitorConfig::default());
        for _ in 0..3 {
            m.observe(&mut rec(0.0), 0.0, None);
        }
        m.reset();
        for _ in 0..4 {
            assert_eq!(m.observe(&mut rec(0.0), 0.0, None), MonitorDecision::Continue);
        }
        assert_eq!(
            m.observe(&mut rec(0.0), 0.0, None),
            MonitorDecision::StopLowConfidence
        );
    }
}
