//! Reduce per-template matches to a single pupil estimate per frame.

use serde::{Deserialize, Serialize};

use crate::location::PupilLocationRecord;
use crate::matcher::TemplateMatch;

/// Top-K voting configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Number of best-scoring templates averaged into the estimate.
    pub top_k: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self { top_k: 1 }
    }
}

/// Score-weighted top-K aggregation.
///
/// Position and radius are averaged with the scores as weights; confidence
/// is the best individual score, so smoothing the position never inflates or
/// deflates the reported confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusAggregator {
    config: ConsensusConfig,
}

impl ConsensusAggregator {
    pub fn new(config: ConsensusConfig) -> Self {
        Self { config }
    }

    /// Combine `matches` (in template order) into one record.
    ///
    /// No matches gives an unlocated record with zero confidence.
    pub fn aggregate(&self, matches: &[TemplateMatch]) -> PupilLocationRecord {
        let top = top_k(matches, self.config.top_k.max(1));
        let Some(best) = top.first() else {
            return PupilLocationRecord {
                x: f64::NAN,
                y: f64::NAN,
                radius: f64::NAN,
                confidence: 0.0,
            };
        };
        if top.len() == 1 {
            return PupilLocationRecord {
                x: best.x,
                y: best.y,
                radius: best.radius,
                confidence: best.score,
            };
        }

        let mut wsum = 0.0f64;
        let (mut x, mut y, mut r) = (0.0f64, 0.0f64, 0.0f64);
        for m in &top {
            let w = m.score.max(0.0);
            wsum += w;
            x += w * m.x;
            y += w * m.y;
            r += w * m.radius;
        }
        if !(wsum > 0.0) {
            // Non-positive scores carry no usable weighting.
            return PupilLocationRecord {
                x: best.x,
                y: best.y,
                radius: best.radius,
                confidence: best.score,
            };
        }
        PupilLocationRecord {
            x: x / wsum,
            y: y / wsum,
            radius: r / wsum,
            confidence: best.score,
        }
    }
}

/// The `k` highest-scoring matches, best first; earlier entries win ties.
fn top_k(matches: &[TemplateMatch], k: usize) -> Vec<TemplateMatch> {
    let mut sorted: Vec<TemplateMatch> = matches
        .iter()
        .copied()
        .filter(|m| m.score.is_finite())
        .collect();
    // Stable sort keeps template order among equal scores.
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));
    sorted.truncate(k);
    sorted
}
