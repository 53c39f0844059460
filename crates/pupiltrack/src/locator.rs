//! Per-frame pupil localization strategies.

use image::GrayImage;

use crate::consensus::{ConsensusAggregator, ConsensusConfig};
use crate::geometry::SearchWindow;
use crate::location::PupilLocationRecord;
use crate::matcher::{CorrelationMatcher, MatchConfig};
use crate::template::TemplateStore;

/// Estimates the pupil in one preprocessed frame.
///
/// Implementations must not retain per-frame state between calls; the
/// controller owns everything that spans frames.
pub trait PupilLocator {
    fn locate(
        &self,
        frame: &GrayImage,
        window: SearchWindow,
        templates: &TemplateStore,
    ) -> PupilLocationRecord;
}

/// Template matching followed by top-K consensus.
#[derive(Debug, Clone, Default)]
pub struct TemplateLocator {
    matcher: CorrelationMatcher,
    aggregator: ConsensusAggregator,
}

impl TemplateLocator {
    pub fn new(matching: MatchConfig, consensus: ConsensusConfig) -> Self {
        Self {
            matcher: CorrelationMatcher::new(matching),
            aggregator: ConsensusAggregator::new(consensus),
        }
    }

    pub fn matcher(&self) -> &CorrelationMatcher {
        &self.matcher
    }
}

impl PupilLocator for TemplateLocator {
    fn locate(
        &self,
        frame: &GrayImage,
        window: SearchWindow,
        templates: &TemplateStore,
    ) -> PupilLocationRecord {
        let matches = self.matcher.match_frame(frame, window, templates);
        self.aggregator.aggregate(&matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::AutoTemplateConfig;
    use crate::test_utils::{flat_frame, pupil_frame};
    use approx::assert_relative_eq;

    #[test]
    fn auto_discs_locate_synthetic_pupil() {
        let store = TemplateStore::new(&AutoTemplateConfig::default()).unwrap();
        let frame = pupil_frame(120, 90, [64, 41], 11);
        let r = TemplateLocator::default().locate(&frame, SearchWindow::full(120, 90), &store);
        assert_relative_eq!(r.x, 64.5, epsilon = 1e-9);
        assert_relative_eq!(r.y, 41.5, epsilon = 1e-9);
        assert_eq!(r.radius, 11.0);
        assert_relative_eq!(r.confidence, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn window_too_small_for_any_template_is_unlocated() {
        let store = TemplateStore::new(&AutoTemplateConfig::default()).unwrap();
        let frame = flat_frame(120, 90, 200);
        let r = TemplateLocator::default().locate(&frame, SearchWindow::new(0, 0, 5, 5), &store);
        assert!(!r.is_located());
        assert_eq!(r.confidence, 0.0);
    }
}
