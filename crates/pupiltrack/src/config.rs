//! Top-level tracker configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::HyperparameterSpace;
use crate::consensus::ConsensusConfig;
use crate::controller::RunConfig;
use crate::correction::CorrectionConfig;
use crate::error::TrackError;
use crate::matcher::MatchConfig;
use crate::monitor::MonitorConfig;
use crate::template::AutoTemplateConfig;

/// Every tunable of a tracking session. Missing JSON fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub matching: MatchConfig,
    pub consensus: ConsensusConfig,
    pub monitor: MonitorConfig,
    pub run: RunConfig,
    pub correction: CorrectionConfig,
    pub auto_templates: AutoTemplateConfig,
    pub calibration: HyperparameterSpace,
}

impl TrackerConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, TrackError> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| {
            TrackError::InvalidInput(format!("config {}: {}", path.display(), e))
        })
    }

    pub fn to_json_string(&self) -> Result<String, TrackError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TrackError::InvalidInput(format!("serialize config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correction::DecayMode;
    use crate::matcher::MatchMetric;
    use crate::template::TemplateSelection;
    use crate::test_utils::scratch_dir;

    #[test]
    fn partial_json_fills_defaults() {
        let dir = scratch_dir("tracker_config");
        let path = dir.join("config.json");
        std::fs::write(
            &path,
            r#"{
                "matching": { "metric": "cross_correlation_normalized",
                              "selection": { "most_recent": 3 } },
                "monitor": { "threshold": 0.75 },
                "correction": { "mode": "exponential" },
                "run": { "blur_sigma": 1.5 }
            }"#,
        )
        .unwrap();
        let cfg = TrackerConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.matching.metric, MatchMetric::CrossCorrelationNormalized);
        assert_eq!(cfg.matching.selection, TemplateSelection::MostRecent(3));
        assert_eq!(cfg.monitor.threshold, 0.75);
        assert_eq!(cfg.monitor.threshold_frames, 5);
        assert_eq!(cfg.correction.mode, DecayMode::Exponential);
        assert_eq!(cfg.correction.decay_frames, 10);
        assert_eq!(cfg.run.blur_sigma, Some(1.5));
        assert_eq!(cfg.consensus.top_k, 1);
        assert_eq!(cfg.auto_templates, AutoTemplateConfig::default());
    }

    #[test]
    fn serialized_default_parses_back() {
        let text = TrackerConfig::default().to_json_string().unwrap();
        let back: TrackerConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, TrackerConfig::default());
    }

    #[test]
    fn malformed_config_is_invalid_input() {
        let dir = scratch_dir("tracker_config_bad");
        let path = dir.join("config.json");
        std::fs::write(&path, "{ \"monitor\": 3 }").unwrap();
        assert!(matches!(
            TrackerConfig::from_json_file(&path),
            Err(TrackError::InvalidInput(_))
        ));
    }
}
