//! pupiltrack: template-matching pupil tracker with RBF gaze calibration.
//!
//! The crate has two engines:
//!
//! 1. **Localization** – every frame of a video is scored against a bank of
//!    pupil templates (penalized by anti-templates), the per-template matches
//!    are reduced to one `(x, y, radius, confidence)` record, and a monitor
//!    overrides blinks and stops runs whose confidence collapses.
//! 2. **Calibration** – located pupil positions recorded while a subject
//!    fixates known targets are mapped into target space by a pair of
//!    hierarchical Gaussian RBF models, with hyperparameters chosen by
//!    leave-one-out cross-validation.
//!
//! # Public API
//! - [`FrameProcessingController`] drives runs over a [`FrameSource`] with a
//!   [`PupilLocator`] (normally [`TemplateLocator`]) and a [`TemplateStore`].
//! - [`apply_correction`] edits a [`LocationTable`] by hand.
//! - [`CalibrationEngine`] fits a [`CalibrationMapping`].
//! - [`TrackerConfig`] bundles every tunable.

pub mod calibration;
mod config;
mod consensus;
mod controller;
mod correction;
mod error;
mod geometry;
mod location;
mod locator;
mod matcher;
mod monitor;
mod preprocess;
mod rbf;
mod template;

pub use calibration::{
    CalibrationEngine, CalibrationMapping, CalibrationParameters, CalibrationSample,
    FixationWindow, HyperparameterSpace, Spacing,
};
pub use config::TrackerConfig;
pub use consensus::{ConsensusAggregator, ConsensusConfig};
pub use controller::{
    CancelToken, FrameProcessingController, FrameSource, ImageSequenceSource, MemoryFrameSource,
    NoopObserver, RunConfig, RunObserver, RunOutcome, RunState, BUNDLE_CHECKPOINT,
    TABLE_CHECKPOINT,
};
pub use correction::{
    apply_correction, CorrectionConfig, CorrectionSummary, DecayMode, ManualCorrection,
};
pub use error::TrackError;
pub use geometry::{PatchRect, SearchWindow};
pub use location::{LocationTable, PupilLocationRecord, MANUAL_CONFIDENCE};
pub use locator::{PupilLocator, TemplateLocator};
pub use matcher::{CorrelationMatcher, MatchConfig, MatchMetric, TemplateMatch};
pub use monitor::{ConfidenceMonitor, MonitorConfig, MonitorDecision};
pub use preprocess::preprocess_frame;
pub use rbf::{RbfHyperparameters, RbfModel};
pub use template::{
    AutoTemplateConfig, BrightnessStatistics, RunningStats, Template, TemplateSelection,
    TemplateStore,
};

#[cfg(test)]
pub(crate) mod test_utils;
