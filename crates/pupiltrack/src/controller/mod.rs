//! Sequential frame-processing runs over a frame source.
//!
//! Each step reads a frame, preprocesses it, locates the pupil, commits the
//! record to the location table, then lets the confidence monitor decide
//! whether the run continues. Cancellation is observed only between frames.
//! Every terminal state checkpoints the table (and a customized template set)
//! when a checkpoint directory is configured.

mod observer;
mod source;


use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::correction::{apply_correction, CorrectionConfig, CorrectionSummary, ManualCorrection};
use crate::error::TrackError;
use crate::geometry::SearchWindow;
use crate::location::LocationTable;
use crate::locator::PupilLocator;
use crate::monitor::{ConfidenceMonitor, MonitorConfig, MonitorDecision};
use crate::preprocess::preprocess_frame;
use crate::template::TemplateStore;

pub use observer::{CancelToken, NoopObserver, RunObserver};
pub use source::{FrameSource, ImageSequenceSource, MemoryFrameSource};

/// File name of the checkpointed location table.
pub const TABLE_CHECKPOINT: &str = "locations.bin";
/// Directory name of the checkpointed template bundle.
pub const BUNDLE_CHECKPOINT: &str = "templates";

/// Per-run frame handling.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Search rectangle; `None` searches the whole frame.
    pub search_window: Option<SearchWindow>,
    /// Gaussian pre-blur sigma in pixels; `None` disables the blur.
    pub blur_sigma: Option<f32>,
    /// Where terminal states write their checkpoint.
    pub checkpoint_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    StoppedLowConfidence,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub state: RunState,
    /// Frames committed during this run.
    pub frames_processed: usize,
    /// Index of the last committed frame.
    pub last_frame: Option<usize>,
}

/// Owns the location table and drives runs against it.
#[derive(Debug, Clone)]
pub struct FrameProcessingController {
    config: RunConfig,
    monitor: ConfidenceMonitor,
    table: LocationTable,
    position: usize,
    state: RunState,
}

impl FrameProcessingController {
    /// Controller with an unlocated table of `frame_count` rows.
    pub fn new(frame_count: usize, config: RunConfig, monitor: MonitorConfig) -> Self {
        Self::with_table(LocationTable::new(frame_count), config, monitor)
    }

    /// Resume from a previously saved table.
    pub fn with_table(table: LocationTable, config: RunConfig, monitor: MonitorConfig) -> Self {
        Self {
            config,
            monitor: ConfidenceMonitor::new(monitor),
            table,
            position: 0,
            state: RunState::Idle,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Next frame a run would process.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn seek(&mut self, frame: usize) -> Result<(), TrackError> {
        if frame > self.table.len() {
            return Err(TrackError::OutOfRange {
                context: "frame",
                index: frame,
                len: self.table.len(),
            });
        }
        self.position = frame;
        Ok(())
    }

    pub fn table(&self) -> &LocationTable {
        &self.table
    }

    pub fn into_table(self) -> LocationTable {
        self.table
    }

    /// Apply a manual correction to the owned table.
    pub fn correct(
        &mut self,
        correction: ManualCorrection,
        config: &CorrectionConfig,
    ) -> Result<CorrectionSummary, TrackError> {
        apply_correction(&mut self.table, correction, config)
    }

    /// Process up to `frames` frames starting at the current position.
    ///
    /// Fewer frames are processed when the table or the source ends first;
    /// an early end of stream still completes the run. A frame whose size
    /// differs from the source's declared size aborts with
    /// [`TrackError::VideoFormatMismatch`]. Any error mid-run returns the
    /// controller to [`RunState::Idle`] after checkpointing the frames
    /// already committed.
    pub fn run<S, L>(
        &mut self,
        source: &mut S,
        locator: &L,
        templates: &TemplateStore,
        frames: usize,
        observer: &mut dyn RunObserver,
        cancel: &CancelToken,
    ) -> Result<RunOutcome, TrackError>
    where
        S: FrameSource + ?Sized,
        L: PupilLocator + ?Sized,
    {
        let todo = frames.min(self.table.len().saturating_sub(self.position));
        source.seek(self.position)?;
        self.monitor.reset();
        self.state = RunState::Running;
        tracing::info!("run: {} frames from frame {}", todo, self.position);

        let start = self.position;
        let result = self.process_frames(source, locator, templates, todo, observer, cancel);
        let processed = self.position - start;
        let terminal = match result {
            Ok(state) => state,
            Err(e) => {
                self.state = RunState::Idle;
                tracing::warn!("run aborted after {} frames: {}", processed, e);
                self.write_configured_checkpoint(templates);
                return Err(e);
            }
        };

        self.state = terminal;
        let outcome = RunOutcome {
            state: terminal,
            frames_processed: processed,
            last_frame: self.position.checked_sub(1).filter(|_| processed > 0),
        };
        tracing::info!(
            "run finished: {:?} after {} frames",
            outcome.state,
            outcome.frames_processed
        );
        self.write_configured_checkpoint(templates);
        observer.on_run_completed(&outcome);
        Ok(outcome)
    }

    fn process_frames<S, L>(
        &mut self,
        source: &mut S,
        locator: &L,
        templates: &TemplateStore,
        todo: usize,
        observer: &mut dyn RunObserver,
        cancel: &CancelToken,
    ) -> Result<RunState, TrackError>
    where
        S: FrameSource + ?Sized,
        L: PupilLocator + ?Sized,
    {
        let declared = [source.width(), source.height()];
        let window = self
            .config
            .search_window
            .unwrap_or_else(|| SearchWindow::full(declared[0], declared[1]));
        let window_stats = templates.brightness().window.as_ref();

        let mut processed = 0usize;
        while processed < todo {
            let Some(frame) = source.read_frame()? else {
                tracing::warn!(
                    "frame source ended after {} of {} frames",
                    processed,
                    todo
                );
                break;
            };
            let got = [frame.width(), frame.height()];
            if got != declared {
                return Err(TrackError::VideoFormatMismatch {
                    expected: declared,
                    got,
                });
            }

            let index = self.position;
            let filtered = preprocess_frame(&frame, self.config.blur_sigma);
            let mut record = locator.locate(&filtered, window, templates);
            self.table.set(index, record)?;
            processed += 1;
            observer.on_progress((processed * 100 / todo) as u8);

            let brightness = window.mean_brightness(&filtered);
            let decision = self.monitor.observe(&mut record, brightness, window_stats);
            self.table.set(index, record)?;
            self.position = index + 1;
            tracing::trace!(
                "frame {}: ({:.2}, {:.2}) r={:.1} conf={:.3}",
                index,
                record.x,
                record.y,
                record.radius,
                record.confidence
            );
            observer.on_frame_committed(index, &record);

            if decision == MonitorDecision::StopLowConfidence {
                return Ok(RunState::StoppedLowConfidence);
            }
            if cancel.is_cancelled() {
                return Ok(RunState::Cancelled);
            }
        }
        Ok(RunState::Completed)
    }

    fn write_configured_checkpoint(&self, templates: &TemplateStore) {
        if let Some(dir) = &self.config.checkpoint_dir {
            if let Err(e) = self.checkpoint(dir, templates) {
                tracing::warn!("checkpoint to {} failed: {}", dir.display(), e);
            }
        }
    }

    /// Write the table and, if customized, the template bundle under `dir`.
    pub fn checkpoint(&self, dir: &Path, templates: &TemplateStore) -> Result<(), TrackError> {
        std::fs::create_dir_all(dir)?;
        self.table.save(&dir.join(TABLE_CHECKPOINT))?;
        if templates.is_customized() {
            templates.save_bundle(&dir.join(BUNDLE_CHECKPOINT))?;
        }
        tracing::debug!("checkpoint written to {}", dir.display());
        Ok(())
    }
}
