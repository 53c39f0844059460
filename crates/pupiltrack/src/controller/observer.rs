//! Run progress callbacks and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::RunOutcome;
use crate::location::PupilLocationRecord;

/// Receives run events on the controller's thread. All methods default to
/// no-ops.
pub trait RunObserver {
    /// Integer percentage of the requested frames processed so far.
    fn on_progress(&mut self, _percent: u8) {}

    /// A frame's record is final (after any blink override).
    fn on_frame_committed(&mut self, _frame: usize, _record: &PupilLocationRecord) {}

    fn on_run_completed(&mut self, _outcome: &RunOutcome) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Shared cancellation flag, checked once per frame boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation so the token can drive another run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
