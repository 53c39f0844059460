//! Manual position corrections with a fading carry-over into later frames.

use serde::{Deserialize, Serialize};

use crate::error::TrackError;
use crate::location::{LocationTable, PupilLocationRecord, MANUAL_CONFIDENCE};

/// How a correction's delta fades over the following frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayMode {
    /// Factor `(decay_frames − i) / decay_frames` for `i < decay_frames`.
    #[default]
    Linear,
    /// Delta scaled by `exp(−i / decay_frames)` for
    /// `ceil(decay_frames / ln d)` frames, `d` the positional delta length.
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub decay_frames: usize,
    pub mode: DecayMode,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            decay_frames: 10,
            mode: DecayMode::Linear,
        }
    }
}

/// User-supplied pupil placement for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManualCorrection {
    pub frame: usize,
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

/// What a correction touched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectionSummary {
    /// Applied `[dx, dy, dradius]` at the corrected frame.
    pub delta: [f64; 3],
    /// Number of rows written, the corrected frame included.
    pub frames_written: usize,
}

/// Apply `correction` and propagate its fading delta forward.
///
/// Propagation stops at the end of the table or at the first frame that was
/// never located. Correcting an unlocated frame writes that frame only.
pub fn apply_correction(
    table: &mut LocationTable,
    correction: ManualCorrection,
    config: &CorrectionConfig,
) -> Result<CorrectionSummary, TrackError> {
    let len = table.len();
    let current = *table.get(correction.frame).ok_or(TrackError::OutOfRange {
        context: "frame",
        index: correction.frame,
        len,
    })?;

    let manual = PupilLocationRecord {
        x: correction.x,
        y: correction.y,
        radius: correction.radius,
        confidence: MANUAL_CONFIDENCE,
    };
    table.set(correction.frame, manual)?;

    if !current.is_located() {
        tracing::debug!(
            "frame {} was never located; correction is not propagated",
            correction.frame
        );
        return Ok(CorrectionSummary {
            delta: [f64::NAN; 3],
            frames_written: 1,
        });
    }

    let delta = [
        correction.x - current.x,
        correction.y - current.y,
        correction.radius - current.radius,
    ];
    let decay = config.decay_frames;
    let span = match config.mode {
        DecayMode::Linear => decay,
        DecayMode::Exponential => exponential_span(delta, decay),
    };

    let mut written = 1;
    for i in 1..span {
        let frame = correction.frame + i;
        let Some(row) = table.get_mut(frame) else {
            break;
        };
        if !row.is_located() {
            break;
        }
        let f = fade(config.mode, i, decay);
        row.x += delta[0] * f;
        row.y += delta[1] * f;
        if delta[2].is_finite() && row.radius.is_finite() {
            row.radius += delta[2] * f;
        }
        written += 1;
    }

    tracing::debug!(
        "manual correction at frame {}: delta ({:.2}, {:.2}), {} rows written",
        correction.frame,
        delta[0],
        delta[1],
        written
    );
    Ok(CorrectionSummary {
        delta,
        frames_written: written,
    })
}

/// Number of frames (corrected frame included) an exponential correction
/// spans. Positional deltas of length `<= 1` do not propagate.
fn exponential_span(delta: [f64; 3], decay_frames: usize) -> usize {
    let d = delta[0].hypot(delta[1]);
    if !(d > 1.0) || decay_frames == 0 {
        return 1;
    }
    (decay_frames as f64 / d.ln()).ceil() as usize
}

fn fade(mode: DecayMode, i: usize, decay_frames: usize) -> f64 {
    let n = decay_frames as f64;
    match mode {
        DecayMode::Linear => (n - i as f64) / n,
        DecayMode::Exponential => (-(i as f64) / n).exp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn located_table(frames: usize) -> LocationTable {
        let mut t = LocationTable::new(frames);
        for i in 0..frames {
            t.set(
                i,
                PupilLocationRecord {
                    x: 100.0 + i as f64,
                    y: 50.0,
                    radius: 6.0,
                    confidence: 0.95,
                },
            )
            .unwrap();
        }
        t
    }

    #[test]
    fn linear_fade_halves_at_midpoint() {
        let mut t = located_table(60);
        let before = t.clone();
        let summary = apply_correction(
            &mut t,
            ManualCorrection {
                frame: 20,
                x: 130.0,
                y: 50.0,
                radius: 6.0,
            },
            &CorrectionConfig::default(),
        )
        .unwrap();

        assert_eq!(summary.frames_written, 10);
        assert_eq!(t.get(20).unwrap().x, 130.0);
        assert!(t.get(20).unwrap().is_manual());
        assert_relative_eq!(t.get(25).unwrap().x - before.get(25).unwrap().x, 5.0);
        assert_relative_eq!(t.get(29).unwrap().x - before.get(29).unwrap().x, 1.0);
        assert_eq!(t.get(30), before.get(30));
        assert_eq!(t.get(31), before.get(31));
        assert_eq!(t.get(19), before.get(19));
        assert_eq!(t.get(25).unwrap().confidence, 0.95);
    }

    #[test]
    fn propagation_stops_at_unlocated_frame_and_table_end() {
        let mut t = located_table(24);
        t.set(23, PupilLocationRecord::UNLOCATED).unwrap();
        let s = apply_correction(
            &mut t,
            ManualCorrection {
                frame: 20,
                x: 130.0,
                y: 50.0,
                radius: 6.0,
            },
            &CorrectionConfig::default(),
        )
        .unwrap();
        assert_eq!(s.frames_written, 3);
        assert!(!t.get(23).unwrap().is_located());

        let mut t = located_table(22);
        let s = apply_correction(
            &mut t,
            ManualCorrection {
                frame: 20,
                x: 130.0,
                y: 50.0,
                radius: 6.0,
            },
            &CorrectionConfig::default(),
        )
        .unwrap();
        assert_eq!(s.frames_written, 2);
    }

    #[test]
    fn unlocated_target_is_set_without_propagation() {
        let mut t = LocationTable::new(10);
        let s = apply_correction(
            &mut t,
            ManualCorrection {
                frame: 3,
                x: 4.0,
                y: 5.0,
                radius: 6.0,
            },
            &CorrectionConfig::default(),
        )
        .unwrap();
        assert_eq!(s.frames_written, 1);
        assert!(t.get(3).unwrap().is_manual());
        assert!(!t.get(4).unwrap().is_located());
    }

    #[test]
    fn exponential_fade_follows_span_and_factor() {
        let mut t = located_table(80);
        let before = t.clone();
        let cfg = CorrectionConfig {
            decay_frames: 10,
            mode: DecayMode::Exponential,
        };
        // Delta (20, 0): 10 / ln 20 ≈ 3.34, so the correction spans 4 frames.
        let d = 20.0;
        let s = apply_correction(
            &mut t,
            ManualCorrection {
                frame: 10,
                x: before.get(10).unwrap().x + d,
                y: 50.0,
                radius: 6.0,
            },
            &cfg,
        )
        .unwrap();
        assert_eq!(s.frames_written, 4);
        for i in 1..4 {
            let shift = t.get(10 + i).unwrap().x - before.get(10 + i).unwrap().x;
            assert_relative_eq!(shift, d * (-(i as f64) / 10.0).exp(), epsilon = 1e-12);
        }
        assert_eq!(t.get(14), before.get(14));
    }

    #[test]
    fn small_exponential_delta_is_single_frame() {
        let mut t = located_table(30);
        let before = t.clone();
        let s = apply_correction(
            &mut t,
            ManualCorrection {
                frame: 5,
                x: before.get(5).unwrap().x + 0.3,
                y: 50.4,
                radius: 6.0,
            },
            &CorrectionConfig {
                decay_frames: 10,
                mode: DecayMode::Exponential,
            },
        )
        .unwrap();
        assert_eq!(s.frames_written, 1);
        assert_eq!(t.get(6), before.get(6));
    }

    #[test]
    fn out_of_range_frame_is_rejected() {
        let mut t = located_table(5);
        let err = apply_correction(
            &mut t,
            ManualCorrection {
                frame: 5,
                x: 0.0,
                y: 0.0,
                radius: 1.0,
            },
            &CorrectionConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, TrackError::OutOfRange { index: 5, len: 5, .. }));
    }
}
