//! Dense per-frame pupil location table.
//!
//! One row per video frame, `[x, y, radius, confidence]` as `f64`. `NaN` in
//! `x` marks a frame that has not been located; confidence
//! [`MANUAL_CONFIDENCE`] marks a row set by manual correction. On disk the
//! table is a flat little-endian `f64` array of shape `[frames, 4]`.

use std::path::Path;

use crate::error::TrackError;

/// Confidence sentinel for manually corrected rows.
pub const MANUAL_CONFIDENCE: f64 = 2.0;

const COLUMNS: usize = 4;
const ROW_BYTES: usize = COLUMNS * std::mem::size_of::<f64>();

/// Pupil estimate for one frame.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PupilLocationRecord {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub confidence: f64,
}

impl PupilLocationRecord {
    /// Row of a frame that has not been processed yet.
    pub const UNLOCATED: Self = Self {
        x: f64::NAN,
        y: f64::NAN,
        radius: f64::NAN,
        confidence: f64::NAN,
    };

    pub fn is_located(&self) -> bool {
        !self.x.is_nan()
    }

    pub fn is_manual(&self) -> bool {
        self.confidence == MANUAL_CONFIDENCE
    }

    fn to_array(self) -> [f64; COLUMNS] {
        [self.x, self.y, self.radius, self.confidence]
    }

    fn from_array(a: [f64; COLUMNS]) -> Self {
        Self {
            x: a[0],
            y: a[1],
            radius: a[2],
            confidence: a[3],
        }
    }
}

/// Frame-indexed table of pupil records, pre-allocated to the video length.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationTable {
    rows: Vec<PupilLocationRecord>,
}

impl LocationTable {
    /// Table of `frames` unlocated rows.
    pub fn new(frames: usize) -> Self {
        Self {
            rows: vec![PupilLocationRecord::UNLOCATED; frames],
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, frame: usize) -> Option<&PupilLocationRecord> {
        self.rows.get(frame)
    }

    pub fn get_mut(&mut self, frame: usize) -> Option<&mut PupilLocationRecord> {
        self.rows.get_mut(frame)
    }

    pub fn rows(&self) -> &[PupilLocationRecord] {
        &self.rows
    }

    pub fn set(&mut self, frame: usize, record: PupilLocationRecord) -> Result<(), TrackError> {
        let len = self.rows.len();
        let row = self.rows.get_mut(frame).ok_or(TrackError::OutOfRange {
            context: "frame",
            index: frame,
            len,
        })?;
        *row = record;
        Ok(())
    }

    /// Number of rows with a located position.
    pub fn located_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_located()).count()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.rows.len() * ROW_BYTES);
        for row in &self.rows {
            for v in row.to_array() {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TrackError> {
        if bytes.len() % ROW_BYTES != 0 {
            return Err(TrackError::InvalidInput(format!(
                "location table size {} is not a multiple of {} bytes",
                bytes.len(),
                ROW_BYTES
            )));
        }
        let rows = bytes
            .chunks_exact(ROW_BYTES)
            .map(|row| {
                let mut a = [0.0f64; COLUMNS];
                for (dst, src) in a.iter_mut().zip(row.chunks_exact(8)) {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(src);
                    *dst = f64::from_le_bytes(b);
                }
                PupilLocationRecord::from_array(a)
            })
            .collect();
        Ok(Self { rows })
    }

    pub fn save(&self, path: &Path) -> Result<(), TrackError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TrackError> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}
