//! Error type shared by the localization and calibration engines.

use std::path::PathBuf;

/// Errors surfaced to callers of the tracking and calibration APIs.
#[derive(Debug)]
pub enum TrackError {
    /// A template crop region is invalid (both opposite edges of one axis
    /// fall outside the frame, or nothing is left after clipping).
    Geometry {
        /// Human-readable description of the offending region.
        reason: String,
    },
    /// Template/anti-template/frame index is invalid, or the operation would
    /// remove the last remaining positive template.
    OutOfRange {
        /// What was being indexed.
        context: &'static str,
        /// Requested index.
        index: usize,
        /// Number of valid entries.
        len: usize,
    },
    /// A mapping was evaluated before any successful calibration.
    NotCalibrated,
    /// A template bundle could not be parsed.
    CorruptArchive {
        /// Bundle location.
        path: PathBuf,
        /// Parse failure description.
        reason: String,
    },
    /// A frame does not match the geometry declared by its source.
    VideoFormatMismatch {
        /// Declared `[width, height]`.
        expected: [u32; 2],
        /// Observed `[width, height]`.
        got: [u32; 2],
    },
    /// Degenerate configuration or sample set.
    InvalidInput(String),
    /// Underlying I/O failure.
    Io(std::io::Error),
}

impl std::fmt::Display for TrackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Geometry { reason } => write!(f, "invalid template geometry: {}", reason),
            Self::OutOfRange {
                context,
                index,
                len,
            } => write!(f, "{} index {} out of range (len {})", context, index, len),
            Self::NotCalibrated => write!(f, "no calibration has been fitted"),
            Self::CorruptArchive { path, reason } => {
                write!(f, "corrupt template bundle {}: {}", path.display(), reason)
            }
            Self::VideoFormatMismatch { expected, got } => write!(
                f,
                "frame size {}x{} does not match source size {}x{}",
                got[0], got[1], expected[0], expected[1]
            ),
            Self::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            Self::Io(e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl std::error::Error for TrackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TrackError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl TrackError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::CorruptArchive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
