//! Frame sources feeding the controller.

use std::path::{Path, PathBuf};

use image::GrayImage;

use crate::error::TrackError;

/// Sequential grayscale frame reader with random seek.
pub trait FrameSource {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn fps(&self) -> f64;
    fn frame_count(&self) -> usize;

    /// Position the reader so the next `read_frame` returns frame `index`.
    fn seek(&mut self, index: usize) -> Result<(), TrackError>;

    /// Next frame, or `None` at end of stream.
    fn read_frame(&mut self) -> Result<Option<GrayImage>, TrackError>;
}

fn check_seek(index: usize, len: usize) -> Result<(), TrackError> {
    if index > len {
        return Err(TrackError::OutOfRange {
            context: "frame",
            index,
            len,
        });
    }
    Ok(())
}

/// Frames held in memory.
#[derive(Debug, Clone)]
pub struct MemoryFrameSource {
    frames: Vec<GrayImage>,
    width: u32,
    height: u32,
    fps: f64,
    cursor: usize,
}

impl MemoryFrameSource {
    /// Source whose declared size is that of the first frame.
    pub fn new(frames: Vec<GrayImage>, fps: f64) -> Self {
        let (width, height) = frames.first().map_or((0, 0), |f| f.dimensions());
        Self::with_size(frames, width, height, fps)
    }

    /// Source declaring `width × height` regardless of the frames it holds.
    pub fn with_size(frames: Vec<GrayImage>, width: u32, height: u32, fps: f64) -> Self {
        Self {
            frames,
            width,
            height,
            fps,
            cursor: 0,
        }
    }
}

impl FrameSource for MemoryFrameSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn seek(&mut self, index: usize) -> Result<(), TrackError> {
        check_seek(index, self.frames.len())?;
        self.cursor = index;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<GrayImage>, TrackError> {
        let frame = self.frames.get(self.cursor).cloned();
        if frame.is_some() {
            self.cursor += 1;
        }
        Ok(frame)
    }
}

const SEQUENCE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Directory of still images, one per frame, ordered by file name.
///
/// Frames are decoded lazily and converted to 8-bit luma.
#[derive(Debug, Clone)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    width: u32,
    height: u32,
    fps: f64,
    cursor: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, fps: f64) -> Result<Self, TrackError> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(TrackError::InvalidInput(format!("invalid frame rate {}", fps)));
        }
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| SEQUENCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if path.is_file() && is_image {
                paths.push(path);
            }
        }
        paths.sort();
        let first = paths.first().ok_or_else(|| {
            TrackError::InvalidInput(format!("no image frames in {}", dir.display()))
        })?;
        let (width, height) = image::image_dimensions(first)
            .map_err(|e| TrackError::InvalidInput(format!("{}: {}", first.display(), e)))?;
        tracing::info!(
            "image sequence {}: {} frames of {}x{}",
            dir.display(),
            paths.len(),
            width,
            height
        );
        Ok(Self {
            paths,
            width,
            height,
            fps,
            cursor: 0,
        })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl FrameSource for ImageSequenceSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> usize {
        self.paths.len()
    }

    fn seek(&mut self, index: usize) -> Result<(), TrackError> {
        check_seek(index, self.paths.len())?;
        self.cursor = index;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<GrayImage>, TrackError> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };
        let img = image::open(path)
            .map_err(|e| TrackError::InvalidInput(format!("{}: {}", path.display(), e)))?;
        self.cursor += 1;
        Ok(Some(img.to_luma8()))
    }
}
