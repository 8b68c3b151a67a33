//! Frame sources feeding the detection loop.

use crate::overlay::DisplaySize;
use image::RgbImage;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const FRAME_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// One video frame plus the size it is shown at.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<RgbImage>,
    pub display: DisplaySize,
}

impl Frame {
    pub fn new(image: Arc<RgbImage>, display: DisplaySize) -> Self {
        Self { image, display }
    }

    /// Per-axis factor from raster pixels to display pixels.
    pub fn display_scale(&self) -> (f32, f32) {
        let (w, h) = self.image.dimensions();
        if w == 0 || h == 0 {
            return (1.0, 1.0);
        }
        (
            self.display.width as f32 / w as f32,
            self.display.height as f32 / h as f32,
        )
    }
}

/// A live feed. `None` (or an empty size) means the feed is not ready.
pub trait FrameSource: Send {
    fn display_size(&self) -> Option<DisplaySize>;
    fn capture(&mut self) -> Option<Frame>;
}

/// Plays a list of still images as a feed, one image per capture.
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    looping: bool,
    display: DisplaySize,
}

impl ImageSequenceSource {
    pub fn new(paths: Vec<PathBuf>, display: DisplaySize, looping: bool) -> Self {
        Self {
            paths,
            cursor: 0,
            looping,
            display,
        }
    }

    /// Every jpg/png in `dir`, sorted by file name.
    pub fn from_dir(dir: &Path, display: DisplaySize, looping: bool) -> io::Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_frame_extension(p))
            .collect();
        paths.sort();
        tracing::info!(dir = %dir.display(), frames = paths.len(), looping, "image sequence opened");
        Ok(Self::new(paths, display, looping))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.paths.is_empty() || (!self.looping && self.cursor >= self.paths.len())
    }

    fn next_path(&mut self) -> Option<PathBuf> {
        if self.is_exhausted() {
            return None;
        }
        if self.cursor >= self.paths.len() {
            self.cursor = 0;
        }
        let path = self.paths[self.cursor].clone();
        self.cursor += 1;
        Some(path)
    }
}

pub(crate) fn has_frame_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageSequenceSource {
    fn display_size(&self) -> Option<DisplaySize> {
        (!self.is_exhausted() && !self.display.is_empty()).then_some(self.display)
    }

    fn capture(&mut self) -> Option<Frame> {
        let path = self.next_path()?;
        match image::open(&path) {
            Ok(img) => Some(Frame::new(Arc::new(img.to_rgb8()), self.display)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable frame");
                None
            }
        }
    }
}
