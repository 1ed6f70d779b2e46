//! Face-region detection capability and the default skin-tone detector.

pub mod detector;

pub use detector::SkinToneDetector;

use thiserror::Error;
use video_ingest::{Frame, FrameFormat};

/// Axis-aligned box in pixel coordinates of the frame it was detected on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Multiply every coordinate by `factor`.
    pub fn scaled(self, factor: u32) -> Self {
        Self {
            x: self.x.saturating_mul(factor),
            y: self.y.saturating_mul(factor),
            width: self.width.saturating_mul(factor),
            height: self.height.saturating_mul(factor),
        }
    }

    /// Trim the box so it lies inside a `width`×`height` frame, or `None` when
    /// nothing of it remains.
    pub fn clamped_to(self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Self::new(self.x, self.y, w, h))
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("detector requires {expected:?} frames, got {actual:?}")]
    UnsupportedFormat {
        expected: FrameFormat,
        actual: FrameFormat,
    },
}

/// Finds the most salient face-like region in a frame.
///
/// Implementations must be deterministic for a given frame and must not touch
/// shared state; when several candidates qualify the last one in scan order is
/// returned.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Option<BoundingBox>, DetectError>;
}

/// Run `detector` on a copy shrunk by `scale`, then map the result back onto
/// the full-resolution frame.
pub fn detect_scaled(
    detector: &dyn Detector,
    frame: &Frame,
    scale: u32,
) -> Result<Option<BoundingBox>, DetectError> {
    let scale = scale.max(1);
    let small = frame.downscale(scale);
    let found = detector.detect(&small)?;
    Ok(found.and_then(|bbox| bbox.scaled(scale).clamped_to(frame.width(), frame.height())))
}
