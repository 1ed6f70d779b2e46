//! Deterministic test-pattern source used when no camera is attached.

use chrono::Utc;

use crate::types::{CaptureError, Frame, FrameSource};

/// Renders a textured blue backdrop with a skin-toned ellipse drifting on a
/// circular path, so detection, compression and metrics all have something to
/// chew on.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    tick: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            tick: 0,
        }
    }

    /// Render the frame for a given tick without advancing the source.
    pub fn render(&self, tick: u64) -> Result<Frame, CaptureError> {
        let w = self.width as f32;
        let h = self.height as f32;
        let phase = tick as f32 * 0.15;
        let cx = w / 2.0 + (w / 6.0) * phase.cos();
        let cy = h / 2.0 + (h / 8.0) * phase.sin();
        let rx = (w / 7.0).max(1.0);
        let ry = (h / 5.0).max(1.0);
        let shift = tick.wrapping_mul(3) as u32;

        let frame = Frame::from_rgb_fn(self.width, self.height, |x, y| {
            let dx = (x as f32 - cx) / rx;
            let dy = (y as f32 - cy) / ry;
            if dx * dx + dy * dy <= 1.0 {
                let shade = ((x * 7 + y * 13) % 16) as u8;
                [207 + shade, 152 + shade, 122 + shade]
            } else {
                [
                    20 + (x.wrapping_add(shift) % 64) as u8,
                    40 + ((y * 2 + x) % 48) as u8,
                    150 + ((x ^ y) & 63) as u8,
                ]
            }
        })?;
        Ok(frame)
    }
}

impl FrameSource for SyntheticSource {
    fn capture(&mut self) -> Result<Frame, CaptureError> {
        let frame = self.render(self.tick)?;
        self.tick = self.tick.wrapping_add(1);
        Ok(frame.with_timestamp(Utc::now().timestamp_millis()))
    }

    fn describe(&self) -> String {
        format!("synthetic {}x{}", self.width, self.height)
    }
}
