use video_ingest::{Frame, FrameFormat};

use crate::{BoundingBox, DetectError, Detector};

/// Window sizes tried, as fractions of the shorter frame side, smallest first.
const DEFAULT_SCALES: [f32; 6] = [0.15, 0.2, 0.25, 0.33, 0.5, 0.75];
const MIN_WINDOW: u32 = 4;

/// Multi-scale sliding-window detector over a YCbCr skin-tone mask.
///
/// Every square window whose skin coverage reaches the threshold is a
/// candidate. Scales run smallest to largest and positions row-major, and the
/// last candidate wins, so the result is usually the largest window that still
/// sits on the face.
#[derive(Clone, Debug)]
pub struct SkinToneDetector {
    min_coverage: f32,
    scales: Vec<f32>,
}

impl Default for SkinToneDetector {
    fn default() -> Self {
        Self {
            min_coverage: 0.6,
            scales: DEFAULT_SCALES.to_vec(),
        }
    }
}

impl SkinToneDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the fraction of skin pixels a window needs to qualify.
    pub fn with_min_coverage(mut self, coverage: f32) -> Self {
        self.min_coverage = coverage.clamp(0.0, 1.0);
        self
    }

    pub fn min_coverage(&self) -> f32 {
        self.min_coverage
    }
}

impl Detector for SkinToneDetector {
    fn detect(&self, frame: &Frame) -> Result<Option<BoundingBox>, DetectError> {
        if frame.format() != FrameFormat::Rgb8 {
            return Err(DetectError::UnsupportedFormat {
                expected: FrameFormat::Rgb8,
                actual: frame.format(),
            });
        }

        let width = frame.width();
        let height = frame.height();
        let integral = SkinIntegral::build(frame);
        let min_dim = width.min(height);

        let mut last = None;
        for &fraction in &self.scales {
            let window = ((min_dim as f32 * fraction) as u32).max(MIN_WINDOW);
            if window > min_dim {
                continue;
            }
            let stride = (window / 4).max(1) as usize;
            let needed = self.min_coverage * (window * window) as f32;
            for y in (0..=height - window).step_by(stride) {
                for x in (0..=width - window).step_by(stride) {
                    if integral.sum(x, y, window, window) as f32 >= needed {
                        last = Some(BoundingBox::new(x, y, window, window));
                    }
                }
            }
        }
        Ok(last)
    }
}

/// Classic Cb/Cr box rule; a luma floor keeps deep shadows out.
pub(crate) fn is_skin(r: u8, g: u8, b: u8) -> bool {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 128.0 - 0.168736 * r - 0.331264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418688 * g - 0.081312 * b;
    y > 40.0 && (77.0..=127.0).contains(&cb) && (133.0..=173.0).contains(&cr)
}

/// Summed-area table of the skin mask.
struct SkinIntegral {
    stride: usize,
    sums: Vec<u32>,
}

impl SkinIntegral {
    fn build(frame: &Frame) -> Self {
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let stride = width + 1;
        let mut sums = vec![0u32; stride * (height + 1)];
        for (row, line) in frame.data().chunks_exact(width * 3).enumerate() {
            let mut running = 0u32;
            for (col, px) in line.chunks_exact(3).enumerate() {
                running += is_skin(px[0], px[1], px[2]) as u32;
                sums[(row + 1) * stride + col + 1] = sums[row * stride + col + 1] + running;
            }
        }
        Self { stride, sums }
    }

    fn sum(&self, x: u32, y: u32, width: u32, height: u32) -> u32 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + width as usize, y0 + height as usize);
        let at = |row: usize, col: usize| self.sums[row * self.stride + col];
        at(y1, x1) + at(y0, x0) - at(y0, x1) - at(y1, x0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKIN: [u8; 3] = [224, 172, 140];
    const BACKDROP: [u8; 3] = [30, 60, 200];

    fn scene(width: u32, height: u32, blocks: &[BoundingBox]) -> Frame {
        Frame::from_rgb_fn(width, height, |x, y| {
            let inside = blocks
                .iter()
                .any(|b| x >= b.x && x < b.right() && y >= b.y && y < b.bottom());
            if inside { SKIN } else { BACKDROP }
        })
        .unwrap()
    }

    fn centre_inside(found: BoundingBox, target: BoundingBox) -> bool {
        let cx = found.x + found.width / 2;
        let cy = found.y + found.height / 2;
        cx >= target.x && cx < target.right() && cy >= target.y && cy < target.bottom()
    }

    #[test]
    fn skin_rule_separates_tones() {
        assert!(is_skin(SKIN[0], SKIN[1], SKIN[2]));
        assert!(!is_skin(BACKDROP[0], BACKDROP[1], BACKDROP[2]));
        assert!(!is_skin(0, 0, 0));
    }

    #[test]
    fn finds_single_face_block() {
        let face = BoundingBox::new(40, 30, 60, 60);
        let found = SkinToneDetector::new()
            .detect(&scene(160, 120, &[face]))
            .unwrap()
            .expect("face block should be detected");
        assert!(centre_inside(found, face), "{found:?} not centred on {face:?}");
        assert!(found.width >= 30);
    }

    #[test]
    fn empty_scene_has_no_detection() {
        let found = SkinToneDetector::new().detect(&scene(160, 120, &[])).unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn last_candidate_in_scan_order_wins() {
        let first = BoundingBox::new(10, 10, 40, 40);
        let second = BoundingBox::new(100, 60, 40, 40);
        let found = SkinToneDetector::new()
            .detect(&scene(160, 120, &[first, second]))
            .unwrap()
            .unwrap();
        assert!(centre_inside(found, second), "{found:?} should sit on {second:?}");
    }

    #[test]
    fn detection_is_deterministic() {
        let frame = scene(96, 72, &[BoundingBox::new(20, 20, 30, 30)]);
        let detector = SkinToneDetector::new();
        assert_eq!(detector.detect(&frame).unwrap(), detector.detect(&frame).unwrap());
    }

    #[test]
    fn rejects_luma_frames() {
        let frame = scene(32, 32, &[]).to_luma();
        assert!(matches!(
            SkinToneDetector::new().detect(&frame),
            Err(DetectError::UnsupportedFormat { .. })
        ));
    }
}
