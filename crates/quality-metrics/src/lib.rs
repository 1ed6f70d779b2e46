//! Reconstruction-fidelity metrics comparing an original frame with its
//! decoded counterpart.

mod ssim;

pub use ssim::{SSIM_WINDOW, ssim};

use thiserror::Error;
use video_ingest::{Frame, FrameFormat};

/// Value reported by [`psnr`] when the two frames are identical.
pub const PSNR_CEILING_DB: f64 = 100.0;

const MAX_SAMPLE: f64 = 255.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("frames differ in size ({left_width}x{left_height} vs {right_width}x{right_height})")]
    DimensionMismatch {
        left_width: u32,
        left_height: u32,
        right_width: u32,
        right_height: u32,
    },
    #[error("frames differ in layout ({left:?} vs {right:?})")]
    FormatMismatch {
        left: FrameFormat,
        right: FrameFormat,
    },
    #[error("frame {width}x{height} is smaller than the {window}x{window} SSIM window")]
    TooSmall { width: u32, height: u32, window: u32 },
}

pub(crate) fn ensure_same_shape(a: &Frame, b: &Frame) -> Result<(), MetricsError> {
    if a.width() != b.width() || a.height() != b.height() {
        return Err(MetricsError::DimensionMismatch {
            left_width: a.width(),
            left_height: a.height(),
            right_width: b.width(),
            right_height: b.height(),
        });
    }
    Ok(())
}

/// Mean squared error over every sample of two same-shaped frames.
pub fn mse(a: &Frame, b: &Frame) -> Result<f64, MetricsError> {
    ensure_same_shape(a, b)?;
    if a.format() != b.format() {
        return Err(MetricsError::FormatMismatch {
            left: a.format(),
            right: b.format(),
        });
    }
    let total: u64 = a
        .data()
        .iter()
        .zip(b.data())
        .map(|(&x, &y)| {
            let diff = x as i64 - y as i64;
            (diff * diff) as u64
        })
        .sum();
    Ok(total as f64 / a.data().len() as f64)
}

/// Peak signal-to-noise ratio in dB.
///
/// Saturates at [`PSNR_CEILING_DB`] when the error is zero or the result is not
/// finite, so callers never see infinity or NaN.
pub fn psnr(a: &Frame, b: &Frame) -> Result<f64, MetricsError> {
    let mse = mse(a, b)?;
    if mse == 0.0 || !mse.is_finite() {
        return Ok(PSNR_CEILING_DB);
    }
    let value = 20.0 * (MAX_SAMPLE / mse.sqrt()).log10();
    if value.is_finite() {
        Ok(value.min(PSNR_CEILING_DB))
    } else {
        Ok(PSNR_CEILING_DB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(value: u8, width: u32, height: u32) -> Frame {
        Frame::from_rgb_fn(width, height, |_, _| [value, value, value]).unwrap()
    }

    #[test]
    fn identical_frames_hit_the_ceiling() {
        let frame = Frame::from_rgb_fn(16, 9, |x, y| [x as u8, y as u8, 7]).unwrap();
        let value = psnr(&frame, &frame).unwrap();
        assert_eq!(value, PSNR_CEILING_DB);
        assert!(value.is_finite());
    }

    #[test]
    fn known_error_gives_expected_db() {
        let mse_value = mse(&flat(0, 8, 8), &flat(10, 8, 8)).unwrap();
        assert_eq!(mse_value, 100.0);
        let db = psnr(&flat(0, 8, 8), &flat(10, 8, 8)).unwrap();
        let expected = 20.0 * (255.0f64 / 10.0).log10();
        assert!((db - expected).abs() < 1e-9, "{db} vs {expected}");
    }

    #[test]
    fn worst_case_is_zero_db() {
        let db = psnr(&flat(0, 4, 4), &flat(255, 4, 4)).unwrap();
        assert!(db.abs() < 1e-9);
    }

    #[test]
    fn rejects_mismatched_inputs() {
        assert!(matches!(
            psnr(&flat(0, 4, 4), &flat(0, 4, 5)),
            Err(MetricsError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            psnr(&flat(0, 4, 4), &flat(0, 4, 4).to_luma()),
            Err(MetricsError::FormatMismatch { .. })
        ));
    }
}
