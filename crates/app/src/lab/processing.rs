//! Per-frame face work: detection on a downscaled copy and the face crop.

use std::{borrow::Cow, time::Instant};

use codecs::Quality;
use face_detect::{BoundingBox, detect_scaled};
use tracing::{debug, warn};
use video_ingest::{Frame, FrameFormat};

use crate::lab::{context::LabContext, data::FaceCrop, encoding::encode_stream_jpeg};

/// RGB view of `frame` for the skin-tone detector. Mono frames are expanded,
/// which leaves them without chroma and therefore without a face.
fn detector_input(frame: &Frame) -> Cow<'_, Frame> {
    match frame.format() {
        FrameFormat::Rgb8 => Cow::Borrowed(frame),
        FrameFormat::Luma8 => Cow::Owned(frame.to_rgb()),
    }
}

/// Locate the face on `frame`, in full-resolution coordinates.
///
/// Detector failures are logged and reported as "no face" so one bad frame
/// never stops the loop.
pub(crate) fn detect_face(ctx: &LabContext, frame: &Frame, frame_number: u64) -> Option<BoundingBox> {
    let _detect_span = tracing::info_span!(
        "detect",
        frame = frame_number,
        scale = ctx.tuning.detect_scale
    )
    .entered();
    let started = Instant::now();
    let input = detector_input(frame);
    let result = detect_scaled(ctx.detector.as_ref(), &input, ctx.tuning.detect_scale);
    metrics::histogram!("lab_stage_latency_seconds", "stage" => "detect")
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(Some(bbox)) => {
            if ctx.tuning.verbose {
                debug!(
                    "Face at ({}, {}) {}x{} on frame #{frame_number}",
                    bbox.x, bbox.y, bbox.width, bbox.height
                );
            }
            Some(bbox)
        }
        Ok(None) => None,
        Err(err) => {
            metrics::counter!("lab_detector_errors_total").increment(1);
            warn!("Face detection failed on frame #{frame_number}: {err}");
            None
        }
    }
}

/// Cut the detected region out of `frame` and pre-encode it for the face
/// stream.
pub(crate) fn crop_face(
    frame: &Frame,
    bbox: BoundingBox,
    quality: Quality,
    frame_number: u64,
) -> Option<FaceCrop> {
    let pixels = match frame.crop(bbox.x, bbox.y, bbox.width, bbox.height) {
        Ok(pixels) => pixels,
        Err(err) => {
            warn!("Face crop failed on frame #{frame_number}: {err}");
            return None;
        }
    };
    match encode_stream_jpeg(&pixels, quality) {
        Ok(jpeg) => Some(FaceCrop {
            jpeg,
            bbox,
            frame_number,
        }),
        Err(err) => {
            warn!("Face crop encode failed on frame #{frame_number}: {err:#}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::context::testing::synthetic_context;

    #[test]
    fn synthetic_face_is_found_and_cropped() {
        let ctx = synthetic_context(160, 120);
        let frame = ctx.state.capture().unwrap();
        let bbox = detect_face(&ctx, &frame, 1).expect("synthetic ellipse should be detected");
        assert!(bbox.right() <= 160 && bbox.bottom() <= 120);

        let crop = crop_face(&frame, bbox, Quality::new(80).unwrap(), 1).unwrap();
        assert_eq!(crop.bbox, bbox);
        assert_eq!(&crop.jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn mono_frames_reach_the_detector_as_rgb() {
        let ctx = synthetic_context(160, 120);
        let colour = ctx.state.capture().unwrap();
        assert!(matches!(detector_input(&colour), Cow::Borrowed(_)));

        let mono = colour.to_luma();
        let input = detector_input(&mono);
        assert_eq!(input.format(), FrameFormat::Rgb8);
        assert_eq!((input.width(), input.height()), (160, 120));
        assert!(
            detect_scaled(ctx.detector.as_ref(), &input, ctx.tuning.detect_scale).is_ok(),
            "mono input must not be a detector error"
        );
        assert_eq!(detect_face(&ctx, &mono, 1), None);
    }

    #[test]
    fn out_of_frame_box_yields_no_crop() {
        let frame = Frame::from_rgb_fn(32, 32, |_, _| [0, 0, 0]).unwrap();
        assert!(crop_face(&frame, BoundingBox::new(30, 30, 10, 10), Quality::default(), 1).is_none());
    }
}
