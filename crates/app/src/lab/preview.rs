//! Single-frame previews of each processing step, served by `GET /preview`.
//!
//! Stages are addressed by name (`raw`, `detection`, ...) or by the dotted
//! ids older dashboards use (`5.1`, `5.2`, ...).

use std::{fmt, str::FromStr};

use anyhow::Result;
use codecs::{Codec, Quality};
use face_detect::{Detector, detect_scaled};
use quality_metrics::{psnr, ssim};
use tracing::warn;
use video_ingest::Frame;

use crate::lab::{annotation, context::LabContext, encoding::encode_stream_jpeg};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PreviewStage {
    Raw,
    Detection,
    Grayscale,
    Compressed,
    Metrics,
    Composite,
}

impl PreviewStage {
    pub(crate) const ALL: [PreviewStage; 6] = [
        PreviewStage::Raw,
        PreviewStage::Detection,
        PreviewStage::Grayscale,
        PreviewStage::Compressed,
        PreviewStage::Metrics,
        PreviewStage::Composite,
    ];

    pub(crate) fn name(self) -> &'static str {
        match self {
            PreviewStage::Raw => "raw",
            PreviewStage::Detection => "detection",
            PreviewStage::Grayscale => "grayscale",
            PreviewStage::Compressed => "compressed",
            PreviewStage::Metrics => "metrics",
            PreviewStage::Composite => "composite",
        }
    }

    fn legacy_id(self) -> &'static str {
        match self {
            PreviewStage::Raw => "5.1",
            PreviewStage::Detection => "5.2",
            PreviewStage::Grayscale => "5.2g",
            PreviewStage::Compressed => "5.3",
            PreviewStage::Metrics => "5.4",
            PreviewStage::Composite => "5.6",
        }
    }

    /// Stage for an optional `step` parameter. A missing step is `Raw`; an
    /// unknown one is `Raw` only when `lenient`.
    pub(crate) fn resolve(step: Option<&str>, lenient: bool) -> Result<Self, UnknownStage> {
        match step {
            None => Ok(PreviewStage::Raw),
            Some(step) => match step.parse() {
                Ok(stage) => Ok(stage),
                Err(_) if lenient => Ok(PreviewStage::Raw),
                Err(err) => Err(err),
            },
        }
    }
}

impl FromStr for PreviewStage {
    type Err = UnknownStage;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let wanted = input.trim();
        PreviewStage::ALL
            .into_iter()
            .find(|stage| stage.name().eq_ignore_ascii_case(wanted) || stage.legacy_id() == wanted)
            .ok_or_else(|| UnknownStage(input.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct UnknownStage(pub(crate) String);

impl fmt::Display for UnknownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = PreviewStage::ALL.iter().map(|s| s.name()).collect();
        write!(
            f,
            "unknown preview step {:?}; expected one of {}",
            self.0,
            names.join(", ")
        )
    }
}

impl std::error::Error for UnknownStage {}

/// Tools a stage may need besides the frame itself.
pub(crate) struct StageTools<'a> {
    pub(crate) detector: &'a dyn Detector,
    pub(crate) codec: &'a dyn Codec,
    pub(crate) quality: Quality,
    pub(crate) detect_scale: u32,
}

/// Render `stage` for one captured frame.
pub(crate) fn apply_stage(stage: PreviewStage, frame: &Frame, tools: &StageTools<'_>) -> Result<Frame> {
    let frame = frame.to_rgb();
    match stage {
        PreviewStage::Raw => Ok(frame),
        PreviewStage::Detection => {
            let face = detect_scaled(tools.detector, &frame, tools.detect_scale).unwrap_or_else(|err| {
                warn!("Preview detection failed: {err}");
                None
            });
            Ok(annotation::draw_detection(&frame, face)?)
        }
        PreviewStage::Grayscale => Ok(frame.to_luma().to_rgb()),
        PreviewStage::Compressed => round_trip(&frame, tools),
        PreviewStage::Metrics => {
            let decoded = round_trip(&frame, tools)?;
            let psnr_db = psnr(&frame, &decoded)?;
            let ssim = ssim(&frame, &decoded)?;
            Ok(annotation::overlay_metrics(&decoded, psnr_db, ssim)?)
        }
        PreviewStage::Composite => {
            let decoded = round_trip(&frame, tools)?;
            Ok(frame.hstack(&decoded)?)
        }
    }
}

fn round_trip(frame: &Frame, tools: &StageTools<'_>) -> Result<Frame> {
    let bytes = tools.codec.encode(frame, tools.quality)?;
    Ok(tools.codec.decode(&bytes)?.to_rgb())
}

/// Capture a fresh frame and render `stage` as JPEG.
///
/// Uses the fast codec at the current pipeline quality for the compressed
/// stages.
pub(crate) fn render_preview(ctx: &LabContext, stage: PreviewStage) -> Result<Vec<u8>> {
    let _preview_span = tracing::info_span!("preview", stage = stage.name()).entered();
    let frame = ctx.state.capture()?;
    let tools = StageTools {
        detector: ctx.detector.as_ref(),
        codec: ctx.codecs.fast.as_ref(),
        quality: ctx.state.series().quality(),
        detect_scale: ctx.tuning.detect_scale,
    };
    let rendered = apply_stage(stage, &frame, &tools)?;
    encode_stream_jpeg(&rendered, ctx.tuning.stream_quality)
}

#[cfg(test)]
mod tests {
    use codecs::JpegCodec;
    use face_detect::SkinToneDetector;
    use video_ingest::SyntheticSource;

    use super::*;
    use crate::lab::context::testing::synthetic_context;

    fn tools<'a>(detector: &'a SkinToneDetector, codec: &'a JpegCodec) -> StageTools<'a> {
        StageTools {
            detector,
            codec,
            quality: Quality::new(30).unwrap(),
            detect_scale: 2,
        }
    }

    #[test]
    fn names_and_legacy_ids_parse() {
        for stage in PreviewStage::ALL {
            assert_eq!(stage.name().parse::<PreviewStage>(), Ok(stage));
            assert_eq!(stage.legacy_id().parse::<PreviewStage>(), Ok(stage));
        }
        assert_eq!("  Composite ".parse::<PreviewStage>(), Ok(PreviewStage::Composite));
        assert!("5.9".parse::<PreviewStage>().is_err());
    }

    #[test]
    fn unknown_step_is_strict_unless_lenient() {
        assert_eq!(PreviewStage::resolve(None, false), Ok(PreviewStage::Raw));
        let err = PreviewStage::resolve(Some("sepia"), false).unwrap_err();
        assert!(err.to_string().contains("sepia"));
        assert_eq!(PreviewStage::resolve(Some("sepia"), true), Ok(PreviewStage::Raw));
        assert_eq!(
            PreviewStage::resolve(Some("5.2g"), false),
            Ok(PreviewStage::Grayscale)
        );
    }

    #[test]
    fn every_stage_renders_with_expected_shape() {
        let detector = SkinToneDetector::new();
        let codec = JpegCodec;
        let tools = tools(&detector, &codec);
        let frame = SyntheticSource::new(96, 64).render(0).unwrap();
        for stage in PreviewStage::ALL {
            let out = apply_stage(stage, &frame, &tools).unwrap();
            let expected_width = if stage == PreviewStage::Composite { 192 } else { 96 };
            assert_eq!((out.width(), out.height()), (expected_width, 64), "{stage:?}");
        }
    }

    #[test]
    fn grayscale_stage_has_equal_channels() {
        let detector = SkinToneDetector::new();
        let codec = JpegCodec;
        let frame = SyntheticSource::new(32, 32).render(0).unwrap();
        let out = apply_stage(PreviewStage::Grayscale, &frame, &tools(&detector, &codec)).unwrap();
        let px = out.pixel(5, 5);
        assert!(px[0] == px[1] && px[1] == px[2]);
    }

    #[test]
    fn raw_stage_is_the_captured_frame() {
        let detector = SkinToneDetector::new();
        let codec = JpegCodec;
        let frame = SyntheticSource::new(40, 30).render(2).unwrap();
        let out = apply_stage(PreviewStage::Raw, &frame, &tools(&detector, &codec)).unwrap();
        assert_eq!(out, frame);
    }

    #[test]
    fn render_preview_produces_jpeg() {
        let ctx = synthetic_context(64, 48);
        let bytes = render_preview(&ctx, PreviewStage::Composite).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert!(ctx.state.detach_source().is_some());
        assert!(render_preview(&ctx, PreviewStage::Raw).is_err());
    }
}
