use std::{sync::Arc, time::Duration};

use codecs::{PerCodec, Quality, SharedCodec, default_codecs};
use face_detect::{Detector, SkinToneDetector};

use crate::lab::{config::LabConfig, state::PipelineState};

/// Per-run knobs read on every iteration.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Tuning {
    pub(crate) detect_scale: u32,
    pub(crate) interval: Duration,
    pub(crate) stream_quality: Quality,
    pub(crate) lenient_preview: bool,
    pub(crate) verbose: bool,
}

impl From<&LabConfig> for Tuning {
    fn from(config: &LabConfig) -> Self {
        Self {
            detect_scale: config.detect_scale,
            interval: config.interval,
            stream_quality: config.stream_quality,
            lenient_preview: config.lenient_preview,
            verbose: config.verbose,
        }
    }
}

/// Everything the pipeline loop and the HTTP handlers share. Cheap to clone.
#[derive(Clone)]
pub(crate) struct LabContext {
    pub(crate) state: Arc<PipelineState>,
    pub(crate) detector: Arc<dyn Detector>,
    pub(crate) codecs: PerCodec<SharedCodec>,
    pub(crate) tuning: Tuning,
}

impl LabContext {
    pub(crate) fn new(config: &LabConfig) -> Self {
        Self {
            state: Arc::new(PipelineState::new(
                config.initial_quality,
                config.max_samples,
            )),
            detector: Arc::new(SkinToneDetector::new()),
            codecs: default_codecs(),
            tuning: Tuning::from(config),
        }
    }

    pub(crate) fn codec_names(&self) -> PerCodec<&'static str> {
        self.codecs.map(|_, codec| codec.name())
    }
}
