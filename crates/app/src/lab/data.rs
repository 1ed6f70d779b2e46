use codecs::{PerCodec, Quality};
use face_detect::BoundingBox;
use serde::Serialize;

/// Size and fidelity of one codec's round trip on a single frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub(crate) struct CodecReading {
    pub(crate) size_bytes: usize,
    pub(crate) psnr_db: f64,
    pub(crate) ssim: f64,
}

/// One point of the time series: both codecs measured on the same frame.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Sample {
    /// Seconds since the current series started, rounded to 0.1 s.
    pub(crate) timestamp_s: f64,
    pub(crate) quality: Quality,
    pub(crate) readings: PerCodec<CodecReading>,
}

/// Annotated live frame, already JPEG-encoded for the MJPEG stream.
#[derive(Clone, Debug)]
pub(crate) struct FramePacket {
    pub(crate) jpeg: Vec<u8>,
    pub(crate) frame_number: u64,
    pub(crate) timestamp_ms: i64,
    pub(crate) face: Option<BoundingBox>,
}

/// Most recent face region cut from a live frame.
#[derive(Clone, Debug)]
pub(crate) struct FaceCrop {
    pub(crate) jpeg: Vec<u8>,
    pub(crate) bbox: BoundingBox,
    pub(crate) frame_number: u64,
}

/// Column-oriented view of the series served by `GET /metrics`.
#[derive(Debug, Serialize)]
pub(crate) struct MetricsResponse {
    pub(crate) quality: Quality,
    pub(crate) epoch: u64,
    pub(crate) codecs: PerCodec<&'static str>,
    pub(crate) times: Vec<f64>,
    pub(crate) jpeg_psnr: Vec<f64>,
    pub(crate) webp_psnr: Vec<f64>,
    pub(crate) jpeg_ssim: Vec<f64>,
    pub(crate) webp_ssim: Vec<f64>,
    pub(crate) jpeg_size: Vec<usize>,
    pub(crate) webp_size: Vec<usize>,
}

impl MetricsResponse {
    pub(crate) fn from_samples(
        quality: Quality,
        epoch: u64,
        codecs: PerCodec<&'static str>,
        samples: &[Sample],
    ) -> Self {
        let column = |f: fn(&Sample) -> f64| samples.iter().map(f).collect::<Vec<_>>();
        Self {
            quality,
            epoch,
            codecs,
            times: column(|s| s.timestamp_s),
            jpeg_psnr: column(|s| s.readings.fast.psnr_db),
            webp_psnr: column(|s| s.readings.alternate.psnr_db),
            jpeg_ssim: column(|s| s.readings.fast.ssim),
            webp_ssim: column(|s| s.readings.alternate.ssim),
            jpeg_size: samples.iter().map(|s| s.readings.fast.size_bytes).collect(),
            webp_size: samples
                .iter()
                .map(|s| s.readings.alternate.size_bytes)
                .collect(),
        }
    }
}
