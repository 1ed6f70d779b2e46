//! Codec round trips and the fidelity measurements taken from them.

use std::time::Instant;

use anyhow::{Context, Result};
use codecs::{Codec, JpegCodec, PerCodec, Quality, SharedCodec};
use quality_metrics::{psnr, ssim};
use video_ingest::Frame;

use crate::lab::data::CodecReading;

/// Reading plus the reconstructed frame it was computed from.
#[derive(Clone, Debug)]
pub(crate) struct Measurement {
    pub(crate) reading: CodecReading,
    pub(crate) decoded: Frame,
}

/// Encode, decode and compare one frame.
///
/// PSNR compares full colour samples; SSIM compares luminance.
pub(crate) fn measure(codec: &dyn Codec, frame: &Frame, quality: Quality) -> Result<Measurement> {
    let bytes = codec
        .encode(frame, quality)
        .with_context(|| format!("{} encode at q{quality}", codec.name()))?;
    let decoded = codec
        .decode(&bytes)
        .with_context(|| format!("{} decode of {} bytes", codec.name(), bytes.len()))?;
    let psnr_db = psnr(&frame.to_rgb(), &decoded.to_rgb())
        .with_context(|| format!("{} PSNR", codec.name()))?;
    let ssim = ssim(frame, &decoded).with_context(|| format!("{} SSIM", codec.name()))?;
    Ok(Measurement {
        reading: CodecReading {
            size_bytes: bytes.len(),
            psnr_db,
            ssim,
        },
        decoded,
    })
}

/// Measure both codecs on the same frame at the same quality.
pub(crate) fn measure_codecs(
    codecs: &PerCodec<SharedCodec>,
    frame: &Frame,
    quality: Quality,
    frame_number: u64,
) -> Result<PerCodec<Measurement>> {
    codecs.try_map(|_, codec| {
        let _codec_span = tracing::info_span!(
            "codec",
            codec = codec.name(),
            quality = quality.get(),
            frame = frame_number
        )
        .entered();
        let started = Instant::now();
        let measurement = measure(codec.as_ref(), frame, quality)?;
        metrics::histogram!("lab_codec_round_trip_seconds", "codec" => codec.name())
            .record(started.elapsed().as_secs_f64());
        metrics::histogram!("lab_encoded_bytes", "codec" => codec.name())
            .record(measurement.reading.size_bytes as f64);
        Ok(measurement)
    })
}

/// JPEG bytes for the live and face streams.
pub(crate) fn encode_stream_jpeg(frame: &Frame, quality: Quality) -> Result<Vec<u8>> {
    JpegCodec
        .encode(frame, quality)
        .context("stream JPEG encode")
}
