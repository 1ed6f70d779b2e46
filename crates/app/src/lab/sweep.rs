//! One-shot quality sweep: capture a single frame and measure both codecs at
//! every requested quality.

use std::{fmt::Write as _, thread, time::Duration};

use anyhow::{Context, Result, bail};
use codecs::{CodecKind, PerCodec, Quality, SharedCodec, default_codecs};
use tracing::{debug, info, warn};
use video_ingest::{Frame, FrameSource, open_source};

use crate::lab::{config::SweepConfig, data::CodecReading, encoding::measure};

const CAPTURE_ATTEMPTS: usize = 20;
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Readings for one quality level.
#[derive(Clone, Debug)]
pub(crate) struct SweepRow {
    pub(crate) quality: Quality,
    pub(crate) readings: PerCodec<CodecReading>,
}

/// Run the sweep and print the table to stdout.
pub fn run_sweep(config: SweepConfig) -> Result<()> {
    let _sweep_span = tracing::info_span!("sweep", source = %config.source).entered();
    let mut source = open_source(&config.source, (config.width, config.height))
        .with_context(|| format!("Failed to open frame source {}", config.source))?;
    let frame = capture_one(source.as_mut())?;
    info!(
        "Sweeping {} qualities over a {}x{} frame from {}",
        config.qualities.len(),
        frame.width(),
        frame.height(),
        source.describe()
    );

    let codecs = default_codecs();
    let rows = sweep_frame(&codecs, &frame, &config.qualities)?;
    let names = codecs.map(|_, codec| codec.name());
    print!("{}", render_table(&names, &rows));

    for kind in CodecKind::ALL {
        for (lower, higher) in size_trend_breaks(&rows, kind) {
            // Encoders are free to do this; worth a note, not a failure.
            warn!(
                "{} output shrank from q{lower} to q{higher}",
                names.get(kind)
            );
        }
    }
    Ok(())
}

fn capture_one(source: &mut dyn FrameSource) -> Result<Frame> {
    for attempt in 1..=CAPTURE_ATTEMPTS {
        match source.capture() {
            Ok(frame) => return Ok(frame),
            Err(err) if err.is_transient() => {
                debug!("Capture attempt {attempt} not ready: {err}");
                thread::sleep(CAPTURE_RETRY_DELAY);
            }
            Err(err) => return Err(err).context("Failed to capture sweep frame"),
        }
    }
    bail!("No frame from {} after {CAPTURE_ATTEMPTS} attempts", source.describe())
}

/// Measure every codec at each quality, in the order given.
pub(crate) fn sweep_frame(
    codecs: &PerCodec<SharedCodec>,
    frame: &Frame,
    qualities: &[Quality],
) -> Result<Vec<SweepRow>> {
    qualities
        .iter()
        .map(|&quality| {
            let readings =
                codecs.try_map(|_, codec| measure(codec.as_ref(), frame, quality).map(|m| m.reading))?;
            Ok(SweepRow { quality, readings })
        })
        .collect()
}

/// Adjacent quality pairs where the encoded size went down as quality went
/// up.
pub(crate) fn size_trend_breaks(rows: &[SweepRow], kind: CodecKind) -> Vec<(Quality, Quality)> {
    rows.windows(2)
        .filter(|pair| pair[1].readings.get(kind).size_bytes < pair[0].readings.get(kind).size_bytes)
        .map(|pair| (pair[0].quality, pair[1].quality))
        .collect()
}

pub(crate) fn render_table(names: &PerCodec<&'static str>, rows: &[SweepRow]) -> String {
    let mut out = String::new();
    let _ = write!(out, "{:>7}", "quality");
    for kind in CodecKind::ALL {
        let name = names.get(kind);
        let _ = write!(
            out,
            " {:>12} {:>10} {:>8}",
            format!("{name} bytes"),
            format!("{name} dB"),
            format!("{name} ssim")
        );
    }
    out.push('\n');
    for row in rows {
        let _ = write!(out, "{:>7}", row.quality.get());
        for kind in CodecKind::ALL {
            let reading = row.readings.get(kind);
            let _ = write!(
                out,
                " {:>12} {:>10.2} {:>8.4}",
                reading.size_bytes, reading.psnr_db, reading.ssim
            );
        }
        out.push('\n');
    }
    out
}
