//! Configuration parsing for the face lab.
//!
//! Translates CLI arguments into `LabConfig` / `SweepConfig` once so the
//! pipeline and server never re-validate flags.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::Args;
use codecs::Quality;
use quality_metrics::SSIM_WINDOW;

/// Smallest capture side that still leaves room for one SSIM window after
/// chroma subsampling and detector downscaling.
const MIN_CAPTURE_SIDE: u32 = 16;
const MAX_DETECT_SCALE: u32 = 16;

#[derive(Clone, Debug)]
/// Settings for the live pipeline and its HTTP surface.
pub struct LabConfig {
    /// `synthetic`, a camera index, a device path or a stream URI.
    pub source: String,
    pub width: u32,
    pub height: u32,
    /// Quality in force until the first `POST /quality`.
    pub initial_quality: Quality,
    /// Downscale factor applied before face detection.
    pub detect_scale: u32,
    /// Pause between pipeline iterations.
    pub interval: Duration,
    /// Retained samples; `None` keeps the whole session.
    pub max_samples: Option<usize>,
    /// JPEG quality of the annotated live stream and face crops.
    pub stream_quality: Quality,
    pub bind: SocketAddr,
    /// Unknown preview stages fall back to the raw frame instead of 400.
    pub lenient_preview: bool,
    pub verbose: bool,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug, Default)]
/// Optional tracing outputs.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Lower the default log filter to `debug`.
    pub verbose: bool,
}

/// CLI arguments accepted by the `serve` subcommand.
#[derive(Debug, Args)]
pub struct LabCliArgs {
    /// Frame source: `synthetic`, a camera index, `/dev/videoN` or a stream URI.
    #[arg(long = "source", value_name = "URI", default_value = "synthetic")]
    pub source: String,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    pub width: u32,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 480)]
    pub height: u32,
    /// Initial compression quality for both codecs (1-100).
    #[arg(long = "quality", value_name = "QUALITY", default_value_t = 50)]
    pub quality: i64,
    /// Downscale factor for face detection.
    #[arg(long = "detect-scale", value_name = "N", default_value_t = 4)]
    pub detect_scale: u32,
    /// Milliseconds to sleep between pipeline iterations.
    #[arg(long = "interval-ms", value_name = "MS", default_value_t = 100)]
    pub interval_ms: u64,
    /// Samples kept in the series; 0 keeps everything.
    #[arg(long = "max-samples", value_name = "N", default_value_t = 6_000)]
    pub max_samples: usize,
    /// JPEG quality of the live and face streams (1-100).
    #[arg(long = "stream-quality", value_name = "QUALITY", default_value_t = 90)]
    pub stream_quality: i64,
    /// Address the HTTP server binds to.
    #[arg(long = "bind", value_name = "ADDR", default_value = "0.0.0.0")]
    pub bind: IpAddr,
    /// Port the HTTP server listens on.
    #[arg(long = "port", value_name = "PORT", default_value_t = 5000)]
    pub port: u16,
    /// Serve the raw frame for unknown preview stages instead of rejecting them.
    #[arg(long = "lenient-preview", action = clap::ArgAction::SetTrue)]
    pub lenient_preview: bool,
    /// Enable verbose logging (per-frame measurements, dropped samples).
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<LabCliArgs> for LabConfig {
    type Error = anyhow::Error;

    fn try_from(args: LabCliArgs) -> Result<Self> {
        validate_capture_size(args.width, args.height)?;
        validate_source(&args.source)?;

        if !(1..=MAX_DETECT_SCALE).contains(&args.detect_scale) {
            bail!("--detect-scale must be between 1 and {MAX_DETECT_SCALE}");
        }
        if args.interval_ms == 0 {
            bail!("--interval-ms must be at least 1");
        }

        let initial_quality = Quality::new(args.quality).context("--quality")?;
        let stream_quality = Quality::new(args.stream_quality).context("--stream-quality")?;

        Ok(Self {
            source: args.source,
            width: args.width,
            height: args.height,
            initial_quality,
            detect_scale: args.detect_scale,
            interval: Duration::from_millis(args.interval_ms),
            max_samples: (args.max_samples > 0).then_some(args.max_samples),
            stream_quality,
            bind: SocketAddr::new(args.bind, args.port),
            lenient_preview: args.lenient_preview,
            verbose: args.verbose,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
                verbose: args.verbose,
            },
        })
    }
}

#[derive(Clone, Debug)]
/// Settings for a one-shot quality sweep over a single captured frame.
pub struct SweepConfig {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub qualities: Vec<Quality>,
}

/// CLI arguments accepted by the `sweep` subcommand.
#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Frame source: `synthetic`, a camera index, `/dev/videoN` or a stream URI.
    #[arg(long = "source", value_name = "URI", default_value = "synthetic")]
    pub source: String,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    pub width: u32,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 480)]
    pub height: u32,
    /// Comma separated qualities to measure.
    #[arg(
        long = "qualities",
        value_name = "LIST",
        value_delimiter = ',',
        default_value = "10,30,50,70,90,100"
    )]
    pub qualities: Vec<i64>,
}

impl TryFrom<SweepArgs> for SweepConfig {
    type Error = anyhow::Error;

    fn try_from(args: SweepArgs) -> Result<Self> {
        validate_capture_size(args.width, args.height)?;
        validate_source(&args.source)?;
        if args.qualities.is_empty() {
            bail!("--qualities needs at least one value");
        }
        let mut qualities = args
            .qualities
            .into_iter()
            .map(|q| Quality::new(q).context("--qualities"))
            .collect::<Result<Vec<_>>>()?;
        qualities.sort();
        qualities.dedup();

        Ok(Self {
            source: args.source,
            width: args.width,
            height: args.height,
            qualities,
        })
    }
}

fn validate_capture_size(width: u32, height: u32) -> Result<()> {
    if width < MIN_CAPTURE_SIDE || height < MIN_CAPTURE_SIDE {
        bail!(
            "Capture size {width}x{height} is too small; both sides must be at least {MIN_CAPTURE_SIDE}px \
             (SSIM uses a {SSIM_WINDOW}x{SSIM_WINDOW} window)"
        );
    }
    Ok(())
}

fn validate_source(source: &str) -> Result<()> {
    if source.trim().is_empty() {
        bail!("--source must not be empty");
    }
    Ok(())
}
