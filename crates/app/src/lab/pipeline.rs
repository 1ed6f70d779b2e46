//! Pipeline supervisor tying together capture, detection, measurement, the
//! watchdog and the HTTP server.
//!
//! One worker thread runs the capture → detect → measure → publish loop. The
//! supervisor (the calling thread) respawns the worker if it ever exits before
//! shutdown.

use std::{
    any::Any,
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use codecs::{PerCodec, Quality};
use face_detect::BoundingBox;
use tracing::{debug, error, info, warn};
use video_ingest::{CaptureError, Frame};

use crate::lab::{
    LabConfig,
    annotation::{self, HudInfo},
    context::LabContext,
    data::{CodecReading, FramePacket},
    encoding::{encode_stream_jpeg, measure_codecs},
    processing::{crop_face, detect_face},
    series::AppendOutcome,
    server::spawn_preview_server,
    telemetry,
    watchdog::{HealthComponent, PipelineHealth, WatchdogState, spawn_watchdog},
};

const SUPERVISOR_POLL: Duration = Duration::from_millis(250);
const RESPAWN_BACKOFF: Duration = Duration::from_secs(1);
const REOPEN_BACKOFF: Duration = Duration::from_secs(1);

/// Run the face lab until Ctrl+C.
pub fn run(config: LabConfig) -> Result<()> {
    static CTRL_HANDLER: Once = Once::new();

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let _telemetry_guard = telemetry::install(&config.telemetry);
    let _ = telemetry::init_metrics_recorder();

    let ctx = LabContext::new(&config);
    let source_spec = SourceSpec::from(&config);
    let source = video_ingest::open_source(&source_spec.uri, source_spec.size)
        .with_context(|| format!("Failed to open video source {:?}", source_spec.uri))?;
    info!("Capturing from {}", source.describe());
    ctx.state.attach_source(source);

    let health = Arc::new(PipelineHealth::new(config.interval));
    let watchdog_state = Arc::new(WatchdogState::new());
    let watchdog_handle = spawn_watchdog(health.clone(), shutdown.clone(), watchdog_state.clone())
        .context("Failed to spawn watchdog thread")?;

    let preview_server = spawn_preview_server(ctx.clone(), watchdog_state.clone(), config.bind)
        .context("Failed to start HTTP server")?;
    info!(
        "Live stream at http://{}/live-stream (also /face-stream, /metrics, /preview?step=raw)",
        preview_server.addr()
    );
    if config.verbose {
        info!("Running face lab, press Ctrl+C to stop");
    }

    let spawn_worker = || {
        spawn_pipeline_worker(
            ctx.clone(),
            health.clone(),
            source_spec.clone(),
            shutdown.clone(),
        )
    };
    let mut worker = Some(spawn_worker().context("Failed to spawn pipeline worker")?);

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(SUPERVISOR_POLL);
        if preview_server.is_finished() {
            error!("HTTP server stopped unexpectedly; shutting down");
            shutdown.store(true, Ordering::SeqCst);
            break;
        }
        let needs_worker = worker.as_ref().is_none_or(|handle| handle.is_finished());
        if !needs_worker || shutdown.load(Ordering::SeqCst) {
            continue;
        }

        if let Some(handle) = worker.take() {
            if let Err(payload) = handle.join() {
                error!("Pipeline worker panicked: {}", panic_message(payload.as_ref()));
            }
        }
        let restarts = watchdog_state.record_restart();
        metrics::counter!("lab_worker_restarts_total").increment(1);
        warn!("Pipeline worker exited unexpectedly; respawning (restart #{restarts})");
        thread::sleep(RESPAWN_BACKOFF);
        match spawn_worker() {
            Ok(handle) => worker = Some(handle),
            Err(err) => error!("Failed to respawn pipeline worker: {err}"),
        }
    }

    info!("Stopping face lab");
    if let Some(handle) = worker.take() {
        let _ = handle.join();
    }
    let _ = watchdog_handle.join();
    preview_server.stop();
    drop(ctx.state.detach_source());
    Ok(())
}

/// What to reopen when the capture device goes away.
#[derive(Clone, Debug)]
struct SourceSpec {
    uri: String,
    size: (u32, u32),
}

impl From<&LabConfig> for SourceSpec {
    fn from(config: &LabConfig) -> Self {
        Self {
            uri: config.source.clone(),
            size: (config.width, config.height),
        }
    }
}

fn spawn_pipeline_worker(
    ctx: LabContext,
    health: Arc<PipelineHealth>,
    source_spec: SourceSpec,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("lab-pipeline", move || {
        let _pipeline_span = tracing::info_span!(
            "lab.pipeline",
            source = %source_spec.uri,
            width = source_spec.size.0,
            height = source_spec.size.1,
            detect_scale = ctx.tuning.detect_scale,
            interval_ms = ctx.tuning.interval.as_millis() as u64
        )
        .entered();

        let mut frame_number: u64 = 0;
        let mut smoothed_fps: f32 = 0.0;
        let mut last_instant = Instant::now();
        let mut last_reopen: Option<Instant> = None;

        while !shutdown.load(Ordering::Relaxed) {
            frame_number = frame_number.wrapping_add(1);
            match run_iteration(&ctx, &health, frame_number) {
                Ok(report) => {
                    let now = Instant::now();
                    let elapsed = now.duration_since(last_instant).as_secs_f32();
                    last_instant = now;
                    if elapsed > 0.0 {
                        let instant = 1.0 / elapsed;
                        smoothed_fps = if smoothed_fps == 0.0 {
                            instant
                        } else {
                            0.9 * smoothed_fps + 0.1 * instant
                        };
                    }
                    metrics::gauge!("lab_pipeline_fps").set(smoothed_fps as f64);

                    if ctx.tuning.verbose {
                        debug!(
                            "Frame #{frame_number} at q{}: face={:?} sample={:?}",
                            report.quality, report.face, report.appended
                        );
                    } else if frame_number % 50 == 0 {
                        debug!(
                            "Pipeline heartbeat: frame #{frame_number}, {smoothed_fps:.1} fps, {} samples",
                            ctx.state.series().len()
                        );
                    }
                }
                Err(err) if err.is_transient() => {
                    debug!("Capture skipped on frame #{frame_number}: {err}");
                }
                Err(err) => {
                    warn!("Capture error on frame #{frame_number}: {err}");
                    let due = last_reopen.is_none_or(|at| at.elapsed() >= REOPEN_BACKOFF);
                    if due {
                        last_reopen = Some(Instant::now());
                        reopen_source(&ctx, &source_spec);
                    }
                }
            }
            thread::sleep(ctx.tuning.interval);
        }
        debug!("Pipeline worker stopping after {frame_number} iterations");
    })
}

fn reopen_source(ctx: &LabContext, spec: &SourceSpec) {
    drop(ctx.state.detach_source());
    match video_ingest::open_source(&spec.uri, spec.size) {
        Ok(source) => {
            info!("Reopened {}", source.describe());
            metrics::counter!("lab_source_reopens_total").increment(1);
            ctx.state.attach_source(source);
        }
        Err(err) => warn!("Failed to reopen video source {:?}: {err}", spec.uri),
    }
}

/// What one pass through the loop produced.
#[derive(Debug)]
pub(crate) struct IterationReport {
    pub(crate) face: Option<BoundingBox>,
    pub(crate) quality: Quality,
    /// `None` when a codec or metric failed and no sample was attempted.
    pub(crate) appended: Option<AppendOutcome>,
}

/// Capture one frame, detect, measure both codecs, append, publish.
///
/// Only a capture failure is returned; it leaves every piece of shared state
/// untouched. Later stages log and degrade instead.
pub(crate) fn run_iteration(
    ctx: &LabContext,
    health: &PipelineHealth,
    frame_number: u64,
) -> Result<IterationReport, CaptureError> {
    let _frame_span = tracing::info_span!("frame", frame = frame_number).entered();

    let capture_started = Instant::now();
    let frame = tracing::info_span!("capture")
        .in_scope(|| ctx.state.capture())
        .inspect_err(|err| {
            let kind = if err.is_transient() { "transient" } else { "fatal" };
            metrics::counter!("lab_capture_failures_total", "kind" => kind).increment(1);
        })?;
    health.beat(HealthComponent::Capture);
    metrics::histogram!("lab_stage_latency_seconds", "stage" => "capture")
        .record(capture_started.elapsed().as_secs_f64());

    // Quality is read once per iteration; every reading below is tagged with it.
    let ticket = ctx.state.series().ticket();

    let face = detect_face(ctx, &frame, frame_number);
    ctx.state.publish_face(
        face.and_then(|bbox| crop_face(&frame, bbox, ctx.tuning.stream_quality, frame_number)),
    );
    health.beat(HealthComponent::Detector);

    let measure_started = Instant::now();
    let readings = match measure_codecs(&ctx.codecs, &frame, ticket.quality, frame_number) {
        Ok(measured) => {
            health.beat(HealthComponent::Encoder);
            Some(measured.map(|_, m| m.reading))
        }
        Err(err) => {
            metrics::counter!("lab_measure_failures_total").increment(1);
            warn!("Dropping sample for frame #{frame_number}: {err:#}");
            None
        }
    };
    metrics::histogram!("lab_stage_latency_seconds", "stage" => "measure")
        .record(measure_started.elapsed().as_secs_f64());

    let appended = readings.map(|readings| ctx.state.series().append(ticket, readings));
    match appended {
        Some(AppendOutcome::Appended { len, .. }) => {
            metrics::counter!("lab_samples_total").increment(1);
            metrics::gauge!("lab_series_len").set(len as f64);
        }
        Some(AppendOutcome::StaleEpoch) => {
            metrics::counter!("lab_samples_dropped_total", "reason" => "stale_epoch").increment(1);
            debug!("Frame #{frame_number} measured at q{} before a quality change; dropped", ticket.quality);
        }
        Some(AppendOutcome::NotMonotonic { timestamp_s }) => {
            metrics::counter!("lab_samples_dropped_total", "reason" => "not_monotonic")
                .increment(1);
            debug!("Frame #{frame_number} shares timestamp {timestamp_s:.1}s with the previous sample; dropped");
        }
        None => {}
    }

    publish_live(ctx, &frame, face, frame_number, ticket.quality, readings.as_ref());

    Ok(IterationReport {
        face,
        quality: ticket.quality,
        appended,
    })
}

fn publish_live(
    ctx: &LabContext,
    frame: &Frame,
    face: Option<BoundingBox>,
    frame_number: u64,
    quality: Quality,
    readings: Option<&PerCodec<CodecReading>>,
) {
    let hud = HudInfo {
        frame_number,
        quality: quality.get(),
        codec_names: ctx.codec_names(),
        readings,
    };
    let encoded = annotation::annotate_live(frame, face, &hud)
        .map_err(anyhow::Error::from)
        .and_then(|annotated| encode_stream_jpeg(&annotated, ctx.tuning.stream_quality));
    match encoded {
        Ok(jpeg) => ctx.state.publish_live(FramePacket {
            jpeg,
            frame_number,
            timestamp_ms: frame.timestamp_ms(),
            face,
        }),
        Err(err) => warn!("Live frame #{frame_number} not published: {err:#}"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::context::testing::synthetic_context;

    fn health() -> PipelineHealth {
        PipelineHealth::new(Duration::from_millis(120))
    }

    /// Iterate until the series holds `target` samples or the budget runs out.
    fn drive_until(ctx: &LabContext, health: &PipelineHealth, target: usize, next_frame: &mut u64) {
        for _ in 0..40 {
            if ctx.state.series().len() >= target {
                return;
            }
            *next_frame += 1;
            run_iteration(ctx, health, *next_frame).unwrap();
            thread::sleep(ctx.tuning.interval);
        }
    }

    #[test]
    fn reset_restarts_series_at_new_quality() {
        let ctx = synthetic_context(64, 48);
        let health = health();
        let mut frame_number = 0;

        drive_until(&ctx, &health, 5, &mut frame_number);
        let before = ctx.state.series().snapshot();
        assert_eq!(before.samples.len(), 5);
        assert!(before.samples.iter().all(|s| s.quality.get() == 50));

        ctx.state.reset_and_set_quality(Quality::new(90).unwrap());
        assert_eq!(ctx.state.series().len(), 0);

        drive_until(&ctx, &health, 3, &mut frame_number);
        let after = ctx.state.series().snapshot();
        assert_eq!(after.samples.len(), 3);
        assert!(after.samples.iter().all(|s| s.quality.get() == 90));
        assert!(after.samples[0].timestamp_s < 1.0, "{}", after.samples[0].timestamp_s);
        assert!(
            after
                .samples
                .windows(2)
                .all(|w| w[0].timestamp_s < w[1].timestamp_s)
        );
        assert_eq!(after.epoch, before.epoch + 1);
    }

    #[test]
    fn iteration_publishes_live_frame_and_face() {
        let ctx = synthetic_context(160, 120);
        let report = run_iteration(&ctx, &health(), 1).unwrap();
        assert!(matches!(report.appended, Some(AppendOutcome::Appended { len: 1, .. })));

        let live = ctx.state.latest_live().unwrap();
        assert_eq!(live.frame_number, 1);
        assert_eq!(&live.jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(live.face, report.face);
        assert_eq!(ctx.state.latest_face().is_some(), report.face.is_some());
    }

    #[test]
    fn capture_failure_leaves_state_untouched() {
        let ctx = synthetic_context(64, 48);
        let health = health();
        run_iteration(&ctx, &health, 1).unwrap();
        let live_before = ctx.state.latest_live().unwrap().frame_number;

        let source = ctx.state.detach_source();
        let err = run_iteration(&ctx, &health, 2).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(ctx.state.series().len(), 1);
        assert_eq!(ctx.state.latest_live().unwrap().frame_number, live_before);

        ctx.state.attach_source(source.unwrap());
        assert!(run_iteration(&ctx, &health, 3).is_ok());
    }

    struct MonoSource(video_ingest::SyntheticSource);

    impl video_ingest::FrameSource for MonoSource {
        fn capture(&mut self) -> Result<Frame, CaptureError> {
            self.0.capture().map(|frame| frame.to_luma())
        }

        fn describe(&self) -> String {
            format!("mono {}", self.0.describe())
        }
    }

    #[test]
    fn mono_source_measures_without_a_face() {
        let ctx = synthetic_context(160, 120);
        drop(ctx.state.detach_source());
        ctx.state.attach_source(Box::new(MonoSource(video_ingest::SyntheticSource::new(
            160, 120,
        ))));

        let report = run_iteration(&ctx, &health(), 1).unwrap();
        assert_eq!(report.face, None);
        assert!(matches!(report.appended, Some(AppendOutcome::Appended { len: 1, .. })));
        assert!(ctx.state.latest_face().is_none());
        assert_eq!(ctx.state.latest_live().unwrap().frame_number, 1);
    }

    #[test]
    fn worker_runs_until_shutdown_with_consistent_snapshots() {
        let ctx = synthetic_context(64, 48);
        let shutdown = Arc::new(AtomicBool::new(false));
        let spec = SourceSpec {
            uri: video_ingest::SYNTHETIC_URI.to_string(),
            size: (64, 48),
        };
        let handle = spawn_pipeline_worker(
            ctx.clone(),
            Arc::new(health()),
            spec,
            shutdown.clone(),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while ctx.state.series().len() < 3 && Instant::now() < deadline {
            let snapshot = ctx.state.series().snapshot();
            assert!(
                snapshot
                    .samples
                    .windows(2)
                    .all(|w| w[0].timestamp_s < w[1].timestamp_s)
            );
            thread::sleep(Duration::from_millis(20));
        }
        assert!(ctx.state.series().len() >= 3);

        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn panic_payloads_are_readable() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
