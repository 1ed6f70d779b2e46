//! Actix Web server exposing the live and face MJPEG streams, the metrics
//! series, quality control, stage previews and health.
//!
//! The server runs on a dedicated thread to keep the pipeline hot path free
//! from Actix runtime concerns. Stream handlers only forward JPEG bytes the
//! pipeline already encoded; `/preview` is the one route that encodes, and it
//! does so on the blocking pool.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use actix_web::{
    App, HttpResponse, HttpResponseBuilder, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result, bail};
use async_stream::stream;
use codecs::{Quality, QualityError};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use video_ingest::CaptureError;

use crate::lab::{
    context::LabContext,
    data::MetricsResponse,
    preview::{PreviewStage, render_preview},
    telemetry,
    watchdog::WatchdogState,
};

const LIVE_POLL_INTERVAL: Duration = Duration::from_millis(33);
const FACE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared state backing HTTP handlers.
pub(crate) struct ServerState {
    pub(crate) ctx: LabContext,
    pub(crate) watchdog: Arc<WatchdogState>,
}

/// Handle for the server thread.
pub(crate) struct PreviewServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
    addr: SocketAddr,
}

impl PreviewServer {
    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|handle| handle.is_finished())
    }

    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Register every route on an app. Shared by the real server and tests.
pub(crate) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/live-stream", web::get().to(live_stream_handler))
        .route("/face-stream", web::get().to(face_stream_handler))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/quality", web::post().to(set_quality_handler))
        .route("/preview", web::get().to(preview_handler))
        .route("/healthz", web::get().to(healthz_handler))
        .route("/prometheus", web::get().to(prometheus_handler))
        // Paths used by earlier dashboards.
        .route("/video_feed", web::get().to(live_stream_handler))
        .route("/face_feed", web::get().to(face_stream_handler))
        .route("/set_quality", web::post().to(set_quality_handler))
        .route("/step_image", web::get().to(preview_handler));
}

/// Bind `bind`, start serving on a dedicated thread and return once the
/// socket is listening.
pub(crate) fn spawn_preview_server(
    ctx: LabContext,
    watchdog: Arc<WatchdogState>,
    bind: SocketAddr,
) -> Result<PreviewServer> {
    let state = web::Data::new(ServerState { ctx, watchdog });
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (ready_tx, ready_rx) =
        crossbeam_channel::bounded::<std::result::Result<SocketAddr, String>>(1);

    let handle = telemetry::spawn_thread("lab-http-server", move || {
        let result = actix_web::rt::System::new().block_on(async move {
            let app_state = state.clone();
            let server = match HttpServer::new(move || {
                App::new().app_data(app_state.clone()).configure(configure)
            })
            .bind(bind)
            {
                Ok(server) => server,
                Err(err) => {
                    let _ = ready_tx.send(Err(err.to_string()));
                    return Err(err);
                }
            };
            let addr = server.addrs().first().copied().unwrap_or(bind);
            let server = server.run();
            let _ = ready_tx.send(Ok(addr));

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        });
        if let Err(err) = result {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn HTTP server thread")?;

    let addr = match ready_rx.recv() {
        Ok(Ok(addr)) => addr,
        Ok(Err(err)) => {
            let _ = handle.join();
            bail!("Failed to bind {bind}: {err}");
        }
        Err(_) => {
            let _ = handle.join();
            bail!("HTTP server thread exited before binding {bind}");
        }
    };

    Ok(PreviewServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
        addr,
    })
}

fn multipart_part(jpeg: &[u8], sequence: u64, extra_header: Option<String>) -> Bytes {
    let mut payload = Vec::with_capacity(jpeg.len() + 128);
    payload.extend_from_slice(b"--frame\r\n");
    payload.extend_from_slice(format!("X-Sequence: {sequence}\r\n").as_bytes());
    if let Some(extra) = extra_header {
        payload.extend_from_slice(extra.as_bytes());
        payload.extend_from_slice(b"\r\n");
    }
    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}

fn multipart_response() -> HttpResponseBuilder {
    let mut builder = HttpResponse::Ok();
    builder
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .insert_header((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Type"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .content_type("multipart/x-mixed-replace; boundary=frame");
    builder
}

fn error_body(message: impl Into<String>) -> serde_json::Value {
    json!({ "status": "error", "error": message.into() })
}

/// Annotated live frames, one part per pipeline iteration.
async fn live_stream_handler(state: web::Data<ServerState>) -> HttpResponse {
    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(LIVE_POLL_INTERVAL);
        let mut last_sent: Option<u64> = None;
        loop {
            interval.tick().await;
            if let Some(packet) = state.ctx.state.latest_live() {
                if last_sent != Some(packet.frame_number) {
                    last_sent = Some(packet.frame_number);
                    yield Ok::<Bytes, actix_web::Error>(multipart_part(
                        &packet.jpeg,
                        packet.frame_number,
                        Some(format!("X-Timestamp: {}", packet.timestamp_ms)),
                    ));
                }
            }
        }
    };
    multipart_response().streaming(stream)
}

/// Face crops; silent while no face is detected.
async fn face_stream_handler(state: web::Data<ServerState>) -> HttpResponse {
    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(FACE_POLL_INTERVAL);
        let mut last_sent: Option<u64> = None;
        loop {
            interval.tick().await;
            if let Some(crop) = state.ctx.state.latest_face() {
                if last_sent != Some(crop.frame_number) {
                    last_sent = Some(crop.frame_number);
                    let bbox = crop.bbox;
                    yield Ok::<Bytes, actix_web::Error>(multipart_part(
                        &crop.jpeg,
                        crop.frame_number,
                        Some(format!(
                            "X-Face-Box: {},{},{},{}",
                            bbox.x, bbox.y, bbox.width, bbox.height
                        )),
                    ));
                }
            }
        }
    };
    multipart_response().streaming(stream)
}

/// Column-oriented snapshot of the current series.
async fn metrics_handler(state: web::Data<ServerState>) -> HttpResponse {
    let snapshot = state.ctx.state.series().snapshot();
    HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .json(MetricsResponse::from_samples(
            snapshot.quality,
            snapshot.epoch,
            state.ctx.codec_names(),
            &snapshot.samples,
        ))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QualityValue {
    Number(i64),
    Text(String),
}

impl QualityValue {
    fn to_quality(&self) -> Result<Quality, QualityError> {
        match self {
            QualityValue::Number(value) => Quality::new(*value),
            QualityValue::Text(text) => text.parse(),
        }
    }
}

#[derive(Deserialize)]
struct QualityRequest {
    quality: QualityValue,
}

/// Validate the requested quality, then reset the series under it.
async fn set_quality_handler(state: web::Data<ServerState>, body: Bytes) -> HttpResponse {
    let request: QualityRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return HttpResponse::BadRequest().json(error_body(format!(
                "expected {{\"quality\": <1-100>}}: {err}"
            )));
        }
    };
    let quality = match request.quality.to_quality() {
        Ok(quality) => quality,
        Err(err) => return HttpResponse::BadRequest().json(error_body(err.to_string())),
    };

    let epoch = state.ctx.state.reset_and_set_quality(quality);
    metrics::counter!("lab_quality_changes_total").increment(1);
    metrics::gauge!("lab_quality").set(quality.get() as f64);
    info!("Quality set to {quality}; series reset (epoch {epoch})");
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "quality": quality,
        "epoch": epoch,
    }))
}

#[derive(Deserialize)]
struct PreviewQuery {
    step: Option<String>,
}

/// One still JPEG of a processing stage from a freshly captured frame.
async fn preview_handler(
    query: web::Query<PreviewQuery>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    let stage =
        match PreviewStage::resolve(query.step.as_deref(), state.ctx.tuning.lenient_preview) {
            Ok(stage) => stage,
            Err(err) => return HttpResponse::BadRequest().json(error_body(err.to_string())),
        };

    let ctx = state.ctx.clone();
    match web::block(move || render_preview(&ctx, stage)).await {
        Ok(Ok(jpeg)) => HttpResponse::Ok()
            .insert_header((header::CACHE_CONTROL, "no-cache"))
            .content_type("image/jpeg")
            .body(jpeg),
        Ok(Err(err)) if err.downcast_ref::<CaptureError>().is_some() => {
            HttpResponse::ServiceUnavailable().json(error_body(format!("{err:#}")))
        }
        Ok(Err(err)) => {
            warn!("Preview {} failed: {err:#}", stage.name());
            HttpResponse::InternalServerError().json(error_body(format!("{err:#}")))
        }
        Err(err) => HttpResponse::InternalServerError().json(error_body(err.to_string())),
    }
}

async fn healthz_handler(state: web::Data<ServerState>) -> HttpResponse {
    let report = state.watchdog.report();
    if report.stalled.is_some() {
        HttpResponse::ServiceUnavailable().json(report)
    } else {
        HttpResponse::Ok().json(report)
    }
}

async fn prometheus_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}
