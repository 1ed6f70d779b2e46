//! OpenCV-backed camera capture.

use std::{thread, time::Duration};

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use opencv::{
    core::{self, MatTraitConstManual},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::{debug, warn};

use crate::types::{CaptureError, Frame, FrameFormat, FrameSource};

const CAPTURE_TIMEOUT: Duration = Duration::from_millis(500);
const REQUESTED_FPS: f64 = 30.0;
/// Consecutive empty reads before a file or stream counts as finished.
const MAX_EMPTY_READS: u32 = 50;
const BACKENDS: [i32; 2] = [videoio::CAP_V4L, videoio::CAP_ANY];

type Packet = Result<Frame, CaptureError>;

/// Camera source fed by a background reader thread.
///
/// At most two frames are buffered; newer frames are dropped while the
/// consumer is behind, so `capture` always returns something recent.
pub struct CameraSource {
    uri: String,
    rx: Receiver<Packet>,
}

impl CameraSource {
    pub fn open(uri: &str, target_size: (u32, u32)) -> Result<Self, CaptureError> {
        let mut cap = open_video_capture(uri)?;
        request_capture_mode(&mut cap, target_size);

        let (tx, rx) = bounded(2);
        let reader_uri = uri.to_string();
        thread::Builder::new()
            .name("camera-reader".into())
            .spawn(move || {
                if let Err(err) = read_frames(cap, target_size, &tx) {
                    warn!("camera reader for {reader_uri} stopped: {err}");
                    let _ = tx.send(Err(err));
                }
            })
            .map_err(|err| CaptureError::Other(err.into()))?;

        Ok(Self {
            uri: uri.to_string(),
            rx,
        })
    }
}

impl FrameSource for CameraSource {
    fn capture(&mut self) -> Result<Frame, CaptureError> {
        match self.rx.recv_timeout(CAPTURE_TIMEOUT) {
            Ok(packet) => packet,
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::Unavailable),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Closed),
        }
    }

    fn describe(&self) -> String {
        format!("camera {}", self.uri)
    }
}

fn opencv_err(err: opencv::Error) -> CaptureError {
    CaptureError::Other(err.into())
}

fn read_frames(
    mut cap: VideoCapture,
    target_size: (u32, u32),
    tx: &Sender<Packet>,
) -> Result<(), CaptureError> {
    let mut raw = Mat::default();
    let mut resized = Mat::default();
    let mut empty_reads = 0;

    loop {
        let grabbed = cap.read(&mut raw).map_err(opencv_err)?;
        if !grabbed || raw.empty() {
            empty_reads += 1;
            if empty_reads >= MAX_EMPTY_READS {
                return Err(CaptureError::Closed);
            }
            continue;
        }
        empty_reads = 0;

        let packet = to_frame(&raw, &mut resized, target_size)
            .map(|frame| frame.with_timestamp(Utc::now().timestamp_millis()));

        match tx.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("camera consumer behind; dropping frame"),
            Err(TrySendError::Disconnected(_)) => return Ok(()),
        }
    }
}

/// Resize to `target_size` if needed and convert BGR/mono pixels to a `Frame`.
fn to_frame(raw: &Mat, scratch: &mut Mat, target_size: (u32, u32)) -> Result<Frame, CaptureError> {
    let target = core::Size {
        width: target_size.0 as i32,
        height: target_size.1 as i32,
    };
    let working = if raw.size().map_err(opencv_err)? != target {
        imgproc::resize(raw, scratch, target, 0.0, 0.0, imgproc::INTER_AREA)
            .map_err(opencv_err)?;
        &*scratch
    } else {
        raw
    };

    let mut data = working.data_bytes().map_err(opencv_err)?.to_vec();
    let format = match working.channels() {
        1 => FrameFormat::Luma8,
        3 => {
            for px in data.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            FrameFormat::Rgb8
        }
        channels => {
            return Err(CaptureError::Other(anyhow::anyhow!(
                "unsupported {channels}-channel camera frame"
            )));
        }
    };
    Frame::new(data, target_size.0, target_size.1, format).map_err(CaptureError::from)
}

/// Device index for `"0"` or `"/dev/video0"` style URIs.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    let digits = uri.strip_prefix("/dev/video").unwrap_or(uri);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Try each backend in turn, by device index when the URI names one and as a
/// file or stream URI otherwise.
fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    let index = parse_device_index(uri);
    for backend in BACKENDS {
        let attempt = match index {
            Some(index) => VideoCapture::new(index, backend),
            None => VideoCapture::from_file(uri, backend),
        };
        match attempt {
            Ok(cap) if cap.is_opened().map_err(opencv_err)? => return Ok(cap),
            Ok(_) => debug!("backend {backend} could not open {uri}"),
            Err(err) => warn!("failed to open {uri} with backend {backend}: {err}"),
        }
    }
    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Ask for MJPG at the target size and frame rate; drivers may ignore any of it.
fn request_capture_mode(cap: &mut VideoCapture, target_size: (u32, u32)) {
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        let _ = cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64);
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, REQUESTED_FPS);
}
