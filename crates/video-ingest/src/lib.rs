//! Frame types and video sources feeding the face-lab pipeline.

#[cfg(feature = "opencv-camera")]
mod camera;
mod synthetic;
mod types;

#[cfg(feature = "opencv-camera")]
pub use camera::CameraSource;
pub use synthetic::SyntheticSource;
pub use types::{CaptureError, Frame, FrameError, FrameFormat, FrameSource};

/// URI selecting the built-in test pattern.
pub const SYNTHETIC_URI: &str = "synthetic";

/// Open the frame source named by `uri`.
///
/// `"synthetic"` always works; anything else is treated as a camera index,
/// device path, or stream URI and requires the `opencv-camera` feature.
pub fn open_source(
    uri: &str,
    target_size: (u32, u32),
) -> Result<Box<dyn FrameSource>, CaptureError> {
    if uri.eq_ignore_ascii_case(SYNTHETIC_URI) {
        return Ok(Box::new(SyntheticSource::new(target_size.0, target_size.1)));
    }
    open_camera(uri, target_size)
}

#[cfg(feature = "opencv-camera")]
fn open_camera(uri: &str, target_size: (u32, u32)) -> Result<Box<dyn FrameSource>, CaptureError> {
    Ok(Box::new(CameraSource::open(uri, target_size)?))
}

#[cfg(not(feature = "opencv-camera"))]
fn open_camera(uri: &str, _target_size: (u32, u32)) -> Result<Box<dyn FrameSource>, CaptureError> {
    Err(CaptureError::Unsupported {
        uri: uri.to_string(),
    })
}
