use anyhow::Error;
use image::{
    GrayImage, ImageBuffer, Luma, Rgb, RgbImage,
    buffer::ConvertBuffer,
    imageops::{self, FilterType},
};
use thiserror::Error;

/// Pixel layout of a [`Frame`]. Both layouts use 8 bits per sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Rgb8,
    Luma8,
}

impl FrameFormat {
    pub fn channels(self) -> usize {
        match self {
            FrameFormat::Rgb8 => 3,
            FrameFormat::Luma8 => 1,
        }
    }
}

/// Immutable pixel grid captured from a video source.
///
/// Every operation that changes pixels returns a new frame, so a frame handed to
/// another stage can be retained without observing later writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    timestamp_ms: i64,
    format: FrameFormat,
}

/// Borrowed `image` view over a frame buffer.
enum PixelView<'a> {
    Rgb(ImageBuffer<Rgb<u8>, &'a [u8]>),
    Luma(ImageBuffer<Luma<u8>, &'a [u8]>),
    Invalid,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame dimensions must be non-zero (got {width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("unexpected frame buffer size: got {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("region {x},{y} {width}x{height} lies outside a {frame_width}x{frame_height} frame")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    },
    #[error("frames differ in height ({left} vs {right})")]
    HeightMismatch { left: u32, right: u32 },
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("video source {uri:?} is not supported by this build")]
    Unsupported { uri: String },
    #[error("no frame available from the video source")]
    Unavailable,
    #[error("video source closed")]
    Closed,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Other(#[from] Error),
}

impl CaptureError {
    /// Whether the next capture attempt may succeed without reopening the source.
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::Unavailable | CaptureError::Frame(_))
    }
}

/// A camera-like device that yields frames on demand.
pub trait FrameSource: Send {
    fn capture(&mut self) -> Result<Frame, CaptureError>;

    /// Human readable description used in logs.
    fn describe(&self) -> String;
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty { width, height });
        }
        let expected = width as usize * height as usize * format.channels();
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp_ms: 0,
            format,
        })
    }

    /// Build an RGB frame by evaluating `pixel` for every coordinate.
    pub fn from_rgb_fn(
        width: u32,
        height: u32,
        mut pixel: impl FnMut(u32, u32) -> [u8; 3],
    ) -> Result<Self, FrameError> {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&pixel(x, y));
            }
        }
        Self::new(data, width, height, FrameFormat::Rgb8)
    }

    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Sample values of the pixel at `(x, y)`; one entry for luma, three for RGB.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let channels = self.format.channels();
        let offset = (y as usize * self.width as usize + x as usize) * channels;
        &self.data[offset..offset + channels]
    }

    /// Convert to single-channel luminance using BT.601 weights.
    ///
    /// Fixed-point weights match the common `RGB2GRAY` conversion so metrics
    /// computed here line up with other tooling.
    pub fn to_luma(&self) -> Frame {
        match self.format {
            FrameFormat::Luma8 => self.clone(),
            FrameFormat::Rgb8 => {
                let data = self
                    .data
                    .chunks_exact(3)
                    .map(|px| {
                        let r = px[0] as u32;
                        let g = px[1] as u32;
                        let b = px[2] as u32;
                        ((r * 4899 + g * 9617 + b * 1868 + 8192) >> 14) as u8
                    })
                    .collect();
                Frame {
                    data,
                    width: self.width,
                    height: self.height,
                    timestamp_ms: self.timestamp_ms,
                    format: FrameFormat::Luma8,
                }
            }
        }
    }

    /// Expand to three channels, replicating luma when needed.
    pub fn to_rgb(&self) -> Frame {
        match self.format {
            FrameFormat::Rgb8 => self.clone(),
            FrameFormat::Luma8 => {
                let mut data = Vec::with_capacity(self.data.len() * 3);
                for &value in &self.data {
                    data.extend_from_slice(&[value, value, value]);
                }
                Frame {
                    data,
                    width: self.width,
                    height: self.height,
                    timestamp_ms: self.timestamp_ms,
                    format: FrameFormat::Rgb8,
                }
            }
        }
    }

    /// Borrow the pixel buffer as an `image` view in the frame's own layout.
    fn view(&self) -> PixelView<'_> {
        let data = self.data.as_slice();
        let view = match self.format {
            FrameFormat::Rgb8 => {
                ImageBuffer::from_raw(self.width, self.height, data).map(PixelView::Rgb)
            }
            FrameFormat::Luma8 => {
                ImageBuffer::from_raw(self.width, self.height, data).map(PixelView::Luma)
            }
        };
        // `Frame::new` validated the buffer length against the dimensions.
        view.unwrap_or(PixelView::Invalid)
    }

    /// Carry this frame's timestamp over to a derived frame.
    fn stamped(&self, output: Result<Frame, FrameError>) -> Result<Frame, FrameError> {
        output.map(|frame| frame.with_timestamp(self.timestamp_ms))
    }

    /// Shrink by an integer factor with a triangle (bilinear) filter.
    ///
    /// Output dimensions use floor division and never drop below one pixel.
    pub fn downscale(&self, factor: u32) -> Frame {
        if factor <= 1 {
            return self.clone();
        }
        let out_w = (self.width / factor).max(1);
        let out_h = (self.height / factor).max(1);
        let resized = match self.view() {
            PixelView::Rgb(image) => {
                Frame::from_rgb_image(imageops::resize(&image, out_w, out_h, FilterType::Triangle))
            }
            PixelView::Luma(image) => {
                Frame::from_gray_image(imageops::resize(&image, out_w, out_h, FilterType::Triangle))
            }
            PixelView::Invalid => return self.clone(),
        };
        self.stamped(resized).unwrap_or_else(|_| self.clone())
    }

    /// Copy a rectangular region into a standalone frame.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Result<Frame, FrameError> {
        let fits_x = x.checked_add(width).is_some_and(|right| right <= self.width);
        let fits_y = y.checked_add(height).is_some_and(|bottom| bottom <= self.height);
        let out_of_bounds = FrameError::OutOfBounds {
            x,
            y,
            width,
            height,
            frame_width: self.width,
            frame_height: self.height,
        };
        if width == 0 || height == 0 || !fits_x || !fits_y {
            return Err(out_of_bounds);
        }
        let cropped = match self.view() {
            PixelView::Rgb(image) => {
                Frame::from_rgb_image(imageops::crop_imm(&ConvertBuffer::<RgbImage>::convert(&image), x, y, width, height).to_image())
            }
            PixelView::Luma(image) => {
                Frame::from_gray_image(imageops::crop_imm(&ConvertBuffer::<GrayImage>::convert(&image), x, y, width, height).to_image())
            }
            PixelView::Invalid => Err(out_of_bounds),
        };
        self.stamped(cropped)
    }

    /// Place `right` next to `self`. Mixed layouts are promoted to RGB.
    pub fn hstack(&self, right: &Frame) -> Result<Frame, FrameError> {
        if self.height != right.height {
            return Err(FrameError::HeightMismatch {
                left: self.height,
                right: right.height,
            });
        }
        let (left, right) = if self.format == right.format {
            (self.clone(), right.clone())
        } else {
            (self.to_rgb(), right.to_rgb())
        };
        let (width, height) = (left.width + right.width, left.height);
        let offset = i64::from(left.width);
        let joined = match (left.view(), right.view()) {
            (PixelView::Rgb(l), PixelView::Rgb(r)) => {
                let mut canvas = RgbImage::new(width, height);
                imageops::replace(&mut canvas, &l, 0, 0);
                imageops::replace(&mut canvas, &r, offset, 0);
                Frame::from_rgb_image(canvas)
            }
            (PixelView::Luma(l), PixelView::Luma(r)) => {
                let mut canvas = GrayImage::new(width, height);
                imageops::replace(&mut canvas, &l, 0, 0);
                imageops::replace(&mut canvas, &r, offset, 0);
                Frame::from_gray_image(canvas)
            }
            _ => Err(FrameError::BufferSize {
                expected: width as usize * height as usize * left.format.channels(),
                actual: left.data.len() + right.data.len(),
            }),
        };
        self.stamped(joined)
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        let rgb = self.to_rgb();
        RgbImage::from_raw(rgb.width, rgb.height, rgb.data)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    pub fn from_rgb_image(image: RgbImage) -> Result<Frame, FrameError> {
        let (width, height) = image.dimensions();
        Frame::new(image.into_raw(), width, height, FrameFormat::Rgb8)
    }

    pub fn from_gray_image(image: GrayImage) -> Result<Frame, FrameError> {
        let (width, height) = image.dimensions();
        Frame::new(image.into_raw(), width, height, FrameFormat::Luma8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        Frame::from_rgb_fn(width, height, |x, y| [x as u8, y as u8, (x + y) as u8]).unwrap()
    }

    #[test]
    fn rejects_mismatched_buffer() {
        let err = Frame::new(vec![0; 10], 2, 2, FrameFormat::Rgb8).unwrap_err();
        assert!(matches!(
            err,
            FrameError::BufferSize {
                expected: 12,
                actual: 10
            }
        ));
        assert!(matches!(
            Frame::new(Vec::new(), 0, 4, FrameFormat::Luma8),
            Err(FrameError::Empty { .. })
        ));
    }

    #[test]
    fn luma_uses_bt601_weights() {
        let frame = Frame::new(vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255], 4, 1, FrameFormat::Rgb8)
            .unwrap();
        let luma = frame.to_luma();
        assert_eq!(luma.format(), FrameFormat::Luma8);
        assert_eq!(luma.data(), &[76, 150, 29, 255]);
        assert_eq!(luma.to_rgb().pixel(3, 0), &[255, 255, 255]);
    }

    #[test]
    fn downscale_filters_to_floor_dimensions() {
        let flat = Frame::new(vec![90; 8 * 4], 8, 4, FrameFormat::Luma8)
            .unwrap()
            .with_timestamp(42);
        let small = flat.downscale(2);
        assert_eq!((small.width(), small.height()), (4, 2));
        assert_eq!(small.format(), FrameFormat::Luma8);
        assert!(small.data().iter().all(|&v| v == 90));
        assert_eq!(small.timestamp_ms(), 42);

        let odd = gradient(9, 7).downscale(4);
        assert_eq!((odd.width(), odd.height()), (2, 1));
        assert_eq!(odd.format(), FrameFormat::Rgb8);
        assert_eq!(gradient(3, 3).downscale(4).width(), 1);
        assert_eq!(gradient(6, 6).downscale(1), gradient(6, 6));
    }

    #[test]
    fn crop_copies_region() {
        let frame = gradient(8, 6);
        let crop = frame.crop(2, 1, 3, 4).unwrap();
        assert_eq!((crop.width(), crop.height()), (3, 4));
        assert_eq!(crop.pixel(0, 0), frame.pixel(2, 1));
        assert_eq!(crop.pixel(2, 3), frame.pixel(4, 4));
        assert!(frame.crop(6, 0, 3, 1).is_err());
        assert!(frame.crop(0, 0, 0, 1).is_err());
        assert!(frame.crop(u32::MAX, 0, 2, 1).is_err());
    }

    #[test]
    fn hstack_joins_rows() {
        let left = gradient(3, 2);
        let right = gradient(2, 2).to_luma();
        let joined = left.hstack(&right).unwrap();
        assert_eq!((joined.width(), joined.height()), (5, 2));
        assert_eq!(joined.format(), FrameFormat::Rgb8);
        assert_eq!(joined.pixel(0, 1), left.pixel(0, 1));
        let gray = right.pixel(1, 1)[0];
        assert_eq!(joined.pixel(4, 1), &[gray, gray, gray]);
        assert!(left.hstack(&gradient(2, 3)).is_err());
    }

    #[test]
    fn image_conversion_round_trips() {
        let frame = gradient(5, 4);
        let image = frame.to_rgb_image();
        assert_eq!(image.dimensions(), (5, 4));
        assert_eq!(Frame::from_rgb_image(image).unwrap(), frame);
    }
}
