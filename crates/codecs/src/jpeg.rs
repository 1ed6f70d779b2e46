use image::{DynamicImage, ExtendedColorType, ImageFormat, codecs::jpeg::JpegEncoder};
use video_ingest::{Frame, FrameFormat};

use crate::{Codec, CodecError, Quality};

const NAME: &str = "jpeg";

/// Baseline JPEG through the `image` crate encoder and decoder.
#[derive(Clone, Copy, Debug, Default)]
pub struct JpegCodec;

impl Codec for JpegCodec {
    fn name(&self) -> &'static str {
        NAME
    }

    fn encode(&self, frame: &Frame, quality: Quality) -> Result<Vec<u8>, CodecError> {
        let color = match frame.format() {
            FrameFormat::Rgb8 => ExtendedColorType::Rgb8,
            FrameFormat::Luma8 => ExtendedColorType::L8,
        };
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, quality.get())
            .encode(frame.data(), frame.width(), frame.height(), color)
            .map_err(|err| CodecError::Encode {
                codec: NAME,
                reason: err.to_string(),
            })?;
        Ok(buffer)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Frame, CodecError> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg).map_err(|err| {
            CodecError::Decode {
                codec: NAME,
                reason: err.to_string(),
            }
        })?;
        let frame = match image {
            DynamicImage::ImageLuma8(gray) => Frame::from_gray_image(gray)?,
            other => Frame::from_rgb_image(other.to_rgb8())?,
        };
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grayscale_input_decodes_as_luma() {
        let frame = Frame::new(vec![128; 16 * 8], 16, 8, FrameFormat::Luma8).unwrap();
        let bytes = JpegCodec.encode(&frame, Quality::new(80).unwrap()).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        let decoded = JpegCodec.decode(&bytes).unwrap();
        assert_eq!(decoded.format(), FrameFormat::Luma8);
    }
}
