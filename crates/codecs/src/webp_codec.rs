use video_ingest::{Frame, FrameFormat};

use crate::{Codec, CodecError, Quality};

const NAME: &str = "webp";

/// Lossy WebP through libwebp.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebpCodec;

impl Codec for WebpCodec {
    fn name(&self) -> &'static str {
        NAME
    }

    fn encode(&self, frame: &Frame, quality: Quality) -> Result<Vec<u8>, CodecError> {
        let rgb = frame.to_rgb();
        let memory = webp::Encoder::from_rgb(rgb.data(), rgb.width(), rgb.height())
            .encode_simple(false, quality.get() as f32)
            .map_err(|err| CodecError::Encode {
                codec: NAME,
                reason: format!("{err:?}"),
            })?;
        Ok(memory.to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Frame, CodecError> {
        let image = webp::Decoder::new(bytes)
            .decode()
            .ok_or_else(|| CodecError::Decode {
                codec: NAME,
                reason: "not a decodable WebP bitstream".to_string(),
            })?;
        let (width, height) = (image.width(), image.height());
        let data = if image.is_alpha() {
            image
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect()
        } else {
            image.to_vec()
        };
        Ok(Frame::new(data, width, height, FrameFormat::Rgb8)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_a_riff_container() {
        let frame = Frame::from_rgb_fn(24, 16, |x, y| [x as u8 * 10, y as u8 * 10, 90]).unwrap();
        let bytes = WebpCodec.encode(&frame, Quality::new(60).unwrap()).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WEBP");
    }
}
