//! Lossy image codecs compared side by side by the pipeline.
//!
//! Two codec roles exist: a *fast* codec (JPEG by default) and an *alternate*
//! codec (WebP by default). [`PerCodec`] holds one value per role so a
//! measurement can never carry one role without the other.

mod jpeg;
mod webp_codec;

pub use jpeg::JpegCodec;
pub use webp_codec::WebpCodec;

use std::{fmt, str::FromStr, sync::Arc};

use serde::Serialize;
use thiserror::Error;
use video_ingest::{Frame, FrameError};

/// Compression quality shared by both codecs, always within `1..=100`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Quality(u8);

impl Quality {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 100;

    pub fn new(value: i64) -> Result<Self, QualityError> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(QualityError::OutOfRange { value })
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(50)
    }
}

impl TryFrom<i64> for Quality {
    type Error = QualityError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl FromStr for Quality {
    type Err = QualityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let value = input
            .trim()
            .parse::<i64>()
            .map_err(|_| QualityError::NotANumber {
                input: input.to_string(),
            })?;
        Self::new(value)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QualityError {
    #[error("quality must be an integer between 1 and 100 (got {value})")]
    OutOfRange { value: i64 },
    #[error("quality must be an integer between 1 and 100 (got {input:?})")]
    NotANumber { input: String },
}

/// Role a codec plays in the comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Fast,
    Alternate,
}

impl CodecKind {
    pub const ALL: [CodecKind; 2] = [CodecKind::Fast, CodecKind::Alternate];

    pub fn label(self) -> &'static str {
        match self {
            CodecKind::Fast => "fast",
            CodecKind::Alternate => "alternate",
        }
    }
}

/// One value for each codec role.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PerCodec<T> {
    pub fast: T,
    pub alternate: T,
}

impl<T> PerCodec<T> {
    pub fn new(fast: T, alternate: T) -> Self {
        Self { fast, alternate }
    }

    pub fn get(&self, kind: CodecKind) -> &T {
        match kind {
            CodecKind::Fast => &self.fast,
            CodecKind::Alternate => &self.alternate,
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(CodecKind, &T) -> U) -> PerCodec<U> {
        PerCodec {
            fast: f(CodecKind::Fast, &self.fast),
            alternate: f(CodecKind::Alternate, &self.alternate),
        }
    }

    /// Like [`PerCodec::map`], but stops at the first failing role.
    pub fn try_map<U, E>(
        &self,
        mut f: impl FnMut(CodecKind, &T) -> Result<U, E>,
    ) -> Result<PerCodec<U>, E> {
        Ok(PerCodec {
            fast: f(CodecKind::Fast, &self.fast)?,
            alternate: f(CodecKind::Alternate, &self.alternate)?,
        })
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{codec} encode failed: {reason}")]
    Encode { codec: &'static str, reason: String },
    #[error("{codec} decode failed: {reason}")]
    Decode { codec: &'static str, reason: String },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Lossy compress/decompress capability.
///
/// `decode` must accept anything `encode` on the same instance produced and
/// return a frame with the original dimensions.
pub trait Codec: Send + Sync {
    /// Short format name, used for labels and metric keys.
    fn name(&self) -> &'static str;

    fn encode(&self, frame: &Frame, quality: Quality) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Frame, CodecError>;
}

pub type SharedCodec = Arc<dyn Codec>;

/// JPEG as the fast codec and WebP as the alternate.
pub fn default_codecs() -> PerCodec<SharedCodec> {
    PerCodec::new(Arc::new(JpegCodec), Arc::new(WebpCodec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quality_metrics::psnr;

    const QUALITIES: [u8; 5] = [1, 10, 50, 90, 100];

    fn textured(width: u32, height: u32) -> Frame {
        Frame::from_rgb_fn(width, height, |x, y| {
            let checker = if (x / 2 + y / 2) % 2 == 0 { 60 } else { 0 };
            let v = ((x * 5 + y * 3) % 128) as u8 + checker;
            [v, v, v]
        })
        .unwrap()
    }

    fn black(width: u32, height: u32) -> Frame {
        Frame::from_rgb_fn(width, height, |_, _| [0, 0, 0]).unwrap()
    }

    fn round_trip_psnr(codec: &dyn Codec, frame: &Frame, quality: u8) -> f64 {
        let quality = Quality::new(quality as i64).unwrap();
        let bytes = codec.encode(frame, quality).unwrap();
        let decoded = codec.decode(&bytes).unwrap().to_rgb();
        psnr(frame, &decoded).unwrap()
    }

    #[test]
    fn quality_validates_range() {
        assert_eq!(Quality::new(1).unwrap().get(), 1);
        assert_eq!(Quality::new(100).unwrap().get(), 100);
        assert_eq!(Quality::new(0), Err(QualityError::OutOfRange { value: 0 }));
        assert!(Quality::new(101).is_err());
        assert_eq!("  75 ".parse::<Quality>().unwrap().get(), 75);
        assert!(matches!(
            "high".parse::<Quality>(),
            Err(QualityError::NotANumber { .. })
        ));
        assert_eq!(Quality::default().to_string(), "50");
    }

    #[test]
    fn per_codec_maps_both_roles() {
        let pair = PerCodec::new(2, 3);
        assert_eq!(*pair.get(CodecKind::Alternate), 3);
        let labels = pair.map(|kind, value| format!("{}={value}", kind.label()));
        assert_eq!(labels.fast, "fast=2");
        let failed: Result<PerCodec<i32>, &str> =
            pair.try_map(|kind, v| if kind == CodecKind::Fast { Ok(*v) } else { Err("nope") });
        assert_eq!(failed, Err("nope"));
    }

    #[test]
    fn round_trip_preserves_dimensions() {
        let codecs = default_codecs();
        let frames = [textured(33, 17), textured(20, 12).to_luma()];
        for kind in CodecKind::ALL {
            let codec = codecs.get(kind);
            for frame in &frames {
                for q in QUALITIES {
                    let quality = Quality::new(q as i64).unwrap();
                    let bytes = codec.encode(frame, quality).unwrap();
                    assert!(!bytes.is_empty());
                    let decoded = codec.decode(&bytes).unwrap();
                    assert_eq!(
                        (decoded.width(), decoded.height()),
                        (frame.width(), frame.height()),
                        "{} at q{q}",
                        codec.name()
                    );
                }
            }
        }
    }

    #[test]
    fn black_frame_survives_high_quality() {
        let codecs = default_codecs();
        let frame = black(64, 48);
        for kind in CodecKind::ALL {
            let codec = codecs.get(kind);
            let db = round_trip_psnr(codec.as_ref(), &frame, 100);
            assert!(db > 40.0, "{} black frame at q100: {db}", codec.name());
        }
    }

    #[test]
    fn psnr_tracks_quality() {
        let codecs = default_codecs();
        let frame = textured(64, 64);
        for kind in CodecKind::ALL {
            let codec = codecs.get(kind);
            let high = round_trip_psnr(codec.as_ref(), &frame, 100);
            let low = round_trip_psnr(codec.as_ref(), &frame, 10);
            assert!(
                low + 3.0 < high,
                "{}: q10 {low:.2} dB vs q100 {high:.2} dB",
                codec.name()
            );
        }
    }

    #[test]
    fn garbage_fails_to_decode() {
        let codecs = default_codecs();
        for kind in CodecKind::ALL {
            assert!(codecs.get(kind).decode(b"not an image").is_err());
        }
    }
}
