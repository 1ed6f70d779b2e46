//! State shared between the pipeline loop and the HTTP handlers.
//!
//! Locks are never nested: each accessor takes exactly one lock and releases
//! it before returning. The only multi-step operation, a quality change, first
//! resets the series and then clears the face crop.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use codecs::Quality;
use video_ingest::{CaptureError, Frame, FrameSource};

use crate::lab::{
    data::{FaceCrop, FramePacket},
    series::SeriesStore,
};

pub(crate) struct PipelineState {
    source: Mutex<Option<Box<dyn FrameSource>>>,
    series: SeriesStore,
    live: RwLock<Option<Arc<FramePacket>>>,
    face: RwLock<Option<Arc<FaceCrop>>>,
}

impl PipelineState {
    pub(crate) fn new(quality: Quality, max_samples: Option<usize>) -> Self {
        Self {
            source: Mutex::new(None),
            series: SeriesStore::new(quality, max_samples),
            live: RwLock::new(None),
            face: RwLock::new(None),
        }
    }

    pub(crate) fn series(&self) -> &SeriesStore {
        &self.series
    }

    /// Install the capture device used by both the pipeline and `/preview`.
    pub(crate) fn attach_source(&self, source: Box<dyn FrameSource>) {
        *self.source.lock().unwrap_or_else(PoisonError::into_inner) = Some(source);
    }

    pub(crate) fn detach_source(&self) -> Option<Box<dyn FrameSource>> {
        self.source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Grab one frame from the attached source.
    pub(crate) fn capture(&self) -> Result<Frame, CaptureError> {
        let mut guard = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(source) => source.capture(),
            None => Err(CaptureError::Unavailable),
        }
    }

    pub(crate) fn publish_live(&self, packet: FramePacket) {
        *self.live.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(packet));
    }

    pub(crate) fn latest_live(&self) -> Option<Arc<FramePacket>> {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the face crop; `None` means the last frame had no face.
    pub(crate) fn publish_face(&self, crop: Option<FaceCrop>) {
        *self.face.write().unwrap_or_else(PoisonError::into_inner) = crop.map(Arc::new);
    }

    pub(crate) fn latest_face(&self) -> Option<Arc<FaceCrop>> {
        self.face
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Switch quality for subsequent measurements and start a fresh series.
    /// Returns the new epoch.
    pub(crate) fn reset_and_set_quality(&self, quality: Quality) -> u64 {
        let epoch = self.series.reset_and_set_quality(quality);
        self.publish_face(None);
        epoch
    }
}

#[cfg(test)]
mod tests {
    use face_detect::BoundingBox;
    use video_ingest::SyntheticSource;

    use super::*;

    #[test]
    fn capture_requires_a_source() {
        let state = PipelineState::new(Quality::default(), None);
        assert!(matches!(state.capture(), Err(CaptureError::Unavailable)));

        state.attach_source(Box::new(SyntheticSource::new(32, 24)));
        let frame = state.capture().unwrap();
        assert_eq!((frame.width(), frame.height()), (32, 24));

        assert!(state.detach_source().is_some());
        assert!(state.capture().is_err());
    }

    #[test]
    fn quality_change_clears_face_crop() {
        let state = PipelineState::new(Quality::default(), None);
        state.publish_face(Some(FaceCrop {
            jpeg: vec![0xFF, 0xD8],
            bbox: BoundingBox::new(1, 2, 3, 4),
            frame_number: 7,
        }));
        assert!(state.latest_face().is_some());

        let epoch = state.reset_and_set_quality(Quality::new(80).unwrap());
        assert_eq!(epoch, 1);
        assert!(state.latest_face().is_none());
        assert_eq!(state.series().quality().get(), 80);
    }

    #[test]
    fn live_frame_is_replaced_not_queued() {
        let state = PipelineState::new(Quality::default(), None);
        assert!(state.latest_live().is_none());
        for frame_number in 1..=3 {
            state.publish_live(FramePacket {
                jpeg: vec![frame_number as u8],
                frame_number,
                timestamp_ms: 0,
                face: None,
            });
        }
        assert_eq!(state.latest_live().unwrap().frame_number, 3);
    }
}
