//! Quality-tagged time series of codec measurements.
//!
//! Every write and every quality change goes through one `RwLock`, so readers
//! always observe columns of equal length and a quality that matches the
//! samples they are served with. Quality changes bump an epoch; measurements
//! taken under an older epoch are discarded on append instead of leaking into
//! the fresh series.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
    time::Instant,
};

use codecs::{PerCodec, Quality};

use crate::lab::data::{CodecReading, Sample};

/// Quality in force when an iteration started, plus the epoch it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct QualityTicket {
    pub(crate) epoch: u64,
    pub(crate) quality: Quality,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum AppendOutcome {
    Appended { timestamp_s: f64, len: usize },
    /// Quality changed while the measurement was in flight.
    StaleEpoch,
    /// Rounded timestamp did not advance past the previous sample.
    NotMonotonic { timestamp_s: f64 },
}

/// Consistent copy of the series taken under a single read lock.
#[derive(Clone, Debug)]
pub(crate) struct SeriesSnapshot {
    pub(crate) epoch: u64,
    pub(crate) quality: Quality,
    pub(crate) samples: Vec<Sample>,
}

struct SeriesInner {
    epoch: u64,
    quality: Quality,
    started_at: Instant,
    samples: VecDeque<Sample>,
}

pub(crate) struct SeriesStore {
    inner: RwLock<SeriesInner>,
    capacity: Option<usize>,
}

impl SeriesStore {
    /// `capacity` bounds the number of retained samples; the oldest are
    /// evicted first. `None` keeps everything.
    pub(crate) fn new(quality: Quality, capacity: Option<usize>) -> Self {
        Self {
            inner: RwLock::new(SeriesInner {
                epoch: 0,
                quality,
                started_at: Instant::now(),
                samples: VecDeque::new(),
            }),
            capacity: capacity.filter(|&c| c > 0),
        }
    }

    pub(crate) fn ticket(&self) -> QualityTicket {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        QualityTicket {
            epoch: inner.epoch,
            quality: inner.quality,
        }
    }

    pub(crate) fn quality(&self) -> Quality {
        self.ticket().quality
    }

    pub(crate) fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .samples
            .len()
    }

    pub(crate) fn append(
        &self,
        ticket: QualityTicket,
        readings: PerCodec<CodecReading>,
    ) -> AppendOutcome {
        self.append_at(ticket, Instant::now(), readings)
    }

    pub(crate) fn append_at(
        &self,
        ticket: QualityTicket,
        at: Instant,
        readings: PerCodec<CodecReading>,
    ) -> AppendOutcome {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if ticket.epoch != inner.epoch {
            return AppendOutcome::StaleEpoch;
        }

        let timestamp_s = round_tenths(at.saturating_duration_since(inner.started_at).as_secs_f64());
        if inner
            .samples
            .back()
            .is_some_and(|last| timestamp_s <= last.timestamp_s)
        {
            return AppendOutcome::NotMonotonic { timestamp_s };
        }

        inner.samples.push_back(Sample {
            timestamp_s,
            quality: ticket.quality,
            readings,
        });
        if let Some(capacity) = self.capacity {
            while inner.samples.len() > capacity {
                inner.samples.pop_front();
            }
        }
        AppendOutcome::Appended {
            timestamp_s,
            len: inner.samples.len(),
        }
    }

    pub(crate) fn snapshot(&self) -> SeriesSnapshot {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        SeriesSnapshot {
            epoch: inner.epoch,
            quality: inner.quality,
            samples: inner.samples.iter().cloned().collect(),
        }
    }

    /// Clear the series, adopt `quality` and restart the clock. Returns the new
    /// epoch.
    pub(crate) fn reset_and_set_quality(&self, quality: Quality) -> u64 {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.samples.clear();
        inner.epoch = inner.epoch.wrapping_add(1);
        inner.quality = quality;
        inner.started_at = Instant::now();
        inner.epoch
    }
}

fn round_tenths(seconds: f64) -> f64 {
    (seconds * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::Duration,
    };

    use super::*;

    fn readings(fast_db: f64) -> PerCodec<CodecReading> {
        PerCodec::new(
            CodecReading {
                size_bytes: 100,
                psnr_db: fast_db,
                ssim: 0.9,
            },
            CodecReading {
                size_bytes: 90,
                psnr_db: fast_db + 1.0,
                ssim: 0.95,
            },
        )
    }

    fn q(value: i64) -> Quality {
        Quality::new(value).unwrap()
    }

    #[test]
    fn appends_grow_in_time_order() {
        let store = SeriesStore::new(q(50), None);
        let ticket = store.ticket();
        let base = Instant::now();
        for i in 0..4u64 {
            let at = base + Duration::from_millis(150 * i);
            assert!(matches!(
                store.append_at(ticket, at, readings(30.0)),
                AppendOutcome::Appended { .. }
            ));
        }
        let snapshot = store.snapshot();
        assert_eq!(snapshot.samples.len(), 4);
        assert!(
            snapshot
                .samples
                .windows(2)
                .all(|w| w[0].timestamp_s < w[1].timestamp_s)
        );
        assert!(snapshot.samples.iter().all(|s| s.quality == q(50)));
    }

    #[test]
    fn repeated_timestamp_is_dropped() {
        let store = SeriesStore::new(q(50), None);
        let ticket = store.ticket();
        let at = Instant::now() + Duration::from_millis(500);
        assert!(matches!(
            store.append_at(ticket, at, readings(30.0)),
            AppendOutcome::Appended { len: 1, .. }
        ));
        assert!(matches!(
            store.append_at(ticket, at + Duration::from_millis(10), readings(31.0)),
            AppendOutcome::NotMonotonic { .. }
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reset_empties_and_switches_quality() {
        let store = SeriesStore::new(q(50), None);
        let before = store.ticket();
        store.append(before, readings(30.0));
        assert_eq!(store.len(), 1);

        let epoch = store.reset_and_set_quality(q(90));
        assert_eq!(epoch, before.epoch + 1);
        let snapshot = store.snapshot();
        assert!(snapshot.samples.is_empty());
        assert_eq!(snapshot.quality, q(90));
        assert_eq!(store.quality(), q(90));
    }

    #[test]
    fn measurement_from_previous_epoch_is_discarded() {
        let store = SeriesStore::new(q(50), None);
        let stale = store.ticket();
        store.reset_and_set_quality(q(20));
        assert_eq!(
            store.append(stale, readings(30.0)),
            AppendOutcome::StaleEpoch
        );
        assert_eq!(store.len(), 0);

        let fresh = store.ticket();
        assert!(matches!(
            store.append_at(fresh, Instant::now() + Duration::from_millis(200), readings(28.0)),
            AppendOutcome::Appended { .. }
        ));
        assert_eq!(store.snapshot().samples[0].quality, q(20));
    }

    #[test]
    fn timestamps_restart_near_zero_after_reset() {
        let store = SeriesStore::new(q(50), None);
        let ticket = store.ticket();
        store.append_at(ticket, Instant::now() + Duration::from_secs(30), readings(30.0));
        store.reset_and_set_quality(q(60));
        let ticket = store.ticket();
        let AppendOutcome::Appended { timestamp_s, .. } = store.append(ticket, readings(30.0))
        else {
            panic!("fresh series should accept the first sample");
        };
        assert!(timestamp_s < 1.0, "{timestamp_s}");
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let store = SeriesStore::new(q(50), Some(3));
        let ticket = store.ticket();
        let base = Instant::now();
        for i in 0..5u64 {
            store.append_at(
                ticket,
                base + Duration::from_millis(200 * (i + 1)),
                readings(i as f64),
            );
        }
        let samples = store.snapshot().samples;
        assert_eq!(samples.len(), 3);
        let first_db: Vec<f64> = samples.iter().map(|s| s.readings.fast.psnr_db).collect();
        assert_eq!(first_db, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn readers_never_see_torn_series() {
        let store = Arc::new(SeriesStore::new(q(50), None));
        let writer_done = Arc::new(AtomicBool::new(false));
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                let base = Instant::now();
                for i in 0..400u64 {
                    if i % 100 == 99 {
                        store.reset_and_set_quality(q(10 + (i / 100) as i64));
                    }
                    let ticket = store.ticket();
                    store.append_at(
                        ticket,
                        base + Duration::from_millis(150 * (i + 1)),
                        readings(30.0),
                    );
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let writer_done = writer_done.clone();
                thread::spawn(move || {
                    let mut seen = 0usize;
                    while !writer_done.load(Ordering::SeqCst) || seen == 0 {
                        let snapshot = store.snapshot();
                        assert!(snapshot.samples.iter().all(|s| s.quality == snapshot.quality));
                        assert!(
                            snapshot
                                .samples
                                .windows(2)
                                .all(|w| w[0].timestamp_s < w[1].timestamp_s)
                        );
                        seen += 1;
                    }
                    seen
                })
            })
            .collect();

        writer.join().unwrap();
        writer_done.store(true, Ordering::SeqCst);
        for reader in readers {
            assert!(reader.join().unwrap() > 0);
        }
    }
}
