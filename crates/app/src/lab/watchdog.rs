//! Heartbeat-based stall detection for the pipeline loop.
//!
//! Each stage stamps a heartbeat when it completes. The watchdog thread polls
//! the stamps and records the first stale stage for `GET /healthz`.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::Serialize;
use tracing::{error, info};

use crate::lab::telemetry;

pub(crate) const WATCHDOG_POLL_INTERVAL_MS: u64 = 500;
pub(crate) const WATCHDOG_STALE_THRESHOLD_MS: u64 = 3_000;
pub(crate) const WATCHDOG_STARTUP_GRACE_MS: u64 = 5_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum HealthComponent {
    Capture,
    Detector,
    Encoder,
}

impl HealthComponent {
    pub(crate) const ALL: [HealthComponent; 3] = [
        HealthComponent::Capture,
        HealthComponent::Detector,
        HealthComponent::Encoder,
    ];

    pub(crate) fn label(self) -> &'static str {
        match self {
            HealthComponent::Capture => "capture",
            HealthComponent::Detector => "detection",
            HealthComponent::Encoder => "encoding",
        }
    }
}

pub(crate) struct PipelineHealth {
    capture: AtomicU64,
    detector: AtomicU64,
    encoder: AtomicU64,
    stale_after_ms: u64,
}

impl PipelineHealth {
    /// `iteration_interval` stretches the stale threshold for slow loops.
    pub(crate) fn new(iteration_interval: Duration) -> Self {
        let now = current_millis();
        let grace_deadline = now.saturating_add(WATCHDOG_STARTUP_GRACE_MS);
        let interval_ms = iteration_interval.as_millis().min(u64::MAX as u128) as u64;
        Self {
            capture: AtomicU64::new(grace_deadline),
            detector: AtomicU64::new(grace_deadline),
            encoder: AtomicU64::new(grace_deadline),
            stale_after_ms: WATCHDOG_STALE_THRESHOLD_MS.max(interval_ms.saturating_mul(3)),
        }
    }

    fn slot(&self, component: HealthComponent) -> &AtomicU64 {
        match component {
            HealthComponent::Capture => &self.capture,
            HealthComponent::Detector => &self.detector,
            HealthComponent::Encoder => &self.encoder,
        }
    }

    pub(crate) fn beat(&self, component: HealthComponent) {
        self.slot(component).store(current_millis(), Ordering::Relaxed);
    }

    /// First stage, in pipeline order, whose heartbeat is older than the
    /// threshold.
    pub(crate) fn stale_component(&self, now: u64) -> Option<HealthComponent> {
        HealthComponent::ALL.into_iter().find(|&component| {
            now.saturating_sub(self.slot(component).load(Ordering::Relaxed)) > self.stale_after_ms
        })
    }
}

/// Current stall verdict and worker respawn count, read by `GET /healthz`.
pub(crate) struct WatchdogState {
    triggered: AtomicBool,
    reason: Mutex<Option<HealthComponent>>,
    restarts: AtomicU32,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthReport {
    pub(crate) status: &'static str,
    pub(crate) stalled: Option<&'static str>,
    pub(crate) restarts: u32,
}

impl WatchdogState {
    pub(crate) fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
            reason: Mutex::new(None),
            restarts: AtomicU32::new(0),
        }
    }

    pub(crate) fn arm(&self, component: HealthComponent) {
        *self.reason.lock().unwrap_or_else(PoisonError::into_inner) = Some(component);
        self.triggered.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear(&self) {
        *self.reason.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.triggered.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub(crate) fn reason(&self) -> Option<HealthComponent> {
        *self.reason.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_restart(&self) -> u32 {
        self.restarts.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    pub(crate) fn report(&self) -> HealthReport {
        let stalled = self
            .is_triggered()
            .then(|| self.reason().map(HealthComponent::label))
            .flatten();
        HealthReport {
            status: if stalled.is_some() { "stalled" } else { "ok" },
            stalled,
            restarts: self.restarts.load(Ordering::SeqCst),
        }
    }
}

/// Poll heartbeats until shutdown. A stall is logged once when it starts and
/// once when it clears; the pipeline itself keeps running.
pub(crate) fn spawn_watchdog(
    health: Arc<PipelineHealth>,
    shutdown: Arc<AtomicBool>,
    state: Arc<WatchdogState>,
) -> std::io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("lab-watchdog", move || {
        while !shutdown.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(WATCHDOG_POLL_INTERVAL_MS));
            let now = current_millis();
            match (health.stale_component(now), state.reason()) {
                (Some(component), previous) if previous != Some(component) => {
                    error!("Watchdog detected stalled {} stage", component.label());
                    metrics::counter!("lab_watchdog_trips_total", "stage" => component.label())
                        .increment(1);
                    if let Some(previous) = previous {
                        metrics::gauge!("lab_watchdog_stalled", "stage" => previous.label())
                            .set(0.0);
                    }
                    metrics::gauge!("lab_watchdog_stalled", "stage" => component.label()).set(1.0);
                    state.arm(component);
                }
                (None, Some(previous)) => {
                    info!("Watchdog: {} stage recovered", previous.label());
                    metrics::gauge!("lab_watchdog_stalled", "stage" => previous.label()).set(0.0);
                    state.clear();
                }
                _ => {}
            }
        }
    })
}

pub(crate) fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_health_is_within_grace() {
        let health = PipelineHealth::new(Duration::from_millis(100));
        let now = current_millis();
        assert_eq!(health.stale_component(now), None);
        assert_eq!(
            health.stale_component(now + WATCHDOG_STARTUP_GRACE_MS + WATCHDOG_STALE_THRESHOLD_MS + 1),
            Some(HealthComponent::Capture)
        );
    }

    #[test]
    fn reports_first_stale_stage_in_order() {
        let health = PipelineHealth::new(Duration::from_millis(100));
        health.beat(HealthComponent::Capture);
        health.beat(HealthComponent::Detector);
        health.beat(HealthComponent::Encoder);
        let now = current_millis();
        health.encoder.store(0, Ordering::Relaxed);
        assert_eq!(health.stale_component(now), Some(HealthComponent::Encoder));
        health.detector.store(0, Ordering::Relaxed);
        assert_eq!(health.stale_component(now), Some(HealthComponent::Detector));
    }

    #[test]
    fn slow_iterations_widen_the_threshold() {
        let health = PipelineHealth::new(Duration::from_secs(10));
        assert_eq!(health.stale_after_ms, 30_000);
    }

    #[test]
    fn report_tracks_arm_and_clear() {
        let state = WatchdogState::new();
        assert_eq!(state.report().status, "ok");
        state.arm(HealthComponent::Detector);
        let report = state.report();
        assert_eq!(report.status, "stalled");
        assert_eq!(report.stalled, Some("detection"));
        assert_eq!(state.record_restart(), 1);
        state.clear();
        let report = state.report();
        assert_eq!(report.stalled, None);
        assert_eq!(report.restarts, 1);
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(50));
        }
        false
    }

    #[test]
    fn watchdog_reports_stall_and_recovery() {
        let health = Arc::new(PipelineHealth::new(Duration::from_millis(100)));
        health.capture.store(0, Ordering::Relaxed);
        let shutdown = Arc::new(AtomicBool::new(false));
        let state = Arc::new(WatchdogState::new());
        let handle = spawn_watchdog(health.clone(), shutdown.clone(), state.clone()).unwrap();

        assert!(wait_for(|| state.reason() == Some(HealthComponent::Capture)));
        assert_eq!(state.report().stalled, Some("capture"));

        health.beat(HealthComponent::Capture);
        assert!(wait_for(|| !state.is_triggered()));
        assert_eq!(state.report().status, "ok");

        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }
}
