//! Integration tests for the capture lifecycle
//!
//! These tests drive `EngineHandle` against the synthetic audio host:
//! - identical restarts are no-ops
//! - device switches release the old binding before the new one runs
//! - open failures and mid-stream capture failures converge to Stopped

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use violin_trainer::analysis::{BlockFeatures, FeatureExtractor, FeatureExtractorFactory};
use violin_trainer::audio::SyntheticHost;
use violin_trainer::config::AppConfig;
use violin_trainer::engine::{EngineHandle, SessionState};
use violin_trainer::error::AudioError;
use violin_trainer::telemetry::TelemetryEventKind;

fn engine(host: &SyntheticHost) -> EngineHandle {
    let mut config = AppConfig::default();
    config.stream.autostart_on_subscribe = false;
    EngineHandle::new(Arc::new(host.clone()), config)
}

/// Extractor that stalls the capture loop on every sounding block
struct SlowExtractor {
    entered: Arc<AtomicUsize>,
}

impl FeatureExtractor for SlowExtractor {
    fn extract(&mut self, _block: &[f32]) -> BlockFeatures {
        self.entered.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(800));
        BlockFeatures::default()
    }
}

#[derive(Default)]
struct SlowFactory {
    entered: Arc<AtomicUsize>,
}

impl FeatureExtractorFactory for SlowFactory {
    fn create(&self, _: u32, _: usize) -> Result<Box<dyn FeatureExtractor>, AudioError> {
        Ok(Box::new(SlowExtractor {
            entered: Arc::clone(&self.entered),
        }))
    }
}

/// Engine whose stop deadline is far shorter than one slow block
fn slow_engine(host: &SyntheticHost) -> (EngineHandle, Arc<AtomicUsize>) {
    let mut config = AppConfig::default();
    config.stream.autostart_on_subscribe = false;
    config.audio.stop_timeout_ms = 100;
    let factory = Arc::new(SlowFactory::default());
    let entered = Arc::clone(&factory.entered);
    let engine = EngineHandle::new(Arc::new(host.clone()), config).with_extractor_factory(factory);
    (engine, entered)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_identical_start_is_noop() {
    let host = SyntheticHost::demo().paced(true);
    let engine = engine(&host);

    let first = engine.start(Some(1), Some(44_100), Some(512)).unwrap();
    let second = engine.start(Some(1), Some(44_100), Some(512)).unwrap();

    assert_eq!(first.session_id, second.session_id);
    assert_eq!(host.open_count(), 1, "identical start must not reopen the device");
    assert_eq!(host.close_count(), 0);

    engine.stop().unwrap();
}

#[test]
fn test_switch_stops_old_session_before_new_runs() {
    let host = SyntheticHost::demo().paced(true);
    let engine = engine(&host);

    let first = engine.start(Some(0), None, Some(512)).unwrap();
    let switched = engine.start(Some(1), None, Some(512)).unwrap();

    assert_ne!(first.session_id, switched.session_id);
    assert_eq!(switched.device_id, Some(1));
    assert_eq!(switched.device_name.as_deref(), Some("Synthetic A4"));
    assert_eq!(host.open_count(), 2);
    assert_eq!(host.close_count(), 1, "old binding released before switch returns");
    assert_eq!(host.max_active_streams(), 1, "never two capture bindings at once");

    let recent = engine.telemetry_snapshot().recent;
    assert!(recent
        .iter()
        .any(|event| matches!(event.kind, TelemetryEventKind::DeviceSwitched { .. })));

    engine.stop().unwrap();
    assert_eq!(host.active_streams(), 0);
}

#[test]
fn test_block_size_change_is_a_switch() {
    let host = SyntheticHost::demo().paced(true);
    let engine = engine(&host);

    engine.start(Some(1), None, Some(512)).unwrap();
    let status = engine.start(Some(1), None, Some(1024)).unwrap();

    assert_eq!(status.block_size, Some(1024));
    assert_eq!(host.open_count(), 2);
    assert_eq!(host.max_active_streams(), 1);
    engine.stop().unwrap();
}

#[test]
fn test_open_failure_leaves_engine_stopped_and_retry_converges() {
    let host = SyntheticHost::demo().paced(true);
    host.set_fail_open(true);
    let engine = engine(&host);

    let err = engine.start(None, None, None).unwrap_err();
    assert!(matches!(err, AudioError::DeviceUnavailable { .. }));
    let status = engine.status();
    assert!(!status.running);
    assert_eq!(status.state, SessionState::Stopped);
    assert!(status.device_id.is_none());

    host.set_fail_open(false);
    let status = engine.start(None, None, None).unwrap();
    assert!(status.running);
    engine.stop().unwrap();
}

#[test]
fn test_failed_switch_reports_stopped() {
    let host = SyntheticHost::demo().paced(true);
    let engine = engine(&host);
    engine.start(Some(0), None, Some(512)).unwrap();

    host.set_fail_open(true);
    assert!(engine.start(Some(1), None, Some(512)).is_err());
    assert!(!engine.status().running);
    assert_eq!(host.active_streams(), 0);
}

#[test]
fn test_capture_error_transitions_to_stopped() {
    let host = SyntheticHost::demo();
    host.set_fail_after_blocks(Some(5));
    let engine = engine(&host);

    engine.start(Some(1), None, Some(256)).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || !engine.status().running),
        "capture failure should stop the session"
    );
    assert_eq!(engine.status().state, SessionState::Stopped);
    assert_eq!(host.active_streams(), 0);

    let recent = engine.telemetry_snapshot().recent;
    assert!(recent
        .iter()
        .any(|event| event.kind == TelemetryEventKind::CaptureFailed));

    // Stop after a failure is a no-op success
    assert!(!engine.stop().unwrap().running);

    host.set_fail_after_blocks(None);
    assert!(engine.start(Some(1), None, Some(256)).unwrap().running);
    engine.stop().unwrap();
}

#[test]
fn test_stop_releases_device_and_resets_status() {
    let host = SyntheticHost::demo().paced(true);
    let engine = engine(&host);
    engine.start(Some(1), None, None).unwrap();

    let status = engine.stop().unwrap();
    assert!(!status.running);
    assert!(status.device_name.is_none());
    assert!(status.sample_rate.is_none());
    assert_eq!(host.active_streams(), 0);
    assert_eq!(engine.status(), status);
}

#[test]
fn test_switch_after_stop_timeout_never_opens_second_device() {
    let host = SyntheticHost::demo();
    let (engine, entered) = slow_engine(&host);

    engine.start(Some(1), None, Some(512)).unwrap();
    assert!(wait_until(Duration::from_secs(2), || entered.load(Ordering::SeqCst) > 0));

    let err = engine.start(Some(0), None, Some(512)).unwrap_err();
    assert!(matches!(err, AudioError::StopTimeout { timeout_ms: 100 }));
    assert!(!engine.status().running);
    assert_eq!(host.open_count(), 1, "switch must not open while the old device is held");
    assert_eq!(host.active_streams(), 1);

    // The stalled block finishes and the worker lets go of the device
    assert!(wait_until(Duration::from_secs(2), || host.active_streams() == 0));
    let status = engine.start(Some(0), None, Some(512)).unwrap();
    assert!(status.running);
    assert_eq!(host.max_active_streams(), 1);

    engine.stop().unwrap();
}

#[test]
fn test_start_waits_for_session_that_missed_stop_deadline() {
    let host = SyntheticHost::demo();
    let (engine, entered) = slow_engine(&host);

    engine.start(Some(1), None, Some(512)).unwrap();
    assert!(wait_until(Duration::from_secs(2), || entered.load(Ordering::SeqCst) > 0));

    let err = engine.stop().unwrap_err();
    assert!(matches!(err, AudioError::StopTimeout { .. }));
    assert!(!engine.status().running);
    assert_eq!(host.active_streams(), 1);

    // Still draining: the start fails instead of binding a second device
    assert!(matches!(
        engine.start(Some(0), None, Some(512)),
        Err(AudioError::StopTimeout { .. })
    ));
    assert_eq!(host.open_count(), 1);

    assert!(wait_until(Duration::from_secs(2), || host.active_streams() == 0));
    assert!(engine.stop().is_ok());
    assert!(engine.start(Some(0), None, Some(512)).unwrap().running);
    assert_eq!(host.max_active_streams(), 1);

    engine.stop().unwrap();
}

#[test]
fn test_drop_with_draining_session_returns_and_device_is_released() {
    let host = SyntheticHost::demo();
    let (engine, entered) = slow_engine(&host);
    engine.start(Some(1), None, Some(512)).unwrap();
    assert!(wait_until(Duration::from_secs(2), || entered.load(Ordering::SeqCst) > 0));
    assert!(engine.stop().is_err());

    // Teardown reports the missed deadline instead of blocking on the worker
    let started = Instant::now();
    drop(engine);
    assert!(started.elapsed() < Duration::from_millis(600));
    assert!(wait_until(Duration::from_secs(2), || host.active_streams() == 0));
}
