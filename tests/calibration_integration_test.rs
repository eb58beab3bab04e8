//! Integration tests for noise-floor calibration
//!
//! Calibration runs inside the capture session, so these tests start a real
//! synthetic session and await the ticket returned by `calibrate`.

use std::sync::Arc;
use std::time::Duration;

use violin_trainer::audio::{SyntheticDevice, SyntheticHost};
use violin_trainer::config::AppConfig;
use violin_trainer::engine::EngineHandle;
use violin_trainer::error::CalibrationError;
use violin_trainer::telemetry::TelemetryEventKind;

fn quiet_engine() -> EngineHandle {
    let host = SyntheticHost::new(vec![
        // Constant-amplitude tone well below the default gate
        SyntheticDevice::tone("Quiet hum", 440.0, 0.001),
    ])
    .paced(true);
    let mut config = AppConfig::default();
    config.stream.autostart_on_subscribe = false;
    EngineHandle::new(Arc::new(host), config)
}

#[test]
fn test_calibration_sets_noise_floor_and_adaptive_gate() {
    let engine = quiet_engine();
    let mut config = engine.get_noise_config();
    config.adaptive = true;
    config.margin_db = 8.0;
    engine.set_noise_config(config).unwrap();
    engine.start(None, None, Some(1024)).unwrap();

    let outcome = engine.calibrate(0.25).unwrap().blocking_wait().unwrap();

    // 0.001 peak sine -> RMS ~ -63 dBFS, the 80 Hz high-pass barely touches 440 Hz
    assert!(
        (outcome.noise_floor_db + 63.0).abs() < 1.0,
        "floor was {}",
        outcome.noise_floor_db
    );
    assert_eq!(outcome.blocks, 11);

    let stored = engine.get_noise_config();
    assert_eq!(stored.noise_floor_db, outcome.noise_floor_db);
    assert!((stored.effective_gate_db() - (outcome.noise_floor_db + 8.0)).abs() < 1e-4);
    assert_eq!(stored, outcome.config);

    let recent = engine.telemetry_snapshot().recent;
    assert!(recent
        .iter()
        .any(|event| matches!(event.kind, TelemetryEventKind::CalibrationCompleted { .. })));

    engine.stop().unwrap();
}

#[test]
fn test_calibration_keeps_fixed_gate_when_not_adaptive() {
    let engine = quiet_engine();
    engine.start(None, None, Some(1024)).unwrap();
    let gate_before = engine.get_noise_config().gate_threshold_db;

    let outcome = engine.calibrate(0.25).unwrap().blocking_wait().unwrap();
    let stored = engine.get_noise_config();
    assert_eq!(stored.noise_floor_db, outcome.noise_floor_db);
    assert_eq!(stored.gate_threshold_db, gate_before);
    assert_eq!(stored.effective_gate_db(), gate_before);

    engine.stop().unwrap();
}

#[test]
fn test_new_calibration_supersedes_previous() {
    let engine = quiet_engine();
    engine.start(None, None, Some(1024)).unwrap();

    let first = engine.calibrate(5.0).unwrap();
    let second = engine.calibrate(0.25).unwrap();

    assert!(matches!(
        first.blocking_wait(),
        Err(CalibrationError::Superseded)
    ));
    assert!(second.blocking_wait().is_ok());
    engine.stop().unwrap();
}

#[test]
fn test_invalid_duration_leaves_active_calibration_running() {
    let engine = quiet_engine();
    engine.start(None, None, Some(1024)).unwrap();

    let ticket = engine.calibrate(0.25).unwrap();
    assert!(matches!(
        engine.calibrate(0.1),
        Err(CalibrationError::InvalidDuration { .. })
    ));
    assert!(ticket.blocking_wait().is_ok());
    engine.stop().unwrap();
}

#[test]
fn test_restart_discards_calibration() {
    let engine = quiet_engine();
    engine.start(None, None, Some(1024)).unwrap();
    let ticket = engine.calibrate(5.0).unwrap();
    let floor_before = engine.get_noise_config().noise_floor_db;

    engine.start(None, None, Some(2048)).unwrap();
    assert!(matches!(
        ticket.blocking_wait(),
        Err(CalibrationError::Superseded)
    ));
    assert_eq!(engine.get_noise_config().noise_floor_db, floor_before);
    engine.stop().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ticket_wait_timeout() {
    let engine = quiet_engine();
    engine.start(None, None, Some(1024)).unwrap();

    let ticket = engine.calibrate(2.0).unwrap();
    let result = ticket.wait_timeout(Duration::from_millis(50)).await;
    assert!(matches!(result, Err(CalibrationError::Timeout { .. })));

    tokio::task::spawn_blocking(move || engine.stop())
        .await
        .unwrap()
        .unwrap();
}
