//! EngineHandle: Lifecycle Controller and public control surface.
//!
//! Owns the single capture session, the Config Store, the subscriber
//! registry and the telemetry hub. Every entry point (CLI, HTTP, tests)
//! drives the pipeline through this type.
//!
//! Control operations are synchronous and serialised by the lifecycle lock;
//! `start` and `stop` wait (bounded) for the capture worker, so callers on
//! an async runtime should run them on a blocking thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use crate::analysis::{AnalysisFrame, DefaultExtractorFactory, FeatureExtractorFactory, NoiseConfig};
use crate::audio::{AudioHost, CpalHost, DeviceInfo};
use crate::calibration::{validate_duration, CalibrationRequest, CalibrationTicket};
use crate::config::AppConfig;
use crate::engine::session::{
    FailureHook, RunningSession, SessionCommand, SessionContext, SessionParams,
};
use crate::engine::state::{EngineStatus, SessionState};
use crate::error::{
    log_audio_error, log_calibration_error, AudioError, CalibrationError, ConfigError,
};
use crate::managers::{BroadcastManager, FrameSink, NoiseConfigManager, SubscriberId};
use crate::telemetry::{TelemetryEvent, TelemetryEventKind, TelemetryHub, TelemetrySnapshot};

struct Lifecycle {
    state: SessionState,
    session: Option<RunningSession>,
    /// Session that missed its stop deadline and may still hold a device
    draining: Option<RunningSession>,
}

/// EngineHandle orchestrates capture sessions and shared state.
pub struct EngineHandle {
    config: AppConfig,
    host: Arc<dyn AudioHost>,
    factory: Arc<dyn FeatureExtractorFactory>,
    noise: NoiseConfigManager,
    pub(crate) broadcasts: BroadcastManager,
    lifecycle: Arc<Mutex<Lifecycle>>,
    status: Arc<RwLock<EngineStatus>>,
    telemetry: Arc<TelemetryHub>,
    next_session_id: AtomicU64,
}

impl EngineHandle {
    /// Create an engine over `host` with the given configuration.
    ///
    /// An invalid noise section is replaced by defaults before it reaches the
    /// Config Store.
    pub fn new(host: Arc<dyn AudioHost>, config: AppConfig) -> Self {
        let config = config.validated();
        let noise = NoiseConfigManager::new(config.noise);
        Self {
            config,
            host,
            factory: Arc::new(DefaultExtractorFactory),
            noise,
            broadcasts: BroadcastManager::new(),
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: SessionState::Stopped,
                session: None,
                draining: None,
            })),
            status: Arc::new(RwLock::new(EngineStatus::stopped())),
            telemetry: Arc::new(TelemetryHub::default()),
            next_session_id: AtomicU64::new(0),
        }
    }

    /// Microphone capture through CPAL with config from `AppConfig::load()`.
    pub fn with_cpal() -> Self {
        Self::new(Arc::new(CpalHost::new()), AppConfig::load())
    }

    /// Replace the feature extractor used by subsequently started sessions.
    pub fn with_extractor_factory(mut self, factory: Arc<dyn FeatureExtractorFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Start capture, or switch the running session to new parameters.
    ///
    /// Unspecified parameters resolve to the default device, the device's
    /// sample rate and the configured block size. A request matching the
    /// running session is a no-op that returns the current status.
    pub fn start(
        &self,
        device_id: Option<usize>,
        sample_rate: Option<u32>,
        block_size: Option<usize>,
    ) -> Result<EngineStatus, AudioError> {
        let result = self.start_inner(device_id, sample_rate, block_size);
        if let Err(err) = &result {
            log_audio_error(err, "start");
        }
        result
    }

    fn start_inner(
        &self,
        device_id: Option<usize>,
        sample_rate: Option<u32>,
        block_size: Option<usize>,
    ) -> Result<EngineStatus, AudioError> {
        let mut lifecycle = self.lock_lifecycle()?;
        let (params, device) = self.resolve_params(device_id, sample_rate, block_size)?;

        let switching = match lifecycle.session.as_ref() {
            Some(session) if session.params() == params => {
                log::debug!("[EngineHandle] start: session already running with {:?}", params);
                return Ok(self.status());
            }
            Some(_) => true,
            None => false,
        };
        self.await_drained(&mut lifecycle)?;

        lifecycle.state = lifecycle.state.transition(SessionState::Starting)?;

        if let Some(previous) = lifecycle.session.take() {
            log::info!(
                "[EngineHandle] Switching session {} -> device {} @ {} Hz, block {}",
                previous.id(),
                params.device_id,
                params.sample_rate,
                params.block_size
            );
            self.noise.clear_sample_rate();
            if let Err(err) = self.release(&mut lifecycle, previous) {
                lifecycle.state = lifecycle.state.transition(SessionState::Stopped)?;
                commit_status(&self.status, EngineStatus::stopped());
                self.telemetry.publish(
                    TelemetryEventKind::EngineStopped,
                    Some("previous session did not release its device".to_string()),
                );
                return Err(err);
            }
        }

        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1;
        match RunningSession::spawn(self.session_context(), id, params, self.failure_hook()) {
            Ok(session) => {
                lifecycle.state = lifecycle.state.transition(SessionState::Running)?;
                self.noise.bind_sample_rate(params.sample_rate);

                let device_name = session.device().name.clone();
                let status = EngineStatus {
                    running: true,
                    state: SessionState::Running,
                    session_id: Some(id),
                    device_id: Some(session.device().id),
                    device_name: Some(device_name.clone()),
                    sample_rate: Some(params.sample_rate),
                    block_size: Some(params.block_size),
                };
                lifecycle.session = Some(session);
                commit_status(&self.status, status.clone());

                log::info!(
                    "[EngineHandle] Session {} running on '{}' ({} Hz, block {})",
                    id,
                    device_name,
                    params.sample_rate,
                    params.block_size
                );
                let kind = if switching {
                    TelemetryEventKind::DeviceSwitched {
                        device: device_name,
                        sample_rate: params.sample_rate,
                        block_size: params.block_size,
                    }
                } else {
                    TelemetryEventKind::EngineStarted {
                        device: device_name,
                        sample_rate: params.sample_rate,
                        block_size: params.block_size,
                    }
                };
                self.telemetry.publish(kind, None);
                Ok(status)
            }
            Err(err) => {
                lifecycle.state = lifecycle.state.transition(SessionState::Stopped)?;
                commit_status(&self.status, EngineStatus::stopped());
                log::warn!(
                    "[EngineHandle] Failed to open '{}': {}",
                    device.name,
                    err
                );
                Err(err)
            }
        }
    }

    /// Stop capture and release the device.
    ///
    /// Stopping a stopped engine succeeds. If the worker does not exit within
    /// the configured timeout the engine reports Stopped and `StopTimeout` is
    /// returned; the session is kept as draining and no new session opens a
    /// device until it has let go.
    pub fn stop(&self) -> Result<EngineStatus, AudioError> {
        let mut lifecycle = self.lock_lifecycle()?;
        let Some(session) = lifecycle.session.take() else {
            lifecycle.state = SessionState::Stopped;
            if let Err(err) = self.await_drained(&mut lifecycle) {
                log_audio_error(&err, "stop");
                return Err(err);
            }
            return Ok(self.status());
        };

        lifecycle.state = lifecycle.state.transition(SessionState::Stopping)?;
        let session_id = session.id();
        let result = self.release(&mut lifecycle, session);
        lifecycle.state = lifecycle.state.transition(SessionState::Stopped)?;
        self.noise.clear_sample_rate();
        let status = EngineStatus::stopped();
        commit_status(&self.status, status.clone());

        log::info!("[EngineHandle] Session {} stopped", session_id);
        self.telemetry
            .publish(TelemetryEventKind::EngineStopped, None);

        match result {
            Ok(()) => Ok(status),
            Err(err) => {
                log_audio_error(&err, "stop");
                Err(err)
            }
        }
    }

    /// Status as of the last committed transition.
    pub fn status(&self) -> EngineStatus {
        match self.status.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Input devices offered by the audio host.
    pub fn devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        self.host.enumerate().map_err(|err| {
            log_audio_error(&err, "devices");
            err
        })
    }

    // ========================================================================
    // NOISE CONFIG & CALIBRATION
    // ========================================================================

    pub fn get_noise_config(&self) -> NoiseConfig {
        self.noise.get()
    }

    /// Validate and replace the noise configuration.
    pub fn set_noise_config(&self, config: NoiseConfig) -> Result<NoiseConfig, ConfigError> {
        let applied = self.noise.set(config)?;
        self.telemetry.publish(
            TelemetryEventKind::NoiseConfigChanged,
            Some(format!("effective gate {:.1} dB", applied.effective_gate_db())),
        );
        Ok(applied)
    }

    /// Shared handle on the Config Store.
    pub fn noise_config_store(&self) -> NoiseConfigManager {
        self.noise.clone()
    }

    /// Begin a noise-floor calibration on the running session.
    ///
    /// The ticket resolves once the requested window has been measured and
    /// the result written to the Config Store.
    pub fn calibrate(&self, seconds: f32) -> Result<CalibrationTicket, CalibrationError> {
        if let Err(err) = validate_duration(seconds) {
            log_calibration_error(&err, "calibrate");
            return Err(err);
        }

        let lifecycle = match self.lifecycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(session) = lifecycle.session.as_ref() else {
            let err = CalibrationError::NoActiveSession;
            log_calibration_error(&err, "calibrate");
            return Err(err);
        };

        let (request, ticket) = CalibrationRequest::new(seconds);
        if session.send(SessionCommand::Calibrate(request)).is_err() {
            let err = CalibrationError::NoActiveSession;
            log_calibration_error(&err, "calibrate");
            return Err(err);
        }

        log::info!(
            "[EngineHandle] Calibration requested on session {} ({:.2}s)",
            session.id(),
            seconds
        );
        Ok(ticket)
    }

    // ========================================================================
    // SUBSCRIBERS & TELEMETRY
    // ========================================================================

    /// Register a frame sink; may autostart a default session.
    pub fn subscribe(&self, sink: Arc<dyn FrameSink>) -> SubscriberId {
        let id = self.broadcasts.subscribe(sink);
        self.autostart_if_first();
        id
    }

    /// Register a bounded channel subscriber; may autostart a default session.
    pub fn subscribe_frames(&self) -> (SubscriberId, mpsc::Receiver<Arc<AnalysisFrame>>) {
        let (id, rx) = self
            .broadcasts
            .subscribe_channel(self.config.stream.subscriber_queue);
        self.autostart_if_first();
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.broadcasts.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcasts.len()
    }

    pub fn telemetry(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.telemetry.subscribe()
    }

    pub fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn autostart_if_first(&self) {
        if !self.config.stream.autostart_on_subscribe {
            return;
        }
        // Receivers dropped while stopped are only noticed on delivery
        for subscriber in self.broadcasts.prune_closed() {
            self.telemetry
                .publish(TelemetryEventKind::SubscriberPruned { subscriber }, None);
        }
        if self.broadcasts.len() != 1 {
            return;
        }
        if self.status().running {
            return;
        }
        log::info!("[EngineHandle] First subscriber joined, starting default session");
        if let Err(err) = self.start(None, None, None) {
            self.telemetry.publish(
                TelemetryEventKind::Warning,
                Some(format!("autostart failed: {}", err)),
            );
        }
    }

    fn resolve_params(
        &self,
        device_id: Option<usize>,
        sample_rate: Option<u32>,
        block_size: Option<usize>,
    ) -> Result<(SessionParams, DeviceInfo), AudioError> {
        let device = match device_id {
            Some(id) => self
                .host
                .enumerate()?
                .into_iter()
                .find(|device| device.id == id)
                .ok_or_else(|| AudioError::DeviceUnavailable {
                    reason: format!("no input device with id {}", id),
                })?,
            None => self.host.default_device()?,
        };

        let sample_rate = sample_rate
            .or(Some(device.default_sample_rate).filter(|rate| *rate > 0))
            .unwrap_or(self.config.audio.default_sample_rate);
        let block_size = block_size.unwrap_or(self.config.audio.default_block_size);

        if sample_rate == 0 {
            return Err(AudioError::InvalidParameters {
                reason: "sample rate must be positive".to_string(),
            });
        }
        let audio = &self.config.audio;
        if block_size < audio.min_block_size || block_size > audio.max_block_size {
            return Err(AudioError::InvalidParameters {
                reason: format!(
                    "block size {} outside [{}, {}]",
                    block_size, audio.min_block_size, audio.max_block_size
                ),
            });
        }
        self.noise
            .get()
            .validate_for_sample_rate(sample_rate)
            .map_err(|err| AudioError::InvalidParameters {
                reason: err.to_string(),
            })?;

        Ok((
            SessionParams {
                device_id: device.id,
                sample_rate,
                block_size,
            },
            device,
        ))
    }

    fn session_context(&self) -> SessionContext {
        SessionContext {
            host: Arc::clone(&self.host),
            factory: Arc::clone(&self.factory),
            store: self.noise.clone(),
            broadcaster: self.broadcasts.clone(),
            telemetry: Arc::clone(&self.telemetry),
            audio: self.config.audio.clone(),
            stream: self.config.stream.clone(),
        }
    }

    /// Transition to Stopped when the worker of the current session dies.
    fn failure_hook(&self) -> FailureHook {
        let lifecycle = Arc::downgrade(&self.lifecycle);
        let status = Arc::downgrade(&self.status);
        let noise = self.noise.clone();
        let telemetry = Arc::clone(&self.telemetry);

        Box::new(move |session_id, err| {
            let (Some(lifecycle), Some(status)) = (lifecycle.upgrade(), status.upgrade()) else {
                return;
            };
            let mut guard = match lifecycle.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if guard.session.as_ref().map(RunningSession::id) != Some(session_id) {
                return;
            }

            log_audio_error(&err, "capture loop");
            guard.session = None;
            guard.state = SessionState::Stopped;
            noise.clear_sample_rate();
            commit_status(&status, EngineStatus::stopped());
            telemetry.publish(TelemetryEventKind::CaptureFailed, Some(err.to_string()));
        })
    }

    /// Stop `session`, parking it as draining if it misses the deadline
    fn release(
        &self,
        lifecycle: &mut Lifecycle,
        session: RunningSession,
    ) -> Result<(), AudioError> {
        match session.stop(self.stop_timeout()) {
            Ok(()) => Ok(()),
            Err(err) => {
                log::warn!(
                    "[EngineHandle] Session {} still holds '{}', draining",
                    session.id(),
                    session.device().name
                );
                lifecycle.draining = Some(session);
                Err(err)
            }
        }
    }

    /// Wait for a draining session to release its device
    fn await_drained(&self, lifecycle: &mut Lifecycle) -> Result<(), AudioError> {
        let Some(draining) = lifecycle.draining.as_ref() else {
            return Ok(());
        };
        draining.stop(self.stop_timeout())?;
        log::info!("[EngineHandle] Session {} drained", draining.id());
        lifecycle.draining = None;
        Ok(())
    }

    fn lock_lifecycle(&self) -> Result<MutexGuard<'_, Lifecycle>, AudioError> {
        self.lifecycle
            .lock()
            .map_err(|_| AudioError::LockPoisoned {
                component: "lifecycle".to_string(),
            })
    }

    fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.config.audio.stop_timeout_ms)
    }
}

fn commit_status(status: &RwLock<EngineStatus>, next: EngineStatus) {
    match status.write() {
        Ok(mut guard) => *guard = next,
        Err(poisoned) => *poisoned.into_inner() = next,
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        let mut lifecycle = match self.lifecycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let sessions = lifecycle.session.take().into_iter().chain(lifecycle.draining.take());
        for session in sessions {
            if let Err(err) = session.stop(self.stop_timeout()) {
                log_audio_error(&err, "drop");
            }
        }
    }
}
