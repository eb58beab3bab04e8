// Stream Session - one capture binding and its worker thread
//
// The worker thread owns everything bound to the session: the capture
// stream, the block processor (filter state, extractor) and the calibration
// slot. The control plane reaches it only through:
// - `shutdown` flag, checked once per block (reads time out within a block)
// - command queue, drained before every block
// - Config Store and Broadcaster, which are internally synchronised
//
// Startup handshake: the worker builds the processor, opens the device and
// reports success or failure before `spawn` returns, so a session that could
// not open is never visible as running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::analysis::{BlockProcessor, FeatureExtractorFactory, WaveformPreview};
use crate::audio::{AudioHost, CaptureRead, CaptureRequest, CaptureStream, DeviceInfo};
use crate::calibration::{CalibrationController, CalibrationRequest};
use crate::config::{AudioConfig, StreamConfig};
use crate::error::AudioError;
use crate::managers::{BroadcastManager, NoiseConfigManager};
use crate::telemetry::{TelemetryEventKind, TelemetryHub};

/// Upper bound on how long `spawn` waits for the device to open
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Fully resolved session parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionParams {
    pub device_id: usize,
    pub sample_rate: u32,
    pub block_size: usize,
}

impl SessionParams {
    /// Duration of one block
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Commands delivered to the worker between blocks
pub(crate) enum SessionCommand {
    Calibrate(CalibrationRequest),
}

/// Shared collaborators handed to each session
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub host: Arc<dyn AudioHost>,
    pub factory: Arc<dyn FeatureExtractorFactory>,
    pub store: NoiseConfigManager,
    pub broadcaster: BroadcastManager,
    pub telemetry: Arc<TelemetryHub>,
    pub audio: AudioConfig,
    pub stream: StreamConfig,
}

/// Called from the worker thread when capture fails mid-stream
pub(crate) type FailureHook = Box<dyn FnOnce(u64, AudioError) + Send>;

/// Handle on a running worker
pub(crate) struct RunningSession {
    id: u64,
    params: SessionParams,
    device: DeviceInfo,
    shutdown: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    done_rx: std_mpsc::Receiver<()>,
    // Detached on drop
    _worker: JoinHandle<()>,
}

impl RunningSession {
    /// Spawn the worker and wait until the device is open
    pub fn spawn(
        ctx: SessionContext,
        id: u64,
        params: SessionParams,
        on_failure: FailureHook,
    ) -> Result<Self, AudioError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let (done_tx, done_rx) = std_mpsc::channel();

        let worker_shutdown = Arc::clone(&shutdown);
        let worker = std::thread::Builder::new()
            .name(format!("violin-capture-{}", id))
            .spawn(move || {
                let worker = match SessionWorker::open(ctx, id, params, worker_shutdown, command_rx)
                {
                    Ok(worker) => {
                        let _ = ready_tx.send(Ok(worker.stream.device().clone()));
                        worker
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                let failure = worker.run();
                let _ = done_tx.send(());
                if let Some(err) = failure {
                    on_failure(id, err);
                }
            })
            .map_err(|e| AudioError::WorkerSpawnFailed {
                reason: e.to_string(),
            })?;

        let device = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(device)) => device,
            Ok(Err(err)) => {
                let _ = worker.join();
                return Err(err);
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                shutdown.store(true, Ordering::SeqCst);
                return Err(AudioError::DeviceUnavailable {
                    reason: format!(
                        "device {} did not open within {} ms",
                        params.device_id,
                        OPEN_TIMEOUT.as_millis()
                    ),
                });
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                let _ = worker.join();
                return Err(AudioError::WorkerSpawnFailed {
                    reason: "capture worker exited during startup".to_string(),
                });
            }
        };

        Ok(Self {
            id,
            params,
            device,
            shutdown,
            commands,
            done_rx,
            _worker: worker,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn params(&self) -> SessionParams {
        self.params
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Queue a command for the worker; returns it if the worker is gone
    pub fn send(&self, command: SessionCommand) -> Result<(), SessionCommand> {
        self.commands.send(command).map_err(|err| err.0)
    }

    /// Signal the worker and wait for it to release the device
    ///
    /// Waits for the worker's `done` signal rather than joining: after a
    /// capture failure the worker may still be running its failure hook,
    /// which needs the lifecycle lock the caller is holding. On
    /// `StopTimeout` the session still owns its device and `stop` can be
    /// called again.
    pub fn stop(&self, timeout: Duration) -> Result<(), AudioError> {
        self.shutdown.store(true, Ordering::SeqCst);
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => Ok(()),
            Err(std_mpsc::RecvTimeoutError::Timeout) => Err(AudioError::StopTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

impl Drop for RunningSession {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

struct SessionWorker {
    ctx: SessionContext,
    id: u64,
    params: SessionParams,
    shutdown: Arc<AtomicBool>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    stream: Box<dyn CaptureStream>,
    processor: BlockProcessor,
    calibration: CalibrationController,
}

impl SessionWorker {
    fn open(
        ctx: SessionContext,
        id: u64,
        params: SessionParams,
        shutdown: Arc<AtomicBool>,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Result<Self, AudioError> {
        let processor = BlockProcessor::new(
            params.sample_rate,
            params.block_size,
            &ctx.store.get(),
            ctx.factory.as_ref(),
            WaveformPreview::new(ctx.stream.preview_every_n_frames, ctx.stream.preview_points),
        )?;

        let stream = ctx.host.open(&CaptureRequest {
            device_id: Some(params.device_id),
            sample_rate: params.sample_rate,
            block_size: params.block_size,
            buffer_blocks: ctx.audio.buffer_pool_size,
        })?;

        Ok(Self {
            calibration: CalibrationController::new(params.sample_rate, params.block_size),
            ctx,
            id,
            params,
            shutdown,
            commands,
            stream,
            processor,
        })
    }

    /// Run until shutdown or a capture error; returns the error if any
    fn run(mut self) -> Option<AudioError> {
        let span = tracing::info_span!(
            "capture_session",
            id = self.id,
            device = %self.stream.device().name
        );
        let _enter = span.enter();

        let read_timeout = self
            .params
            .block_duration()
            .clamp(Duration::from_millis(1), Duration::from_millis(100));
        let log_every = self.ctx.audio.log_every_n_blocks.max(1);
        let mut block = vec![0.0_f32; self.params.block_size];
        let mut failure = None;

        tracing::info!(
            "[CaptureSession] Running: {} Hz, block {}",
            self.params.sample_rate,
            self.params.block_size
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            self.drain_commands();

            match self.stream.read(&mut block, read_timeout) {
                Ok(CaptureRead::Filled) => {}
                Ok(CaptureRead::TimedOut) => continue,
                Err(err) => {
                    tracing::error!("[CaptureSession] Capture read failed: {}", err);
                    failure = Some(err);
                    break;
                }
            }

            let config = self.ctx.store.get();
            let (frame, outcome) = self.processor.process(&mut block, &config);

            if let Some(completion) = self
                .calibration
                .observe(outcome.metrics.level_db, &self.ctx.store)
            {
                let result = completion.outcome();
                self.ctx.telemetry.publish(
                    TelemetryEventKind::CalibrationCompleted {
                        noise_floor_db: result.noise_floor_db,
                    },
                    Some(format!(
                        "effective gate {:.1} dB",
                        result.config.effective_gate_db()
                    )),
                );
                // Waiters see the event once their ticket resolves
                completion.resolve();
            }

            let seq = frame.seq;
            let report = self.ctx.broadcaster.broadcast(frame);
            for subscriber in report.pruned {
                self.ctx
                    .telemetry
                    .publish(TelemetryEventKind::SubscriberPruned { subscriber }, None);
            }

            if (seq + 1) % log_every == 0 {
                tracing::debug!(
                    "[CaptureSession] block={} level={:.1} dB gated={} subscribers={} extracted={} dropped={}",
                    seq + 1,
                    outcome.metrics.level_db,
                    outcome.gated,
                    self.ctx.broadcaster.len(),
                    self.processor.extractor_invocations(),
                    self.ctx.broadcaster.dropped_frames()
                );
            }
        }

        self.stream.close();
        tracing::info!(
            "[CaptureSession] Exited after {} blocks",
            self.processor.frames()
        );
        // Dropping the worker discards any calibration still in progress
        failure
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                SessionCommand::Calibrate(request) => self.calibration.begin(request),
            }
        }
    }
}
