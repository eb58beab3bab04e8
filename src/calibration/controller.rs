// CalibrationController - loop-owned calibration slot
//
// Lives inside the capture worker, so only the running session ever touches
// calibration state. Requests arrive from the control plane as
// `CalibrationRequest`s carrying a oneshot reply; the caller holds the
// matching `CalibrationTicket`.
//
// At most one calibration is active. A new request supersedes the current
// one (its partial data is discarded and its ticket resolves to
// `Superseded`); dropping the controller on stop does the same.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::calibration::procedure::NoiseFloorCalibration;
use crate::calibration::progress::{CalibrationOutcome, CalibrationProgress};
use crate::error::{log_calibration_error, CalibrationError};
use crate::managers::NoiseConfigManager;

type Reply = oneshot::Sender<Result<CalibrationOutcome, CalibrationError>>;

/// Control-plane request to start a calibration
pub struct CalibrationRequest {
    pub seconds: f32,
    reply: Reply,
}

impl CalibrationRequest {
    /// Build a request and the ticket that observes its completion
    pub fn new(seconds: f32) -> (Self, CalibrationTicket) {
        let (reply, rx) = oneshot::channel();
        (Self { seconds, reply }, CalibrationTicket { seconds, rx })
    }

    /// Resolve the ticket without running the calibration
    pub fn reject(self, err: CalibrationError) {
        let _ = self.reply.send(Err(err));
    }
}

/// Handle on a pending calibration
pub struct CalibrationTicket {
    seconds: f32,
    rx: oneshot::Receiver<Result<CalibrationOutcome, CalibrationError>>,
}

impl CalibrationTicket {
    /// Requested calibration window
    pub fn seconds(&self) -> f32 {
        self.seconds
    }

    /// Wait for the calibration to finish
    pub async fn wait(self) -> Result<CalibrationOutcome, CalibrationError> {
        match self.rx.await {
            Ok(result) => result,
            // Reply dropped without an answer: the session went away
            Err(_) => Err(CalibrationError::Superseded),
        }
    }

    /// Wait at most `timeout` for the calibration to finish
    pub async fn wait_timeout(
        self,
        timeout: Duration,
    ) -> Result<CalibrationOutcome, CalibrationError> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => {
                let err = CalibrationError::Timeout {
                    reason: format!("no result within {} ms", timeout.as_millis()),
                };
                log_calibration_error(&err, "wait_timeout");
                Err(err)
            }
        }
    }

    /// Blocking wait for callers outside an async runtime
    pub fn blocking_wait(self) -> Result<CalibrationOutcome, CalibrationError> {
        match self.rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(CalibrationError::Superseded),
        }
    }
}

struct ActiveCalibration {
    procedure: NoiseFloorCalibration,
    reply: Reply,
}

/// Calibration slot owned by one capture session
pub struct CalibrationController {
    sample_rate: u32,
    block_size: usize,
    active: Option<ActiveCalibration>,
}

impl CalibrationController {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn progress(&self) -> Option<CalibrationProgress> {
        self.active.as_ref().map(|active| active.procedure.progress())
    }

    /// Start a calibration, superseding any calibration in progress
    pub fn begin(&mut self, request: CalibrationRequest) {
        let procedure =
            match NoiseFloorCalibration::begin(request.seconds, self.sample_rate, self.block_size)
            {
                Ok(procedure) => procedure,
                Err(err) => {
                    log_calibration_error(&err, "begin");
                    request.reject(err);
                    return;
                }
            };

        if let Some(previous) = self.active.take() {
            log::info!(
                "[CalibrationController] Restarting calibration, discarding {} collected blocks",
                previous.procedure.progress().blocks_collected
            );
            let _ = previous.reply.send(Err(CalibrationError::Superseded));
        }

        log::info!(
            "[CalibrationController] Calibrating noise floor over {:.2}s ({} blocks)",
            request.seconds,
            procedure.remaining_blocks()
        );
        self.active = Some(ActiveCalibration {
            procedure,
            reply: request.reply,
        });
    }

    /// Feed one block's post-filter level
    ///
    /// On the final block the median is written to `store` and a completion
    /// is returned. The waiting ticket resolves when the completion is
    /// resolved or dropped, so the caller can publish first.
    pub fn observe(
        &mut self,
        level_db: f32,
        store: &NoiseConfigManager,
    ) -> Option<CalibrationCompletion> {
        let active = self.active.as_mut()?;
        let noise_floor_db = active.procedure.observe(level_db)?;
        let active = self.active.take()?;

        let config = store.apply_noise_floor(noise_floor_db);
        let outcome = CalibrationOutcome {
            noise_floor_db,
            blocks: active.procedure.progress().blocks_collected,
            config,
        };
        log::info!(
            "[CalibrationController] Noise floor {:.1} dB over {} blocks, effective gate {:.1} dB",
            noise_floor_db,
            outcome.blocks,
            config.effective_gate_db()
        );
        Some(CalibrationCompletion {
            outcome,
            reply: Some(active.reply),
        })
    }
}

/// Finished calibration whose ticket has not been answered yet
pub struct CalibrationCompletion {
    outcome: CalibrationOutcome,
    reply: Option<Reply>,
}

impl CalibrationCompletion {
    pub fn outcome(&self) -> &CalibrationOutcome {
        &self.outcome
    }

    /// Answer the ticket
    pub fn resolve(mut self) -> CalibrationOutcome {
        self.send();
        self.outcome.clone()
    }

    fn send(&mut self) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Ok(self.outcome.clone()));
        }
    }
}

impl Drop for CalibrationCompletion {
    fn drop(&mut self) {
        self.send();
    }
}

impl Drop for CalibrationController {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            log::info!("[CalibrationController] Session ended, discarding active calibration");
            let _ = active.reply.send(Err(CalibrationError::Superseded));
        }
    }
}
