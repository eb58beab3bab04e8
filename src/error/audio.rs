// Audio error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// Single source of truth for the numeric codes reported by the CLI and the
/// HTTP control surface.
///
/// Error code range: 1001-1010
pub struct AudioErrorCodes;

impl AudioErrorCodes {
    /// Capture device could not be opened
    pub const DEVICE_UNAVAILABLE: i32 = 1001;

    /// Start parameters rejected before touching the device
    pub const INVALID_PARAMETERS: i32 = 1002;

    /// Capture failed mid-stream
    pub const CAPTURE_READ_ERROR: i32 = 1003;

    /// No capture session is running
    pub const NOT_RUNNING: i32 = 1004;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1005;

    /// Capture worker did not exit within the stop timeout
    pub const STOP_TIMEOUT: i32 = 1006;

    /// Capture worker thread could not be spawned
    pub const WORKER_SPAWN_FAILED: i32 = 1007;

    /// Session state machine rejected a transition
    pub const INVALID_TRANSITION: i32 = 1008;

    /// Device list could not be queried
    pub const DEVICE_ENUMERATION_FAILED: i32 = 1009;

    /// Feature extractor could not be built for the session
    pub const EXTRACTOR_INIT_FAILED: i32 = 1010;
}

/// Log an audio error with structured context
///
/// This function logs audio errors with structured fields including:
/// - error_code: Numeric error code for programmatic handling
/// - component: The component where the error occurred
/// - message: Human-readable error message
/// - context: Additional contextual information
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=StreamEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-related errors
///
/// These errors cover capture session lifecycle, device access and the
/// per-block capture loop.
///
/// Error code range: 1001-1010
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Capture device could not be opened
    DeviceUnavailable { reason: String },

    /// Start parameters are invalid (sample rate, block size, device id)
    InvalidParameters { reason: String },

    /// Capture read failed while the session was running
    CaptureReadError { reason: String },

    /// No capture session is running
    NotRunning,

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Capture worker did not exit within the stop timeout
    StopTimeout { timeout_ms: u64 },

    /// Capture worker thread could not be spawned
    WorkerSpawnFailed { reason: String },

    /// Session state machine rejected a transition
    InvalidTransition { from: String, to: String },

    /// Device list could not be queried
    DeviceEnumerationFailed { reason: String },

    /// Feature extractor could not be built for the session parameters
    ExtractorInitFailed { reason: String },
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::DeviceUnavailable { .. } => AudioErrorCodes::DEVICE_UNAVAILABLE,
            AudioError::InvalidParameters { .. } => AudioErrorCodes::INVALID_PARAMETERS,
            AudioError::CaptureReadError { .. } => AudioErrorCodes::CAPTURE_READ_ERROR,
            AudioError::NotRunning => AudioErrorCodes::NOT_RUNNING,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
            AudioError::StopTimeout { .. } => AudioErrorCodes::STOP_TIMEOUT,
            AudioError::WorkerSpawnFailed { .. } => AudioErrorCodes::WORKER_SPAWN_FAILED,
            AudioError::InvalidTransition { .. } => AudioErrorCodes::INVALID_TRANSITION,
            AudioError::DeviceEnumerationFailed { .. } => {
                AudioErrorCodes::DEVICE_ENUMERATION_FAILED
            }
            AudioError::ExtractorInitFailed { .. } => AudioErrorCodes::EXTRACTOR_INIT_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::DeviceUnavailable { reason } => {
                format!("Capture device unavailable: {}", reason)
            }
            AudioError::InvalidParameters { reason } => {
                format!("Invalid stream parameters: {}", reason)
            }
            AudioError::CaptureReadError { reason } => {
                format!("Capture read failed: {}", reason)
            }
            AudioError::NotRunning => {
                "Capture session not running. Call start() first.".to_string()
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            AudioError::StopTimeout { timeout_ms } => {
                format!("Capture worker did not stop within {} ms", timeout_ms)
            }
            AudioError::WorkerSpawnFailed { reason } => {
                format!("Failed to spawn capture worker: {}", reason)
            }
            AudioError::InvalidTransition { from, to } => {
                format!("Invalid session transition {} -> {}", from, to)
            }
            AudioError::DeviceEnumerationFailed { reason } => {
                format!("Failed to enumerate input devices: {}", reason)
            }
            AudioError::ExtractorInitFailed { reason } => {
                format!("Failed to build feature extractor: {}", reason)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

/// Convert from std::io::Error to AudioError
impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::CaptureReadError {
            reason: err.to_string(),
        }
    }
}
