// Calibration error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Calibration error code constants
///
/// Error code range: 2001-2004
pub struct CalibrationErrorCodes;

impl CalibrationErrorCodes {
    /// Requested calibration window outside 0.25-5.0 seconds
    pub const INVALID_DURATION: i32 = 2001;

    /// Calibration needs a running capture session
    pub const NO_ACTIVE_SESSION: i32 = 2002;

    /// A newer calibration or a stop discarded this one
    pub const SUPERSEDED: i32 = 2003;

    /// Calibration did not finish in time
    pub const TIMEOUT: i32 = 2004;
}

/// Log a calibration error with structured context
pub fn log_calibration_error(err: &CalibrationError, context: &str) {
    error!(
        "Calibration error in {}: code={}, component=NoiseFloorCalibration, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Noise-floor calibration errors
///
/// Error code range: 2001-2004
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Requested duration is outside the accepted window
    InvalidDuration { seconds: f32 },

    /// No running capture session to calibrate against
    NoActiveSession,

    /// Calibration was restarted or its session stopped before completion
    Superseded,

    /// Calibration did not complete before the caller's deadline
    Timeout { reason: String },
}

impl ErrorCode for CalibrationError {
    fn code(&self) -> i32 {
        match self {
            CalibrationError::InvalidDuration { .. } => CalibrationErrorCodes::INVALID_DURATION,
            CalibrationError::NoActiveSession => CalibrationErrorCodes::NO_ACTIVE_SESSION,
            CalibrationError::Superseded => CalibrationErrorCodes::SUPERSEDED,
            CalibrationError::Timeout { .. } => CalibrationErrorCodes::TIMEOUT,
        }
    }

    fn message(&self) -> String {
        match self {
            CalibrationError::InvalidDuration { seconds } => {
                format!(
                    "Calibration duration must be within 0.25-5.0 s (got {})",
                    seconds
                )
            }
            CalibrationError::NoActiveSession => {
                "No capture session running; start audio before calibrating".to_string()
            }
            CalibrationError::Superseded => {
                "Calibration was superseded before it completed".to_string()
            }
            CalibrationError::Timeout { reason } => {
                format!("Calibration timed out: {}", reason)
            }
        }
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CalibrationError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CalibrationError {}
