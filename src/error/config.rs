// Noise configuration error types

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Noise configuration error code constants
///
/// Error code range: 3001-3004
pub struct ConfigErrorCodes;

impl ConfigErrorCodes {
    pub const INVALID_CUTOFF: i32 = 3001;
    pub const NON_FINITE_VALUE: i32 = 3002;
    pub const INVALID_MARGIN: i32 = 3003;
    pub const CUTOFF_ABOVE_NYQUIST: i32 = 3004;
}

/// Log a configuration error with structured context
pub fn log_config_error(err: &ConfigError, context: &str) {
    error!(
        "Config error in {}: code={}, component=NoiseConfigStore, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Rejections raised before a noise configuration replaces the current one
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// High-pass cutoff must be strictly positive
    InvalidCutoff { cutoff_hz: f32 },

    /// A numeric field is NaN or infinite
    NonFiniteValue { field: &'static str },

    /// Gate margin must not be negative
    InvalidMargin { margin_db: f32 },

    /// Cutoff is not below the Nyquist frequency of the running session
    CutoffAboveNyquist { cutoff_hz: f32, sample_rate: u32 },
}

impl ErrorCode for ConfigError {
    fn code(&self) -> i32 {
        match self {
            ConfigError::InvalidCutoff { .. } => ConfigErrorCodes::INVALID_CUTOFF,
            ConfigError::NonFiniteValue { .. } => ConfigErrorCodes::NON_FINITE_VALUE,
            ConfigError::InvalidMargin { .. } => ConfigErrorCodes::INVALID_MARGIN,
            ConfigError::CutoffAboveNyquist { .. } => ConfigErrorCodes::CUTOFF_ABOVE_NYQUIST,
        }
    }

    fn message(&self) -> String {
        match self {
            ConfigError::InvalidCutoff { cutoff_hz } => {
                format!("High-pass cutoff must be > 0 Hz (got {})", cutoff_hz)
            }
            ConfigError::NonFiniteValue { field } => {
                format!("Field {} must be a finite number", field)
            }
            ConfigError::InvalidMargin { margin_db } => {
                format!("Gate margin must be >= 0 dB (got {})", margin_db)
            }
            ConfigError::CutoffAboveNyquist {
                cutoff_hz,
                sample_rate,
            } => {
                format!(
                    "High-pass cutoff {} Hz is not below Nyquist for {} Hz",
                    cutoff_hz, sample_rate
                )
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConfigError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ConfigError {}
