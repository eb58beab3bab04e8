// Violin Trainer Core - Rust Audio Engine
// Real-time capture, noise conditioning and pitch/onset/tempo analysis
// streamed to live subscribers

// Module declarations
pub mod analysis;
pub mod audio;
pub mod calibration;
pub mod config;
pub mod engine;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod managers;
pub mod telemetry;

// Re-exports for convenience
pub use analysis::{AnalysisFrame, NoiseConfig};
pub use config::AppConfig;
pub use engine::{EngineHandle, EngineStatus, SessionState};
pub use error::{AudioError, CalibrationError, ConfigError, ErrorCode};
