//! Telemetry event types published by the engine to CLI/HTTP surfaces.

use serde::{Deserialize, Serialize};

/// Telemetry event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryEvent {
    /// Milliseconds since the engine was created
    pub timestamp_ms: u64,
    pub kind: TelemetryEventKind,
    pub detail: Option<String>,
}

/// Types of telemetry events supported by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEventKind {
    EngineStarted {
        device: String,
        sample_rate: u32,
        block_size: usize,
    },
    EngineStopped,
    DeviceSwitched {
        device: String,
        sample_rate: u32,
        block_size: usize,
    },
    CaptureFailed,
    CalibrationCompleted {
        noise_floor_db: f32,
    },
    NoiseConfigChanged,
    SubscriberPruned {
        subscriber: u64,
    },
    Warning,
}
