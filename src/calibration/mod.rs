// Calibration module - noise-floor measurement for the adaptive gate
//
// 1. NoiseFloorCalibration: collects block levels and takes their median
// 2. CalibrationController: the session-owned slot that runs one calibration
//    at a time and writes the result into the Config Store
// 3. CalibrationTicket: lets the caller await completion

pub mod controller;
pub mod procedure;
pub mod progress;

pub use controller::{
    CalibrationCompletion, CalibrationController, CalibrationRequest, CalibrationTicket,
};
pub use procedure::{
    validate_duration, NoiseFloorCalibration, MAX_CALIBRATION_SECONDS, MIN_CALIBRATION_SECONDS,
};
pub use progress::{CalibrationOutcome, CalibrationProgress};
