// Progress and completion records for noise-floor calibration

use serde::{Deserialize, Serialize};

use crate::analysis::noise::NoiseConfig;

/// How far an active calibration has got
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationProgress {
    pub blocks_collected: usize,
    pub blocks_needed: usize,
}

impl CalibrationProgress {
    /// Completed share in 0..=1
    pub fn fraction(&self) -> f32 {
        if self.blocks_needed == 0 {
            return 1.0;
        }
        (self.blocks_collected as f32 / self.blocks_needed as f32).min(1.0)
    }
}

/// Result of a completed calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    /// Median post-filter level over the calibration window
    pub noise_floor_db: f32,
    /// Number of blocks the median was taken over
    pub blocks: usize,
    /// Config as written back to the store
    pub config: NoiseConfig,
}
