// NoiseFloorCalibration - sample the background level over a bounded window
//
// The procedure collects the post-filter level (dB) of one block per call to
// `observe`. Once the requested number of blocks is in, the median of the
// collected levels is the noise floor. The median keeps a single cough or
// door slam from dragging the estimate up.

use crate::calibration::progress::CalibrationProgress;
use crate::error::CalibrationError;

/// Shortest accepted calibration window in seconds
pub const MIN_CALIBRATION_SECONDS: f32 = 0.25;

/// Longest accepted calibration window in seconds
pub const MAX_CALIBRATION_SECONDS: f32 = 5.0;

/// Reject calibration windows outside 0.25-5.0 seconds
pub fn validate_duration(seconds: f32) -> Result<(), CalibrationError> {
    if !seconds.is_finite()
        || !(MIN_CALIBRATION_SECONDS..=MAX_CALIBRATION_SECONDS).contains(&seconds)
    {
        return Err(CalibrationError::InvalidDuration { seconds });
    }
    Ok(())
}

/// `ceil(seconds * sample_rate / block_size)`, at least one block
pub fn blocks_for(seconds: f32, sample_rate: u32, block_size: usize) -> usize {
    let blocks = (seconds as f64 * sample_rate as f64 / block_size.max(1) as f64).ceil();
    (blocks as usize).max(1)
}

/// Median of a non-empty slice; even lengths average the middle pair
pub fn median(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// One in-progress noise-floor measurement
#[derive(Debug, Clone)]
pub struct NoiseFloorCalibration {
    seconds: f32,
    blocks_needed: usize,
    remaining_blocks: usize,
    collected_db: Vec<f32>,
}

impl NoiseFloorCalibration {
    /// Begin a calibration sized for the session's sample rate and block size
    pub fn begin(
        seconds: f32,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Self, CalibrationError> {
        validate_duration(seconds)?;
        let blocks_needed = blocks_for(seconds, sample_rate, block_size);
        Ok(Self {
            seconds,
            blocks_needed,
            remaining_blocks: blocks_needed,
            collected_db: Vec::with_capacity(blocks_needed),
        })
    }

    pub fn seconds(&self) -> f32 {
        self.seconds
    }

    pub fn remaining_blocks(&self) -> usize {
        self.remaining_blocks
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_blocks == 0
    }

    /// Record one block level; returns the noise floor on the final block
    pub fn observe(&mut self, level_db: f32) -> Option<f32> {
        if self.is_complete() {
            return None;
        }
        self.collected_db.push(level_db);
        self.remaining_blocks -= 1;

        if self.is_complete() {
            median(&self.collected_db)
        } else {
            None
        }
    }

    pub fn progress(&self) -> CalibrationProgress {
        CalibrationProgress {
            blocks_collected: self.collected_db.len(),
            blocks_needed: self.blocks_needed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_bounds() {
        assert!(validate_duration(0.25).is_ok());
        assert!(validate_duration(5.0).is_ok());
        assert!(matches!(
            validate_duration(0.1),
            Err(CalibrationError::InvalidDuration { .. })
        ));
        assert!(validate_duration(5.5).is_err());
        assert!(validate_duration(f32::NAN).is_err());
    }

    #[test]
    fn test_block_count_rounds_up() {
        // 1.0 s at 44.1 kHz with 1024-sample blocks is 43.07 blocks
        assert_eq!(blocks_for(1.0, 44_100, 1024), 44);
        assert_eq!(blocks_for(0.25, 48_000, 12_000), 1);
        assert_eq!(blocks_for(0.25, 8_000, 16_384), 1);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[-60.0]), Some(-60.0));
        assert_eq!(median(&[-50.0, -70.0, -60.0]), Some(-60.0));
        assert_eq!(median(&[-50.0, -70.0, -60.0, -40.0]), Some(-55.0));
    }

    #[test]
    fn test_constant_levels_give_that_level() {
        // 0.5 s at 8 kHz with 1000-sample blocks is exactly 4 blocks
        let mut calibration = NoiseFloorCalibration::begin(0.5, 8_000, 1000).unwrap();
        assert_eq!(calibration.remaining_blocks(), 4);

        for _ in 0..3 {
            assert_eq!(calibration.observe(-63.0), None);
        }
        assert_eq!(calibration.observe(-63.0), Some(-63.0));
        assert!(calibration.is_complete());
        assert_eq!(calibration.observe(-10.0), None);
    }

    #[test]
    fn test_median_rejects_outlier() {
        let mut calibration = NoiseFloorCalibration::begin(0.5, 8_000, 1000).unwrap();
        calibration.observe(-70.0);
        calibration.observe(-10.0);
        calibration.observe(-70.0);
        assert_eq!(calibration.observe(-70.0), Some(-70.0));
    }

    #[test]
    fn test_progress() {
        let mut calibration = NoiseFloorCalibration::begin(0.5, 8_000, 1000).unwrap();
        calibration.observe(-60.0);
        let progress = calibration.progress();
        assert_eq!(progress.blocks_collected, 1);
        assert_eq!(progress.blocks_needed, 4);
        assert!((progress.fraction() - 0.25).abs() < 1e-6);
    }
}
