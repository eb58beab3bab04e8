// YinPitchDetector - monophonic pitch estimation over a sliding window
//
// Algorithm (de Cheveigné & Kawahara, 2002):
// 1. Difference function d(tau) = sum_j (x[j] - x[j + tau])^2
// 2. Cumulative mean normalized difference d'(tau)
// 3. First tau in range whose d'(tau) drops below the absolute threshold,
//    walked down to its local minimum
// 4. Parabolic interpolation around that minimum for sub-sample accuracy
//
// Windows quieter than the silence threshold report no pitch.

use crate::analysis::noise::{rms, rms_to_db};

/// YIN absolute threshold
pub const DEFAULT_YIN_THRESHOLD: f32 = 0.15;

/// Windows below this level (dBFS) are treated as unpitched
pub const DEFAULT_SILENCE_DB: f32 = -40.0;

pub struct YinPitchDetector {
    sample_rate: u32,
    min_freq: f32,
    max_freq: f32,
    threshold: f32,
    silence_db: f32,
    difference: Vec<f32>,
    cumulative_mean: Vec<f32>,
}

impl YinPitchDetector {
    /// Detector covering 40-2000 Hz, enough for the violin family and voice
    pub fn new(sample_rate: u32, window_size: usize) -> Self {
        Self::with_range(sample_rate, window_size, 40.0, 2000.0)
    }

    pub fn with_range(sample_rate: u32, window_size: usize, min_freq: f32, max_freq: f32) -> Self {
        let max_lag = window_size / 2;
        Self {
            sample_rate,
            min_freq,
            max_freq,
            threshold: DEFAULT_YIN_THRESHOLD,
            silence_db: DEFAULT_SILENCE_DB,
            difference: vec![0.0; max_lag + 1],
            cumulative_mean: vec![0.0; max_lag + 1],
        }
    }

    pub fn set_silence_db(&mut self, silence_db: f32) {
        self.silence_db = silence_db;
    }

    /// Estimate the fundamental of `window` in Hz, or 0.0 when unpitched
    pub fn detect(&mut self, window: &[f32]) -> f32 {
        if rms_to_db(rms(window)) < self.silence_db {
            return 0.0;
        }

        let half = window.len() / 2;
        let min_lag = ((self.sample_rate as f32 / self.max_freq) as usize).max(2);
        let max_lag = ((self.sample_rate as f32 / self.min_freq) as usize)
            .min(half)
            .min(self.difference.len() - 1);

        if max_lag <= min_lag + 1 {
            return 0.0;
        }

        self.compute_difference(window, half, max_lag);
        self.compute_cumulative_mean(max_lag);

        match self.find_period(min_lag, max_lag) {
            Some(lag) => {
                let refined = self.parabolic_interpolation(lag, max_lag);
                if refined > 0.0 {
                    (self.sample_rate as f64 / refined) as f32
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    fn compute_difference(&mut self, window: &[f32], integration: usize, max_lag: usize) {
        self.difference[0] = 0.0;
        for lag in 1..=max_lag {
            let mut sum = 0.0f64;
            for j in 0..integration {
                let delta = (window[j] - window[j + lag]) as f64;
                sum += delta * delta;
            }
            self.difference[lag] = sum as f32;
        }
    }

    fn compute_cumulative_mean(&mut self, max_lag: usize) {
        self.cumulative_mean[0] = 1.0;
        let mut running_sum = 0.0f32;
        for lag in 1..=max_lag {
            running_sum += self.difference[lag];
            self.cumulative_mean[lag] = if running_sum > 1e-10 {
                self.difference[lag] * lag as f32 / running_sum
            } else {
                1.0
            };
        }
    }

    /// First dip below threshold; the first one avoids octave-down errors
    fn find_period(&self, min_lag: usize, max_lag: usize) -> Option<usize> {
        let mut lag = min_lag;
        while lag < max_lag {
            if self.cumulative_mean[lag] < self.threshold {
                while lag + 1 < max_lag
                    && self.cumulative_mean[lag + 1] < self.cumulative_mean[lag]
                {
                    lag += 1;
                }
                return Some(lag);
            }
            lag += 1;
        }
        None
    }

    fn parabolic_interpolation(&self, lag: usize, max_lag: usize) -> f64 {
        if lag < 1 || lag >= max_lag {
            return lag as f64;
        }
        let s0 = self.cumulative_mean[lag - 1] as f64;
        let s1 = self.cumulative_mean[lag] as f64;
        let s2 = self.cumulative_mean[lag + 1] as f64;
        let denominator = 2.0 * (2.0 * s1 - s2 - s0);
        if denominator.abs() > 1e-10 {
            lag as f64 + (s2 - s0) / denominator
        } else {
            lag as f64
        }
    }
}
