// Noise conditioning - high-pass filtering, level metering and gating
//
// Each captured block is measured before and after an optional first-order
// high-pass filter. The post-filter level drives the gate decision and feeds
// noise-floor calibration.
//
// Filter recurrence (per sample):
//   y[n] = alpha * (y[n-1] + x[n] - x[n-1])
//   alpha = rc / (rc + dt), rc = 1 / (2*pi*fc), dt = 1 / sample_rate
//
// Filter state carries across block boundaries.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Added to the RMS before taking the logarithm so silence maps to a finite dB
pub const LEVEL_EPSILON: f64 = 1e-12;

/// Level (dBFS) that maps to a normalized level of 0.0
pub const NORMALIZED_FLOOR_DB: f32 = -60.0;

/// Noise conditioning settings shared between the control plane and the loop
///
/// Wire names follow the control surface (`gate_db`, `hp_enabled`,
/// `hp_cut_hz`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Master switch for the gate
    pub enabled: bool,
    /// Fixed gate threshold used when `adaptive` is off
    #[serde(rename = "gate_db")]
    pub gate_threshold_db: f32,
    #[serde(rename = "hp_enabled")]
    pub high_pass_enabled: bool,
    #[serde(rename = "hp_cut_hz")]
    pub high_pass_cutoff_hz: f32,
    /// Headroom above the noise floor for the adaptive gate
    pub margin_db: f32,
    pub adaptive: bool,
    /// Last calibrated background level
    pub noise_floor_db: f32,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gate_threshold_db: -50.0,
            high_pass_enabled: true,
            high_pass_cutoff_hz: 80.0,
            margin_db: 6.0,
            adaptive: false,
            noise_floor_db: -70.0,
        }
    }
}

impl NoiseConfig {
    /// Threshold the gate compares the post-filter level against
    pub fn effective_gate_db(&self) -> f32 {
        if self.adaptive {
            self.noise_floor_db + self.margin_db
        } else {
            self.gate_threshold_db
        }
    }

    /// Reject configurations that cannot drive the conditioner
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("gate_db", self.gate_threshold_db),
            ("hp_cut_hz", self.high_pass_cutoff_hz),
            ("margin_db", self.margin_db),
            ("noise_floor_db", self.noise_floor_db),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(ConfigError::NonFiniteValue { field });
            }
        }

        if self.high_pass_cutoff_hz <= 0.0 {
            return Err(ConfigError::InvalidCutoff {
                cutoff_hz: self.high_pass_cutoff_hz,
            });
        }

        if self.margin_db < 0.0 {
            return Err(ConfigError::InvalidMargin {
                margin_db: self.margin_db,
            });
        }

        Ok(())
    }

    /// Validate against the sample rate of a running session
    pub fn validate_for_sample_rate(&self, sample_rate: u32) -> Result<(), ConfigError> {
        self.validate()?;
        if self.high_pass_cutoff_hz >= sample_rate as f32 / 2.0 {
            return Err(ConfigError::CutoffAboveNyquist {
                cutoff_hz: self.high_pass_cutoff_hz,
                sample_rate,
            });
        }
        Ok(())
    }

    /// Apply a calibrated noise floor
    ///
    /// With the adaptive gate on, the fixed threshold is moved to the derived
    /// one as well so that turning adaptive off keeps the calibrated gate.
    pub fn with_noise_floor(mut self, noise_floor_db: f32) -> Self {
        self.noise_floor_db = noise_floor_db;
        if self.adaptive {
            self.gate_threshold_db = noise_floor_db + self.margin_db;
        }
        self
    }
}

/// Root-mean-square of a block
pub fn rms(block: &[f32]) -> f64 {
    if block.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = block
        .iter()
        .map(|&sample| (sample as f64) * (sample as f64))
        .sum();
    (sum_squares / block.len() as f64).sqrt()
}

/// RMS to dBFS, `20 * log10(rms + eps)`
pub fn rms_to_db(rms: f64) -> f32 {
    (20.0 * (rms + LEVEL_EPSILON).log10()) as f32
}

/// Map dBFS onto 0..1 with -60 dB -> 0 and 0 dB -> 1
pub fn normalized_level(level_db: f32) -> f32 {
    ((level_db - NORMALIZED_FLOOR_DB) / -NORMALIZED_FLOOR_DB).clamp(0.0, 1.0)
}

/// First-order high-pass filter state
#[derive(Debug, Clone)]
pub struct HighPassFilter {
    previous_input: f32,
    previous_output: f32,
    alpha: f32,
    cutoff_hz: f32,
    sample_rate: u32,
}

impl HighPassFilter {
    pub fn new(cutoff_hz: f32, sample_rate: u32) -> Self {
        Self {
            previous_input: 0.0,
            previous_output: 0.0,
            alpha: Self::alpha_for(cutoff_hz, sample_rate),
            cutoff_hz,
            sample_rate,
        }
    }

    /// `alpha = rc / (rc + dt)`
    pub fn alpha_for(cutoff_hz: f32, sample_rate: u32) -> f32 {
        let rc = 1.0 / (2.0 * std::f64::consts::PI * cutoff_hz as f64);
        let dt = 1.0 / sample_rate.max(1) as f64;
        (rc / (rc + dt)) as f32
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn cutoff_hz(&self) -> f32 {
        self.cutoff_hz
    }

    /// Recompute the coefficient if cutoff or sample rate changed
    ///
    /// Sample history is kept so the output stays continuous.
    pub fn retune(&mut self, cutoff_hz: f32, sample_rate: u32) -> bool {
        if cutoff_hz == self.cutoff_hz && sample_rate == self.sample_rate {
            return false;
        }
        self.cutoff_hz = cutoff_hz;
        self.sample_rate = sample_rate;
        self.alpha = Self::alpha_for(cutoff_hz, sample_rate);
        true
    }

    pub fn process_in_place(&mut self, block: &mut [f32]) {
        let alpha = self.alpha;
        let mut prev_in = self.previous_input;
        let mut prev_out = self.previous_output;
        for sample in block.iter_mut() {
            let x = *sample;
            let y = alpha * (prev_out + x - prev_in);
            prev_in = x;
            prev_out = y;
            *sample = y;
        }
        self.previous_input = prev_in;
        self.previous_output = prev_out;
    }

    /// Track input while bypassed so re-enabling does not start with a step
    pub fn observe_bypassed(&mut self, block: &[f32]) {
        if let Some(&last) = block.last() {
            self.previous_input = last;
            self.previous_output = 0.0;
        }
    }

    pub fn reset(&mut self) {
        self.previous_input = 0.0;
        self.previous_output = 0.0;
    }
}

/// Level measurements for one block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelMetrics {
    /// RMS before the high-pass filter
    pub raw_rms: f64,
    pub raw_level_db: f32,
    /// RMS after the high-pass filter
    pub rms: f64,
    pub level_db: f32,
    pub normalized_level: f32,
}

/// Result of conditioning one block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditioningOutcome {
    pub metrics: LevelMetrics,
    pub gated: bool,
    pub effective_gate_db: f32,
}

/// Per-session noise conditioner
///
/// Owns the filter state for one capture binding; rebuilt when the session's
/// sample rate changes.
pub struct NoiseConditioner {
    filter: HighPassFilter,
    sample_rate: u32,
}

impl NoiseConditioner {
    pub fn new(sample_rate: u32, config: &NoiseConfig) -> Self {
        Self {
            filter: HighPassFilter::new(config.high_pass_cutoff_hz, sample_rate),
            sample_rate,
        }
    }

    pub fn filter(&self) -> &HighPassFilter {
        &self.filter
    }

    /// Condition `block` in place and decide whether it is gated
    pub fn process(&mut self, block: &mut [f32], config: &NoiseConfig) -> ConditioningOutcome {
        let raw_rms = rms(block);
        let raw_level_db = rms_to_db(raw_rms);

        let post_rms = if config.high_pass_enabled {
            self.filter
                .retune(config.high_pass_cutoff_hz, self.sample_rate);
            self.filter.process_in_place(block);
            rms(block)
        } else {
            self.filter.observe_bypassed(block);
            raw_rms
        };
        let level_db = rms_to_db(post_rms);

        let effective_gate_db = config.effective_gate_db();
        let gated = config.enabled && level_db < effective_gate_db;

        ConditioningOutcome {
            metrics: LevelMetrics {
                raw_rms,
                raw_level_db,
                rms: post_rms,
                level_db,
                normalized_level: normalized_level(level_db),
            },
            gated,
            effective_gate_db,
        }
    }
}
