// TempoEstimator - tempo from the median inter-onset interval

use std::collections::VecDeque;

const MAX_ONSETS: usize = 8;
pub const MIN_BPM: f32 = 40.0;
pub const MAX_BPM: f32 = 240.0;

#[derive(Debug, Default)]
pub struct TempoEstimator {
    onset_times: VecDeque<f64>,
    bpm: f32,
}

impl TempoEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current tempo estimate, 0.0 until two onsets were observed
    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn on_onset(&mut self, time_s: f64) -> f32 {
        if self.onset_times.len() == MAX_ONSETS {
            self.onset_times.pop_front();
        }
        self.onset_times.push_back(time_s);

        let mut intervals: Vec<f64> = self
            .onset_times
            .iter()
            .zip(self.onset_times.iter().skip(1))
            .map(|(a, b)| b - a)
            .filter(|interval| *interval > 0.0)
            .collect();

        if intervals.is_empty() {
            return self.bpm;
        }

        intervals.sort_by(|a, b| a.total_cmp(b));
        let median = intervals[intervals.len() / 2];
        self.bpm = fold_into_range(60.0 / median as f32);
        self.bpm
    }
}

/// Octave-fold a tempo into MIN_BPM..=MAX_BPM
fn fold_into_range(mut bpm: f32) -> f32 {
    if !bpm.is_finite() || bpm <= 0.0 {
        return 0.0;
    }
    while bpm > MAX_BPM {
        bpm /= 2.0;
    }
    while bpm < MIN_BPM {
        bpm *= 2.0;
    }
    bpm
}
