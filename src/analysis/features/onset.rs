// OnsetDetector - causal spectral-flux onset detection, one decision per block
//
// Algorithm:
// 1. Hann-windowed FFT over the most recent `fft_size` samples
// 2. Magnitude spectrum normalised by fft_size / 2
// 3. Spectral flux: sum over bins of max(0, |X_t[k]| - |X_(t-1)[k]|)
// 4. Adaptive threshold: median(recent flux) * ratio + offset
// 5. Onset when flux exceeds the threshold, rises over the previous block's
//    flux and the minimum inter-onset gap has elapsed

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::Arc;

pub const DEFAULT_ONSET_FFT_SIZE: usize = 1024;

const FLUX_HISTORY: usize = 16;
const THRESHOLD_RATIO: f32 = 1.5;
const THRESHOLD_OFFSET: f32 = 0.01;
const MIN_GAP_SECONDS: f64 = 0.05;

pub struct OnsetDetector {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    window: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    prev_spectrum: Vec<f32>,
    flux_history: VecDeque<f32>,
    last_flux: f32,
    last_onset_s: Option<f64>,
}

impl OnsetDetector {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let fft = FftPlanner::new().plan_fft_forward(fft_size);

        // Hann window reduces spectral leakage between frames
        let window = (0..fft_size)
            .map(|i| {
                0.5 * (1.0
                    - ((2.0 * std::f32::consts::PI * i as f32) / (fft_size as f32 - 1.0)).cos())
            })
            .collect();

        Self {
            fft,
            fft_size,
            window,
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            prev_spectrum: vec![0.0; fft_size / 2 + 1],
            flux_history: VecDeque::with_capacity(FLUX_HISTORY),
            last_flux: 0.0,
            last_onset_s: None,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn last_flux(&self) -> f32 {
        self.last_flux
    }

    /// Record a block of silence without analysing it
    ///
    /// The next sounding block is compared against an empty spectrum.
    pub fn observe_silence(&mut self) {
        self.prev_spectrum.fill(0.0);
        self.last_flux = 0.0;
    }

    /// Analyse the tail of `history` (at least `fft_size` samples)
    ///
    /// `now_s` is the stream time of the newest sample and is used for the
    /// minimum inter-onset gap.
    pub fn process(&mut self, history: &[f32], now_s: f64) -> bool {
        if history.len() < self.fft_size {
            return false;
        }
        let frame = &history[history.len() - self.fft_size..];

        let flux = self.compute_flux(frame);
        let threshold = self.adaptive_threshold();
        let rising = flux > self.last_flux;
        let gap_ok = self
            .last_onset_s
            .map(|last| now_s - last >= MIN_GAP_SECONDS)
            .unwrap_or(true);

        let onset = flux > threshold && rising && gap_ok;
        if onset {
            self.last_onset_s = Some(now_s);
        }

        if self.flux_history.len() == FLUX_HISTORY {
            self.flux_history.pop_front();
        }
        self.flux_history.push_back(flux);
        self.last_flux = flux;

        onset
    }

    fn compute_flux(&mut self, frame: &[f32]) -> f32 {
        for ((slot, sample), w) in self.scratch.iter_mut().zip(frame).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.scratch);

        let scale = 2.0 / self.fft_size as f32;
        let mut flux = 0.0f32;
        for (bin, prev) in self.scratch[..self.fft_size / 2 + 1]
            .iter()
            .zip(self.prev_spectrum.iter_mut())
        {
            let magnitude = bin.norm() * scale;
            flux += (magnitude - *prev).max(0.0);
            *prev = magnitude;
        }
        flux
    }

    fn adaptive_threshold(&self) -> f32 {
        if self.flux_history.is_empty() {
            return THRESHOLD_OFFSET;
        }
        let mut sorted: Vec<f32> = self.flux_history.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        sorted[sorted.len() / 2] * THRESHOLD_RATIO + THRESHOLD_OFFSET
    }
}
