//! Feature extraction adapter: pitch, onset and tempo per block.
//!
//! The pipeline consumes extraction through the [`FeatureExtractor`] trait so
//! the estimator is replaceable. A fresh extractor is built through a
//! [`FeatureExtractorFactory`] whenever a session starts with a new sample
//! rate or block size; extractor state is never resized in place.

pub mod onset;
pub mod pitch;
pub mod tempo;

use crate::analysis::note::{hz_to_note, NoteReading};
use crate::error::AudioError;

use onset::{OnsetDetector, DEFAULT_ONSET_FFT_SIZE};
use pitch::YinPitchDetector;
use tempo::TempoEstimator;

/// Sliding analysis window used by the default pitch estimator
pub const DEFAULT_PITCH_WINDOW: usize = 2048;

/// Raw per-block estimates returned by an extractor
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BlockFeatures {
    /// Fundamental in Hz; `<= 0` means no determinate pitch
    pub pitch_hz: f32,
    pub onset: bool,
    pub tempo_bpm: f32,
}

/// Per-session pitch/onset/tempo estimator
pub trait FeatureExtractor: Send {
    fn extract(&mut self, block: &[f32]) -> BlockFeatures;

    /// Account for `samples` of stream time that were gated away
    ///
    /// Extractors that keep a clock (onset gaps, tempo) must advance it here.
    fn skip(&mut self, _samples: usize) {}
}

/// Builds an extractor for one `(sample_rate, block_size)` binding
pub trait FeatureExtractorFactory: Send + Sync {
    fn create(
        &self,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Box<dyn FeatureExtractor>, AudioError>;
}

/// Features after sanitising and note mapping
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFeatures {
    pub pitch_hz: f32,
    pub note: Option<NoteReading>,
    pub onset: bool,
    pub tempo_bpm: f32,
}

/// Stable per-block contract over an arbitrary extractor
pub struct FeatureAdapter {
    extractor: Box<dyn FeatureExtractor>,
    sample_rate: u32,
    block_size: usize,
    invocations: u64,
}

impl FeatureAdapter {
    pub fn new(
        factory: &dyn FeatureExtractorFactory,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Self, AudioError> {
        let extractor = factory.create(sample_rate, block_size)?;
        Ok(Self {
            extractor,
            sample_rate,
            block_size,
            invocations: 0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks handed to the extractor so far
    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    /// Advance the extractor's clock over a gated block
    pub fn skip(&mut self, samples: usize) {
        self.extractor.skip(samples);
    }

    pub fn extract(&mut self, block: &[f32]) -> ExtractedFeatures {
        self.invocations += 1;
        let raw = self.extractor.extract(block);

        let pitch_hz = if raw.pitch_hz.is_finite() && raw.pitch_hz > 0.0 {
            raw.pitch_hz
        } else {
            0.0
        };
        let tempo_bpm = if raw.tempo_bpm.is_finite() && raw.tempo_bpm > 0.0 {
            raw.tempo_bpm
        } else {
            0.0
        };

        ExtractedFeatures {
            pitch_hz,
            note: hz_to_note(pitch_hz),
            onset: raw.onset,
            tempo_bpm,
        }
    }
}

/// YIN pitch + spectral-flux onset + onset-interval tempo
pub struct DefaultFeatureExtractor {
    sample_rate: u32,
    history: Vec<f32>,
    samples_seen: u64,
    pitch: YinPitchDetector,
    onset: OnsetDetector,
    tempo: TempoEstimator,
}

impl DefaultFeatureExtractor {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        let window = DEFAULT_PITCH_WINDOW.max(block_size);
        Self {
            sample_rate,
            history: vec![0.0; window],
            samples_seen: 0,
            pitch: YinPitchDetector::new(sample_rate, window),
            onset: OnsetDetector::new(DEFAULT_ONSET_FFT_SIZE.min(window)),
            tempo: TempoEstimator::new(),
        }
    }

    /// Slide the newest block into the analysis window
    fn push_history(&mut self, block: &[f32]) {
        let window = self.history.len();
        if block.len() >= window {
            self.history
                .copy_from_slice(&block[block.len() - window..]);
        } else {
            self.history.copy_within(block.len().., 0);
            self.history[window - block.len()..].copy_from_slice(block);
        }
        self.samples_seen += block.len() as u64;
    }

    fn now_s(&self) -> f64 {
        self.samples_seen as f64 / self.sample_rate.max(1) as f64
    }
}

impl FeatureExtractor for DefaultFeatureExtractor {
    fn extract(&mut self, block: &[f32]) -> BlockFeatures {
        self.push_history(block);
        let now_s = self.now_s();

        let pitch_hz = self.pitch.detect(&self.history);
        let onset = self.onset.process(&self.history, now_s);
        let tempo_bpm = if onset {
            self.tempo.on_onset(now_s)
        } else {
            self.tempo.bpm()
        };

        BlockFeatures {
            pitch_hz,
            onset,
            tempo_bpm,
        }
    }

    fn skip(&mut self, samples: usize) {
        // Gated audio counts as silence
        let window = self.history.len();
        let shift = samples.min(window);
        self.history.copy_within(shift.., 0);
        self.history[window - shift..].fill(0.0);
        self.samples_seen += samples as u64;
        self.onset.observe_silence();
    }
}

/// Factory for [`DefaultFeatureExtractor`]
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExtractorFactory;

impl FeatureExtractorFactory for DefaultExtractorFactory {
    fn create(
        &self,
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Box<dyn FeatureExtractor>, AudioError> {
        if sample_rate == 0 || block_size == 0 {
            return Err(AudioError::ExtractorInitFailed {
                reason: format!(
                    "sample rate {} / block size {} must be non-zero",
                    sample_rate, block_size
                ),
            });
        }
        Ok(Box::new(DefaultFeatureExtractor::new(sample_rate, block_size)))
    }
}
