// BlockProcessor - per-block pipeline for one capture binding
//
// condition -> gate -> (open) feature extraction -> AnalysisFrame
//
// Owns everything that is bound to the session's sample rate and block size:
// the high-pass filter state, the feature extractor and the frame counters.
// A new processor is built for every session; nothing here is shared.

use crate::analysis::features::{FeatureAdapter, FeatureExtractorFactory};
use crate::analysis::frame::{AnalysisFrame, WaveformPreview, FRAME_VERSION};
use crate::analysis::noise::{ConditioningOutcome, NoiseConditioner, NoiseConfig};
use crate::error::AudioError;

pub struct BlockProcessor {
    conditioner: NoiseConditioner,
    features: FeatureAdapter,
    preview: WaveformPreview,
    sample_rate: u32,
    block_size: usize,
    seq: u64,
    samples_processed: u64,
    last_tempo_bpm: f32,
}

impl BlockProcessor {
    pub fn new(
        sample_rate: u32,
        block_size: usize,
        config: &NoiseConfig,
        factory: &dyn FeatureExtractorFactory,
        preview: WaveformPreview,
    ) -> Result<Self, AudioError> {
        Ok(Self {
            conditioner: NoiseConditioner::new(sample_rate, config),
            features: FeatureAdapter::new(factory, sample_rate, block_size)?,
            preview,
            sample_rate,
            block_size,
            seq: 0,
            samples_processed: 0,
            last_tempo_bpm: 0.0,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Frames produced so far
    pub fn frames(&self) -> u64 {
        self.seq
    }

    /// Blocks that passed the gate and reached the extractor
    pub fn extractor_invocations(&self) -> u64 {
        self.features.invocations()
    }

    /// Run one block through the pipeline
    ///
    /// `block` is conditioned in place. `config` must be a single snapshot
    /// taken for this block.
    pub fn process(
        &mut self,
        block: &mut [f32],
        config: &NoiseConfig,
    ) -> (AnalysisFrame, ConditioningOutcome) {
        let outcome = self.conditioner.process(block, config);

        let (pitch_hz, note, cents, onset, tempo_bpm) = if outcome.gated {
            self.features.skip(block.len());
            (0.0, None, None, false, self.last_tempo_bpm)
        } else {
            let features = self.features.extract(block);
            if features.tempo_bpm > 0.0 {
                self.last_tempo_bpm = features.tempo_bpm;
            }
            let (note, cents) = match features.note {
                Some(reading) => (Some(reading.name), Some(reading.cents)),
                None => (None, None),
            };
            (
                features.pitch_hz,
                note,
                cents,
                features.onset,
                self.last_tempo_bpm,
            )
        };

        let frame = AnalysisFrame {
            v: FRAME_VERSION,
            seq: self.seq,
            t: self.samples_processed as f64 / self.sample_rate.max(1) as f64,
            pitch_hz,
            note,
            cents,
            onset,
            tempo_bpm,
            rms: outcome.metrics.rms as f32,
            level_db: outcome.metrics.level_db,
            normalized_level: outcome.metrics.normalized_level,
            gated: outcome.gated,
            effective_gate_db: outcome.effective_gate_db,
            wave: self.preview.for_frame(self.seq, block),
        };

        self.seq += 1;
        self.samples_processed += block.len() as u64;

        (frame, outcome)
    }
}
