// Analysis module - per-block signal processing
//
// Noise conditioning (high-pass + gate), feature extraction behind a
// replaceable extractor, note mapping and frame assembly.

pub mod features;
pub mod frame;
pub mod noise;
pub mod note;
pub mod processor;

pub use features::{
    BlockFeatures, DefaultExtractorFactory, FeatureAdapter, FeatureExtractor,
    FeatureExtractorFactory,
};
pub use frame::{AnalysisFrame, WaveformPreview, FRAME_VERSION};
pub use noise::{ConditioningOutcome, LevelMetrics, NoiseConditioner, NoiseConfig};
pub use note::{hz_to_note, NoteReading};
pub use processor::BlockProcessor;
