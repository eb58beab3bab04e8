// AnalysisFrame - the record pushed to every subscriber once per block
//
// Wire format is versioned (`v`) and uses snake_case names. Optional fields
// (`note`, `cents`, `wave`) are omitted when absent so clients can test for
// presence instead of sentinel values.

use serde::{Deserialize, Serialize};

/// Wire format version carried in every frame
pub const FRAME_VERSION: u8 = 1;

/// Immutable per-block analysis result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFrame {
    pub v: u8,
    /// Frame index within the session, starting at 0
    pub seq: u64,
    /// Seconds of audio processed since the session started
    pub t: f64,
    pub pitch_hz: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cents: Option<f32>,
    pub onset: bool,
    pub tempo_bpm: f32,
    pub rms: f32,
    pub level_db: f32,
    pub normalized_level: f32,
    pub gated: bool,
    pub effective_gate_db: f32,
    /// Low-resolution waveform, present on preview ticks only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave: Option<Vec<f32>>,
}

impl AnalysisFrame {
    pub fn has_pitch(&self) -> bool {
        self.pitch_hz > 0.0
    }
}

/// Decides which frames carry a waveform preview and builds it
#[derive(Debug, Clone)]
pub struct WaveformPreview {
    every_n_frames: u64,
    points: usize,
}

impl WaveformPreview {
    /// `every_n_frames == 0` disables previews
    pub fn new(every_n_frames: u64, points: usize) -> Self {
        Self {
            every_n_frames,
            points,
        }
    }

    pub fn is_tick(&self, seq: u64) -> bool {
        self.every_n_frames > 0 && self.points > 0 && seq % self.every_n_frames == 0
    }

    /// Evenly spaced samples of `block`, at most `points` long
    pub fn subsample(&self, block: &[f32]) -> Vec<f32> {
        if block.is_empty() || self.points == 0 {
            return Vec::new();
        }
        if block.len() <= self.points {
            return block.to_vec();
        }
        let stride = block.len() as f64 / self.points as f64;
        (0..self.points)
            .map(|i| block[((i as f64 * stride) as usize).min(block.len() - 1)])
            .collect()
    }

    pub fn for_frame(&self, seq: u64, block: &[f32]) -> Option<Vec<f32>> {
        self.is_tick(seq).then(|| self.subsample(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> AnalysisFrame {
        AnalysisFrame {
            v: FRAME_VERSION,
            seq: 3,
            t: 0.1,
            pitch_hz: 0.0,
            note: None,
            cents: None,
            onset: false,
            tempo_bpm: 0.0,
            rms: 0.0,
            level_db: -240.0,
            normalized_level: 0.0,
            gated: true,
            effective_gate_db: -50.0,
            wave: None,
        }
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let json = serde_json::to_value(frame()).unwrap();
        let object = json.as_object().unwrap();
        assert!(!object.contains_key("note"));
        assert!(!object.contains_key("cents"));
        assert!(!object.contains_key("wave"));
        assert_eq!(object["v"], 1);
        assert_eq!(object["gated"], true);
    }

    #[test]
    fn test_present_fields_are_serialized() {
        let mut pitched = frame();
        pitched.pitch_hz = 440.0;
        pitched.note = Some("A4".to_string());
        pitched.cents = Some(-3.0);
        pitched.wave = Some(vec![0.0, 0.5]);

        let json = serde_json::to_value(&pitched).unwrap();
        assert_eq!(json["note"], "A4");
        assert_eq!(json["cents"], -3.0);
        assert_eq!(json["wave"].as_array().unwrap().len(), 2);
        assert!(pitched.has_pitch());
    }

    #[test]
    fn test_preview_every_fourth_frame() {
        let preview = WaveformPreview::new(4, 128);
        let block = vec![0.25_f32; 1024];
        let ticks: Vec<u64> = (0..10)
            .filter(|seq| preview.for_frame(*seq, &block).is_some())
            .collect();
        assert_eq!(ticks, vec![0, 4, 8]);
        assert_eq!(preview.for_frame(0, &block).unwrap().len(), 128);
    }

    #[test]
    fn test_subsample_keeps_short_blocks() {
        let preview = WaveformPreview::new(1, 128);
        assert_eq!(preview.subsample(&[0.1, -0.1]), vec![0.1, -0.1]);
        assert!(preview.subsample(&[]).is_empty());
    }

    #[test]
    fn test_subsample_is_evenly_spaced() {
        let preview = WaveformPreview::new(1, 4);
        let block: Vec<f32> = (0..8).map(|i| i as f32).collect();
        assert_eq!(preview.subsample(&block), vec![0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_disabled_preview() {
        let preview = WaveformPreview::new(0, 128);
        assert!(preview.for_frame(0, &[0.0; 16]).is_none());
    }
}
