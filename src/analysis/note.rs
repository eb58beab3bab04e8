//! Frequency to equal-tempered note mapping (A4 = 440 Hz).

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Reference pitch for MIDI note 69
pub const A4_HZ: f32 = 440.0;

/// Nearest note for a detected pitch
#[derive(Debug, Clone, PartialEq)]
pub struct NoteReading {
    /// Note name with octave, e.g. "A4", "C#5"
    pub name: String,
    pub midi: i32,
    /// Deviation from the nearest note, rounded to whole cents
    pub cents: f32,
}

/// Fractional MIDI number, `69 + 12 * log2(f / 440)`
pub fn hz_to_midi(frequency: f32) -> f32 {
    69.0 + 12.0 * (frequency / A4_HZ).log2()
}

/// Map a frequency onto its nearest note
///
/// Returns `None` when there is no determinate pitch (`frequency <= 0`).
pub fn hz_to_note(frequency: f32) -> Option<NoteReading> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }

    let midi = hz_to_midi(frequency);
    let nearest = midi.round();
    let cents = ((midi - nearest) * 100.0).round();
    let midi_index = nearest as i32;

    let name = NOTE_NAMES[midi_index.rem_euclid(12) as usize];
    let octave = midi_index.div_euclid(12) - 1;

    Some(NoteReading {
        name: format!("{}{}", name, octave),
        midi: midi_index,
        cents,
    })
}
