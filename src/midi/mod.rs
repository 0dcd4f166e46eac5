//! MIDI data structures and Standard MIDI File handling.
//!
//! This module provides the merged event stream consumed by the playback
//! engine, the SMF importer that produces it, and the pending-note ledger
//! that guarantees every sounding note is released.

mod event;
mod ledger;
mod sequence;
mod smf;

pub use event::{key_signature_name, transpose_note, Event, TimedEvent};
pub use ledger::{PendingNotes, CHANNELS, NOTES};
pub use sequence::Sequence;
pub use smf::{import_from_file, import_from_bytes, read_info, ImportError, SmfInfo};

/// Default tempo in microseconds per quarter note (120 BPM).
pub const DEFAULT_TEMPO: u32 = 500_000;

/// Standard MIDI note names for display purposes.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Converts a MIDI note number to a human-readable note name with octave.
///
/// # Examples
///
/// ```
/// use smfplay::midi::note_to_name;
///
/// assert_eq!(note_to_name(60), "C4");
/// ```
pub fn note_to_name(note: u8) -> String {
    let octave = (note / 12) as i8 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", NOTE_NAMES[note_index], octave)
}

/// Converts ticks to seconds at a constant tempo.
///
/// # Arguments
///
/// * `ticks` - Number of ticks
/// * `ticks_per_beat` - Resolution of the source file (ticks per quarter note)
/// * `tempo` - Tempo in microseconds per quarter note
pub fn ticks_to_seconds(ticks: u64, ticks_per_beat: u16, tempo: u32) -> f64 {
    let beats = ticks as f64 / ticks_per_beat.max(1) as f64;
    beats * tempo as f64 / 1_000_000.0
}

/// Converts seconds to ticks at a constant tempo, rounded to the nearest tick.
///
/// # Arguments
///
/// * `seconds` - Duration in seconds
/// * `ticks_per_beat` - Resolution of the source file (ticks per quarter note)
/// * `tempo` - Tempo in microseconds per quarter note
pub fn seconds_to_ticks(seconds: f64, ticks_per_beat: u16, tempo: u32) -> u64 {
    if tempo == 0 || seconds <= 0.0 {
        return 0;
    }
    let beats = seconds * 1_000_000.0 / tempo as f64;
    (beats * ticks_per_beat as f64).round() as u64
}

/// Converts a tempo in microseconds per quarter note to beats per minute.
pub fn tempo_to_bpm(tempo: u32) -> f64 {
    if tempo == 0 {
        return 0.0;
    }
    60_000_000.0 / tempo as f64
}
