//! Decoded MIDI events of the merged playback stream.
//!
//! Events are immutable once produced by the importer. Each one carries the
//! tick offset from the previous event in the merged stream.

/// A decoded MIDI or meta event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Note on. A velocity of 0 is treated as a note off by the ledger.
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Note off.
    NoteOff { channel: u8, note: u8, velocity: u8 },
    /// Control change.
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
    /// Tempo change in microseconds per quarter note.
    SetTempo(u32),
    /// Time signature. `denominator` is the real note value (4 = quarter).
    TimeSignature { numerator: u8, denominator: u32 },
    /// Key signature as sharps (positive) or flats (negative).
    KeySignature { sharps: i8, minor: bool },
    /// Complete system exclusive message including `F0` and `F7`.
    SysEx(Vec<u8>),
    /// Any other channel message, sent verbatim.
    Other(Vec<u8>),
    /// Meta or escape event without playback effect. Only its delta matters.
    Unsupported,
}

impl Event {
    /// Returns true for events that produce output bytes.
    pub fn is_output(&self) -> bool {
        matches!(
            self,
            Event::NoteOn { .. }
                | Event::NoteOff { .. }
                | Event::ControlChange { .. }
                | Event::SysEx(_)
                | Event::Other(_)
        )
    }
}

/// An event with its tick offset relative to the previous event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedEvent {
    /// Ticks since the previous event in the merged stream.
    pub delta: u32,
    pub event: Event,
}

impl TimedEvent {
    pub fn new(delta: u32, event: Event) -> Self {
        Self { delta, event }
    }
}

const MAJOR_KEYS: [&str; 15] = [
    "Cb", "Gb", "Db", "Ab", "Eb", "Bb", "F", "C", "G", "D", "A", "E", "B", "F#", "C#",
];

const MINOR_KEYS: [&str; 15] = [
    "Abm", "Ebm", "Bbm", "Fm", "Cm", "Gm", "Dm", "Am", "Em", "Bm", "F#m", "C#m", "G#m", "D#m",
    "A#m",
];

/// Resolves a key signature to its display label (`C`, `Am`, `F#`, `Bbm`...).
///
/// Returns `None` when the number of sharps/flats is outside -7..=7.
pub fn key_signature_name(sharps: i8, minor: bool) -> Option<&'static str> {
    if !(-7..=7).contains(&sharps) {
        return None;
    }
    let index = (sharps + 7) as usize;
    Some(if minor {
        MINOR_KEYS[index]
    } else {
        MAJOR_KEYS[index]
    })
}

/// Applies a transposition offset to a note number.
///
/// Returns `None` when the result leaves the MIDI range 0-127.
pub fn transpose_note(note: u8, offset: i8) -> Option<u8> {
    let shifted = note as i16 + offset as i16;
    if (0..=127).contains(&shifted) {
        Some(shifted as u8)
    } else {
        None
    }
}
