//! The merged, delta-timed event stream handed to the scheduler.

use super::{ticks_to_seconds, Event, TimedEvent, DEFAULT_TEMPO};

/// An ordered stream of events from one file, ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    /// Display name (usually the file stem).
    pub name: String,
    /// Ticks per quarter note from the file header.
    pub ticks_per_beat: u16,
    /// Events in playback order, each delta relative to its predecessor.
    pub events: Vec<TimedEvent>,
    /// Total length in seconds with all tempo changes applied.
    pub length_seconds: f64,
}

impl Sequence {
    /// Creates a sequence and computes its length.
    ///
    /// # Arguments
    ///
    /// * `name` - Display name
    /// * `ticks_per_beat` - Ticks per quarter note (0 is treated as 1)
    /// * `events` - Merged delta-timed events
    pub fn new(name: impl Into<String>, ticks_per_beat: u16, events: Vec<TimedEvent>) -> Self {
        let ticks_per_beat = ticks_per_beat.max(1);
        let length_seconds = compute_length(ticks_per_beat, &events);
        Self {
            name: name.into(),
            ticks_per_beat,
            events,
            length_seconds,
        }
    }

    /// Returns the number of events in the stream.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if the stream has no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the total length of the stream in ticks.
    pub fn total_ticks(&self) -> u64 {
        self.events.iter().map(|e| e.delta as u64).sum()
    }
}

/// Walks the stream accumulating seconds under the tempo in effect for each delta.
fn compute_length(ticks_per_beat: u16, events: &[TimedEvent]) -> f64 {
    let mut tempo = DEFAULT_TEMPO;
    let mut seconds = 0.0;
    for timed in events {
        seconds += ticks_to_seconds(timed.delta as u64, ticks_per_beat, tempo);
        if let Event::SetTempo(new_tempo) = timed.event {
            if new_tempo > 0 {
                tempo = new_tempo;
            }
        }
    }
    seconds
}
