//! Pending-note ledger.
//!
//! Counts outstanding note-ons per (channel, note) so that every sounding
//! note can be released on stop, transpose change or session teardown.

use crate::output::{MidiSink, OutputError};

/// Number of MIDI channels.
pub const CHANNELS: usize = 16;

/// Number of MIDI note numbers.
pub const NOTES: usize = 128;

/// Velocity used for note-offs generated by a flush.
const FLUSH_VELOCITY: u8 = 0x40;

/// Controllers reset on every channel after a flush:
/// sustain (64), sostenuto (66), reset all controllers (121).
const RESET_CONTROLLERS: [u8; 3] = [64, 66, 121];

/// Outstanding note-on counters for all 16 channels and 128 notes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNotes {
    counts: [[u16; NOTES]; CHANNELS],
}

impl Default for PendingNotes {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingNotes {
    pub fn new() -> Self {
        Self {
            counts: [[0; NOTES]; CHANNELS],
        }
    }

    /// Records a dispatched note-on.
    pub fn mark_on(&mut self, channel: u8, note: u8) {
        let slot = &mut self.counts[channel as usize & 0x0F][note as usize & 0x7F];
        *slot = slot.saturating_add(1);
    }

    /// Records a dispatched note-off. Never goes below zero.
    pub fn mark_off(&mut self, channel: u8, note: u8) {
        let slot = &mut self.counts[channel as usize & 0x0F][note as usize & 0x7F];
        *slot = slot.saturating_sub(1);
    }

    /// Returns the outstanding count for a (channel, note) pair.
    pub fn count(&self, channel: u8, note: u8) -> u16 {
        self.counts[channel as usize & 0x0F][note as usize & 0x7F]
    }

    /// Returns how many (channel, note) pairs are still sounding.
    pub fn pending(&self) -> usize {
        self.counts
            .iter()
            .flat_map(|row| row.iter())
            .filter(|&&c| c > 0)
            .count()
    }

    /// Returns true if no note is outstanding.
    pub fn is_clear(&self) -> bool {
        self.pending() == 0
    }

    /// Releases every outstanding note.
    ///
    /// Sends one note-off per pending (channel, note), then sustain off,
    /// sostenuto off and reset-all-controllers on all 16 channels, and
    /// finally zeroes the ledger. Every message is attempted even if an
    /// earlier one failed; the ledger is always zero afterwards and the
    /// first send error is returned.
    ///
    /// # Returns
    ///
    /// The number of note-offs sent.
    pub fn flush<S: MidiSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize, OutputError> {
        let mut first_error = None;
        let mut released = 0;

        for (channel, row) in self.counts.iter().enumerate() {
            for (note, &count) in row.iter().enumerate() {
                if count == 0 {
                    continue;
                }
                let message = [0x80 | channel as u8, note as u8, FLUSH_VELOCITY];
                match sink.send(&message) {
                    Ok(()) => released += 1,
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        for channel in 0..CHANNELS as u8 {
            for controller in RESET_CONTROLLERS {
                if let Err(e) = sink.send(&[0xB0 | channel, controller, 0]) {
                    first_error.get_or_insert(e);
                }
            }
        }

        self.counts = [[0; NOTES]; CHANNELS];

        match first_error {
            Some(e) => Err(e),
            None => Ok(released),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::testing::CaptureSink;

    fn note_offs(sink: &CaptureSink) -> Vec<Vec<u8>> {
        sink.bytes()
            .into_iter()
            .filter(|m| m[0] & 0xF0 == 0x80)
            .collect()
    }

    #[test]
    fn test_mark_on_off() {
        let mut ledger = PendingNotes::new();
        ledger.mark_on(0, 60);
        ledger.mark_on(0, 60);
        assert_eq!(ledger.count(0, 60), 2);
        ledger.mark_off(0, 60);
        assert_eq!(ledger.count(0, 60), 1);
        assert_eq!(ledger.pending(), 1);
    }

    #[test]
    fn test_mark_off_clamps_at_zero() {
        let mut ledger = PendingNotes::new();
        ledger.mark_off(3, 40);
        assert_eq!(ledger.count(3, 40), 0);
        ledger.mark_on(3, 40);
        assert_eq!(ledger.count(3, 40), 1);
    }

    #[test]
    fn test_flush_one_note_off_per_entry() {
        let mut ledger = PendingNotes::new();
        ledger.mark_on(0, 60);
        ledger.mark_on(0, 60);
        ledger.mark_on(9, 36);
        ledger.mark_on(15, 127);
        ledger.mark_on(2, 10);
        ledger.mark_off(2, 10);

        let mut sink = CaptureSink::new();
        let released = ledger.flush(&mut sink).unwrap();

        assert_eq!(released, 3);
        assert!(ledger.is_clear());
        assert_eq!(
            note_offs(&sink),
            vec![vec![0x80, 60, 0x40], vec![0x89, 36, 0x40], vec![0x8F, 127, 0x40]]
        );
    }

    #[test]
    fn test_flush_sends_channel_resets() {
        let mut ledger = PendingNotes::new();
        ledger.mark_on(1, 64);
        let mut sink = CaptureSink::new();
        ledger.flush(&mut sink).unwrap();

        let messages = sink.bytes();
        // Note-offs come before the controller resets
        assert_eq!(messages[0], vec![0x81, 64, 0x40]);
        let resets: Vec<_> = messages[1..].to_vec();
        assert_eq!(resets.len(), CHANNELS * 3);
        assert_eq!(resets[0], vec![0xB0, 64, 0]);
        assert_eq!(resets[1], vec![0xB0, 66, 0]);
        assert_eq!(resets[2], vec![0xB0, 121, 0]);
        assert_eq!(resets[resets.len() - 1], vec![0xBF, 121, 0]);
    }

    #[test]
    fn test_flush_idempotent() {
        let mut ledger = PendingNotes::new();
        let mut sink = CaptureSink::new();
        assert_eq!(ledger.flush(&mut sink).unwrap(), 0);
        assert_eq!(ledger.flush(&mut sink).unwrap(), 0);
        assert!(note_offs(&sink).is_empty());
        assert_eq!(sink.bytes().len(), CHANNELS * 3 * 2);
    }

    #[test]
    fn test_flush_after_arbitrary_sequence() {
        // Deterministic pseudo-random walk of mark_on/mark_off calls
        let mut ledger = PendingNotes::new();
        let mut expected = std::collections::HashMap::new();
        let mut seed: u32 = 0x1234_5678;
        for _ in 0..5000 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let channel = ((seed >> 8) % 16) as u8;
            let note = ((seed >> 12) % 128) as u8;
            let entry = expected.entry((channel, note)).or_insert(0i32);
            if seed & 1 == 0 {
                ledger.mark_on(channel, note);
                *entry += 1;
            } else {
                ledger.mark_off(channel, note);
                *entry = (*entry - 1).max(0);
            }
        }
        let outstanding = expected.values().filter(|&&c| c > 0).count();

        let mut sink = CaptureSink::new();
        let released = ledger.flush(&mut sink).unwrap();

        assert_eq!(released, outstanding);
        assert_eq!(note_offs(&sink).len(), outstanding);
        for channel in 0..16 {
            for note in 0..128 {
                assert_eq!(ledger.count(channel, note), 0);
            }
        }
    }

    #[test]
    fn test_flush_zeroes_even_on_failure() {
        let mut ledger = PendingNotes::new();
        ledger.mark_on(0, 60);
        ledger.mark_on(0, 62);
        let mut sink = CaptureSink::failing_after(1);

        assert!(ledger.flush(&mut sink).is_err());
        assert!(ledger.is_clear());
        assert_eq!(sink.bytes(), vec![vec![0x80, 60, 0x40]]);
    }
}
