//! Transport state: tempo map and musical position.
//!
//! Mutated only by the event scheduler. The bar/beat position is a live
//! display approximation: it is derived from the ticks elapsed since the last
//! tempo re-baseline and the *current* time signature, so it starts again
//! from bar 0 after every tempo change.

use crate::midi::{tempo_to_bpm, DEFAULT_TEMPO};

/// Current tempo, time signature and key.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    tempo: u32,
    numerator: u8,
    denominator: u32,
    key: String,
}

impl Default for TempoMap {
    fn default() -> Self {
        Self {
            tempo: DEFAULT_TEMPO,
            numerator: 4,
            denominator: 4,
            key: String::new(),
        }
    }
}

impl TempoMap {
    /// Tempo in microseconds per quarter note. Always > 0.
    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    /// Tempo in beats per minute.
    pub fn bpm(&self) -> f64 {
        tempo_to_bpm(self.tempo)
    }

    /// Active time signature as (numerator, denominator).
    pub fn time_signature(&self) -> (u8, u32) {
        (self.numerator, self.denominator)
    }

    /// Active key label, empty until a key signature was seen.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Replaces the tempo. A zero tempo is refused and the previous value kept.
    ///
    /// # Returns
    ///
    /// true if the tempo was applied
    pub fn set_tempo(&mut self, tempo: u32) -> bool {
        if tempo == 0 {
            return false;
        }
        self.tempo = tempo;
        true
    }

    /// Replaces the time signature. Zero values are refused.
    pub fn set_time_signature(&mut self, numerator: u8, denominator: u32) -> bool {
        if numerator == 0 || denominator == 0 {
            return false;
        }
        self.numerator = numerator;
        self.denominator = denominator;
        true
    }

    pub fn set_key(&mut self, key: &str) {
        self.key.clear();
        self.key.push_str(key);
    }
}

/// Playback position and musical context for the status display.
#[derive(Debug, Clone, PartialEq)]
pub struct Transport {
    pub tempo_map: TempoMap,
    /// Bar, 0-based.
    pub bar: u32,
    /// Beat within the bar, 0-based.
    pub beat: u32,
    /// Virtual ticks elapsed since the last tempo re-baseline.
    pub ticks: u64,
    pub playing: bool,
    /// Length of the source file in seconds.
    pub length_seconds: f64,
}

impl Transport {
    pub fn new(length_seconds: f64) -> Self {
        Self {
            tempo_map: TempoMap::default(),
            bar: 0,
            beat: 0,
            ticks: 0,
            playing: false,
            length_seconds,
        }
    }

    /// Recomputes bar/beat from ticks elapsed since the last re-baseline.
    pub fn update_position(&mut self, ticks: u64, ticks_per_beat: u16) {
        self.ticks = ticks;
        let (numerator, denominator) = self.tempo_map.time_signature();
        // Beats counted in the signature's own note value
        let beats = ticks as f64 / ticks_per_beat.max(1) as f64 * denominator as f64 / 4.0;
        let whole = beats as u64;
        let numerator = numerator.max(1) as u64;
        self.bar = (whole / numerator) as u32;
        self.beat = (whole % numerator) as u32;
    }

    /// Called when a tempo change resets the scheduling origin. Tick
    /// accumulation restarts at zero and the position with it.
    pub fn rebaseline(&mut self) {
        self.bar = 0;
        self.beat = 0;
        self.ticks = 0;
    }

    /// Resets tempo map and position for a new loop iteration.
    pub fn restart(&mut self) {
        self.tempo_map = TempoMap::default();
        self.bar = 0;
        self.beat = 0;
        self.ticks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tempo_map_defaults() {
        let map = TempoMap::default();
        assert_eq!(map.tempo(), 500_000);
        assert!((map.bpm() - 120.0).abs() < 1e-9);
        assert_eq!(map.time_signature(), (4, 4));
        assert_eq!(map.key(), "");
    }

    #[test]
    fn test_zero_tempo_keeps_previous() {
        let mut map = TempoMap::default();
        assert!(map.set_tempo(400_000));
        assert!(!map.set_tempo(0));
        assert_eq!(map.tempo(), 400_000);
    }

    #[test]
    fn test_invalid_time_signature_refused() {
        let mut map = TempoMap::default();
        assert!(!map.set_time_signature(0, 4));
        assert!(!map.set_time_signature(3, 0));
        assert!(map.set_time_signature(6, 8));
        assert_eq!(map.time_signature(), (6, 8));
    }

    #[test]
    fn test_bar_beat_four_four() {
        let mut transport = Transport::new(10.0);
        transport.update_position(0, 480);
        assert_eq!((transport.bar, transport.beat), (0, 0));
        transport.update_position(480 * 3, 480);
        assert_eq!((transport.bar, transport.beat), (0, 3));
        transport.update_position(480 * 9 + 100, 480);
        assert_eq!((transport.bar, transport.beat), (2, 1));
    }

    #[test]
    fn test_bar_beat_six_eight() {
        let mut transport = Transport::new(10.0);
        transport.tempo_map.set_time_signature(6, 8);
        // A quarter note is two eighths; one 6/8 bar is three quarters
        transport.update_position(480 * 3, 480);
        assert_eq!((transport.bar, transport.beat), (1, 0));
        transport.update_position(480 * 4, 480);
        assert_eq!((transport.bar, transport.beat), (1, 2));
    }

    #[test]
    fn test_rebaseline_restarts_bar_count() {
        let mut transport = Transport::new(10.0);
        transport.update_position(480 * 8, 480);
        assert_eq!(transport.bar, 2);
        transport.rebaseline();
        assert_eq!((transport.bar, transport.beat, transport.ticks), (0, 0, 0));
        transport.update_position(480 * 5, 480);
        assert_eq!((transport.bar, transport.beat), (1, 1));
    }

    #[test]
    fn test_restart_resets_everything_but_length() {
        let mut transport = Transport::new(42.0);
        transport.tempo_map.set_tempo(300_000);
        transport.update_position(480 * 8, 480);
        transport.restart();
        assert_eq!(transport.tempo_map, TempoMap::default());
        assert_eq!((transport.bar, transport.beat), (0, 0));
        assert_eq!(transport.length_seconds, 42.0);
    }
}
