//! Status snapshots pushed to the display.

use super::timecode::TimecodeState;
use super::transport::Transport;
use serde::{Deserialize, Serialize};

/// A sampled view of one playback session.
///
/// Bar and beat are 0-based; displays add one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub playing: bool,
    pub bar: u32,
    pub beat: u32,
    pub tempo_bpm: f64,
    pub time_signature: (u8, u32),
    pub key_signature: String,
    pub length_seconds: f64,
    pub timecode: TimecodeState,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub transpose: i8,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            playing: false,
            bar: 0,
            beat: 0,
            tempo_bpm: 120.0,
            time_signature: (4, 4),
            key_signature: String::new(),
            length_seconds: 0.0,
            timecode: TimecodeState::default(),
            looping: false,
            transpose: 0,
        }
    }
}

impl StatusSnapshot {
    /// Samples the transport together with the session's other live values.
    pub fn capture(
        transport: &Transport,
        timecode: TimecodeState,
        looping: bool,
        transpose: i8,
    ) -> Self {
        Self {
            playing: transport.playing,
            bar: transport.bar,
            beat: transport.beat,
            tempo_bpm: transport.tempo_map.bpm(),
            time_signature: transport.tempo_map.time_signature(),
            key_signature: transport.tempo_map.key().to_string(),
            length_seconds: transport.length_seconds,
            timecode,
            looping,
            transpose,
        }
    }
}
