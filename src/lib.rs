//! smfplay - A real-time Standard MIDI File player.
//!
//! Plays SMF files to a MIDI output port with optional MIDI Time Code,
//! live transposition and looping. The library holds the playback engine;
//! the binary adds a terminal player and a headless mode.

pub mod app;
pub mod midi;
pub mod output;
pub mod playback;
pub mod settings;
pub mod ui;

// Re-export commonly used types
pub use app::App;
pub use midi::{import_from_file, ImportError, Sequence};
pub use output::{MidiPort, MidiSink, OutputError, PortTarget, SharedSink};
pub use playback::{
    FrameRate, PlaybackController, PlaybackError, SessionOutcome, StatusSnapshot, TimecodeConfig,
};
pub use settings::Settings;
