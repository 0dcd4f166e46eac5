//! Real-time playback engine.
//!
//! A [`PlaybackController`] runs one session at a time. Each session pairs
//! an event [`Scheduler`] with an MTC [`TimecodeGenerator`], both polling
//! their own [`Clock`] and writing to a shared MIDI sink.

mod clock;
mod controller;
mod scheduler;
mod status;
mod timecode;
mod transport;

pub use clock::{CancelToken, Clock, SystemClock, POLL_INTERVAL};
pub use controller::{PlaybackController, STATUS_CAPACITY};
pub use scheduler::{
    PlaybackError, Scheduler, SchedulerOptions, SessionCommand, SessionLink, SessionOutcome,
    CONTINUOUS_LOOPS, STATUS_INTERVAL_MS,
};
pub use status::StatusSnapshot;
pub use timecode::{
    run_timecode, FrameRate, Timecode, TimecodeCell, TimecodeCommand, TimecodeConfig,
    TimecodeGenerator, TimecodeState, QUARTER_FRAME,
};
pub use transport::{TempoMap, Transport};

#[cfg(test)]
pub(crate) use clock::SteppingClock;
