//! Event scheduler: plays a sequence against wall-clock time.
//!
//! The scheduler polls its clock in a tight loop and keeps a virtual
//! millisecond counter that catches up with elapsed time one step per
//! iteration. Each event's deadline is derived from the ticks accumulated
//! since the last scheduling origin and the *current* tempo. A tempo change
//! resets that origin, so it never distorts timing that already elapsed.
//!
//! Every [`STATUS_INTERVAL_MS`] virtual milliseconds the scheduler reads its
//! command channel, applies a pending transposition together with a full
//! ledger flush, and publishes a status snapshot.

use super::clock::{CancelToken, Clock};
use super::status::StatusSnapshot;
use super::timecode::TimecodeCell;
use super::transport::Transport;
use crate::midi::{
    key_signature_name, note_to_name, seconds_to_ticks, ticks_to_seconds, transpose_note, Event,
    PendingNotes, Sequence, CHANNELS,
};
use crate::output::{MidiSink, OutputError};
use crossbeam::channel::{Receiver, Sender};
use std::time::Duration;
use thiserror::Error;

/// Virtual milliseconds between two status checkpoints.
pub const STATUS_INTERVAL_MS: u64 = 100;

/// Loop count used for continuous looping.
pub const CONTINUOUS_LOOPS: u32 = 99_999;

/// How long the final snapshot may wait for a full status channel.
const FINAL_STATUS_TIMEOUT: Duration = Duration::from_millis(100);

/// Controllers sent on every channel when a session ends:
/// all sound off (120) and all notes off (123).
const SILENCE_CONTROLLERS: [u8; 2] = [120, 123];

/// Errors that end a playback session.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Writing to the MIDI output failed
    #[error("MIDI output failed during playback: {0}")]
    Output(#[from] OutputError),
    /// A session thread could not be started
    #[error("failed to start playback thread: {0}")]
    Spawn(#[from] std::io::Error),
    /// A session thread panicked
    #[error("playback thread panicked")]
    Panicked,
}

/// Runtime commands for a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Applied at the next checkpoint, after flushing all pending notes.
    SetTranspose(i8),
    /// `true` loops continuously, `false` makes the current pass the last.
    SetLoop(bool),
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The stream was played the requested number of times.
    Completed,
    /// The cancellation token was set.
    Cancelled,
}

/// Start parameters of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Number of passes over the stream.
    pub loop_count: u32,
    /// Initial transposition in semitones.
    pub transpose: i8,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            loop_count: 1,
            transpose: 0,
        }
    }
}

/// The scheduler's links to the rest of its session.
pub struct SessionLink<'a> {
    pub cancel: CancelToken,
    pub commands: Receiver<SessionCommand>,
    pub status: Sender<StatusSnapshot>,
    pub timecode: &'a TimecodeCell,
}

enum Dispatch {
    Continue,
    Rebaseline,
}

/// Plays one sequence to a MIDI sink.
pub struct Scheduler<'a, C: Clock, S: MidiSink> {
    sequence: &'a Sequence,
    clock: C,
    sink: S,
    link: SessionLink<'a>,
    transport: Transport,
    ledger: PendingNotes,
    transpose: i8,
    pending_transpose: Option<i8>,
    loop_count: u32,
    iteration: u32,
}

impl<'a, C: Clock, S: MidiSink> Scheduler<'a, C, S> {
    pub fn new(
        sequence: &'a Sequence,
        clock: C,
        sink: S,
        link: SessionLink<'a>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            sequence,
            clock,
            sink,
            link,
            transport: Transport::new(sequence.length_seconds),
            ledger: PendingNotes::new(),
            transpose: options.transpose,
            pending_transpose: None,
            loop_count: options.loop_count,
            iteration: 0,
        }
    }

    /// Outstanding notes. Always clear once [`Scheduler::run`] returned.
    pub fn ledger(&self) -> &PendingNotes {
        &self.ledger
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Plays the sequence until it was played `loop_count` times, the
    /// session is cancelled, or the output fails.
    ///
    /// The ledger is flushed on every exit path before returning, and a final
    /// snapshot with `playing == false` is published.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybackError::Output`] if the sink fails. The flush is still
    /// attempted first.
    pub fn run(&mut self) -> Result<SessionOutcome, PlaybackError> {
        tracing::info!(
            "Playing '{}': {} events, {} pass(es), transpose {}",
            self.sequence.name,
            self.sequence.len(),
            self.loop_count,
            self.transpose
        );
        self.transport.playing = true;

        let result = self.play_loops();

        let flushed = self.ledger.flush(&mut self.sink);
        let silenced = self.silence_channels();
        self.transport.playing = false;
        let snapshot = self.snapshot();
        let _ = self
            .link
            .status
            .send_timeout(snapshot, FINAL_STATUS_TIMEOUT);

        match result {
            Ok(outcome) => {
                let released = flushed?;
                silenced?;
                tracing::info!(
                    "Session for '{}' ended ({:?}), released {} note(s)",
                    self.sequence.name,
                    outcome,
                    released
                );
                Ok(outcome)
            }
            Err(e) => {
                if let Err(flush_error) = flushed {
                    tracing::warn!("Flush after playback failure also failed: {}", flush_error);
                }
                tracing::error!("Session for '{}' failed: {}", self.sequence.name, e);
                Err(e)
            }
        }
    }

    fn play_loops(&mut self) -> Result<SessionOutcome, PlaybackError> {
        self.iteration = 0;
        while self.iteration < self.loop_count {
            if self.link.cancel.is_cancelled() {
                return Ok(SessionOutcome::Cancelled);
            }
            if self.iteration > 0 {
                // The ledger is kept: notes may sustain across the boundary
                self.transport.restart();
                tracing::debug!("Loop pass {}", self.iteration + 1);
            }
            if self.play_once()? == SessionOutcome::Cancelled {
                return Ok(SessionOutcome::Cancelled);
            }
            if self.sequence.is_empty() {
                break;
            }
            self.iteration += 1;
        }
        Ok(SessionOutcome::Completed)
    }

    /// One pass over the stream.
    fn play_once(&mut self) -> Result<SessionOutcome, PlaybackError> {
        let sequence = self.sequence;
        let events = &sequence.events;
        let ticks_per_beat = sequence.ticks_per_beat;

        let mut origin = self.clock.now();
        let mut ms: u64 = 0;
        let mut next_status: u64 = 0;
        let mut index = 0;
        // Ticks from the scheduling origin to the head event
        let mut tick: u64 = events.first().map_or(0, |e| e.delta as u64);
        let mut deadline = self.deadline_ms(tick);

        while index < events.len() {
            if self.link.cancel.is_cancelled() {
                return Ok(SessionOutcome::Cancelled);
            }
            self.clock.idle();

            let elapsed = self.clock.now().saturating_sub(origin);
            let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
            if elapsed_ms <= ms as f64 {
                continue;
            }

            let virtual_ticks = seconds_to_ticks(
                elapsed.as_secs_f64(),
                ticks_per_beat,
                self.transport.tempo_map.tempo(),
            );
            self.transport.update_position(virtual_ticks, ticks_per_beat);

            if ms >= next_status {
                self.checkpoint()?;
                next_status = ms + STATUS_INTERVAL_MS;
            }
            ms += 1;

            while index < events.len() && ms as f64 >= deadline {
                if let Dispatch::Rebaseline = self.dispatch(&events[index].event)? {
                    self.transport.rebaseline();
                    tick = 0;
                    origin = self.clock.now();
                    ms = 0;
                    next_status = 0;
                }
                index += 1;
                if let Some(next) = events.get(index) {
                    tick += next.delta as u64;
                    deadline = self.deadline_ms(tick);
                }
            }
        }
        Ok(SessionOutcome::Completed)
    }

    fn deadline_ms(&self, ticks: u64) -> f64 {
        1000.0
            * ticks_to_seconds(
                ticks,
                self.sequence.ticks_per_beat,
                self.transport.tempo_map.tempo(),
            )
    }

    /// Applies one event. Malformed events are skipped.
    fn dispatch(&mut self, event: &Event) -> Result<Dispatch, OutputError> {
        match event {
            Event::SetTempo(tempo) => {
                if self.transport.tempo_map.set_tempo(*tempo) {
                    return Ok(Dispatch::Rebaseline);
                }
                tracing::warn!(
                    "Ignoring invalid tempo {}, keeping {}",
                    tempo,
                    self.transport.tempo_map.tempo()
                );
            }
            Event::TimeSignature {
                numerator,
                denominator,
            } => {
                if !self
                    .transport
                    .tempo_map
                    .set_time_signature(*numerator, *denominator)
                {
                    tracing::debug!("Skipping time signature {}/{}", numerator, denominator);
                }
            }
            Event::KeySignature { sharps, minor } => match key_signature_name(*sharps, *minor) {
                Some(name) => self.transport.tempo_map.set_key(name),
                None => tracing::debug!("Skipping key signature with {} sharps", sharps),
            },
            Event::NoteOn {
                channel,
                note,
                velocity,
            } => {
                if let Some(note) = self.checked_note(*channel, *note, *velocity) {
                    if *velocity > 0 {
                        self.ledger.mark_on(*channel, note);
                    } else {
                        self.ledger.mark_off(*channel, note);
                    }
                    self.sink.send(&[0x90 | channel, note, *velocity])?;
                }
            }
            Event::NoteOff {
                channel,
                note,
                velocity,
            } => {
                if let Some(note) = self.checked_note(*channel, *note, *velocity) {
                    self.ledger.mark_off(*channel, note);
                    self.sink.send(&[0x80 | channel, note, *velocity])?;
                }
            }
            Event::ControlChange {
                channel,
                controller,
                value,
            } => {
                if *channel < CHANNELS as u8 && *controller < 0x80 && *value < 0x80 {
                    self.sink.send(&[0xB0 | channel, *controller, *value])?;
                } else {
                    tracing::debug!("Skipping malformed control change");
                }
            }
            Event::SysEx(bytes) | Event::Other(bytes) => {
                if bytes.is_empty() {
                    tracing::debug!("Skipping empty message");
                } else {
                    self.sink.send(bytes)?;
                }
            }
            Event::Unsupported => {}
        }
        Ok(Dispatch::Continue)
    }

    /// Validates a note message and applies the current transposition.
    fn checked_note(&self, channel: u8, note: u8, velocity: u8) -> Option<u8> {
        if channel >= CHANNELS as u8 || note > 127 || velocity > 127 {
            tracing::debug!("Skipping malformed note message");
            return None;
        }
        let transposed = transpose_note(note, self.transpose);
        if transposed.is_none() {
            tracing::debug!(
                "Skipping {} transposed by {}: out of range",
                note_to_name(note),
                self.transpose
            );
        }
        transposed
    }

    /// Reads commands, applies a pending transposition and publishes status.
    fn checkpoint(&mut self) -> Result<(), OutputError> {
        while let Ok(command) = self.link.commands.try_recv() {
            match command {
                SessionCommand::SetTranspose(transpose) => self.pending_transpose = Some(transpose),
                SessionCommand::SetLoop(true) => self.loop_count = CONTINUOUS_LOOPS,
                SessionCommand::SetLoop(false) => self.loop_count = self.iteration + 1,
            }
        }

        if let Some(transpose) = self.pending_transpose.take() {
            // Notes sent at the old offset must not outlive it
            let released = self.ledger.flush(&mut self.sink)?;
            tracing::debug!(
                "Transpose {} -> {}, released {} note(s)",
                self.transpose,
                transpose,
                released
            );
            self.transpose = transpose;
        }

        // A slow display just misses intermediate snapshots
        let _ = self.link.status.try_send(self.snapshot());
        Ok(())
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot::capture(
            &self.transport,
            self.link.timecode.load(),
            self.loop_count > self.iteration + 1,
            self.transpose,
        )
    }

    fn silence_channels(&mut self) -> Result<(), OutputError> {
        let mut first_error = None;
        for channel in 0..CHANNELS as u8 {
            for controller in SILENCE_CONTROLLERS {
                if let Err(e) = self.sink.send(&[0xB0 | channel, controller, 0]) {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
