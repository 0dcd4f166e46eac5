//! Playback controller: owns at most one session at a time.
//!
//! A session is a pair of threads writing to the same sink: the event
//! scheduler and the timecode generator. Both observe one cancellation token.
//! Starting a new session cancels the previous one and joins both of its
//! threads, so the previous ledger flush has completed before the new
//! session emits anything.

use super::clock::{CancelToken, Clock, SystemClock};
use super::scheduler::{
    PlaybackError, Scheduler, SchedulerOptions, SessionCommand, SessionLink, SessionOutcome,
    CONTINUOUS_LOOPS,
};
use super::status::StatusSnapshot;
use super::timecode::{
    run_timecode, TimecodeCell, TimecodeCommand, TimecodeConfig, TimecodeGenerator, TimecodeState,
};
use crate::midi::Sequence;
use crate::output::{OutputError, SharedSink};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Capacity of the status channel. Snapshots beyond it are dropped.
pub const STATUS_CAPACITY: usize = 16;

struct Session {
    cancel: CancelToken,
    commands: Sender<SessionCommand>,
    timecode_commands: Sender<TimecodeCommand>,
    scheduler: JoinHandle<Result<SessionOutcome, PlaybackError>>,
    timecode: JoinHandle<Result<(), OutputError>>,
}

impl Session {
    /// Waits for both threads. A timecode output failure takes the place of
    /// a successful scheduler result.
    fn join(self) -> Result<SessionOutcome, PlaybackError> {
        let outcome = self
            .scheduler
            .join()
            .unwrap_or(Err(PlaybackError::Panicked));
        match self.timecode.join() {
            Ok(Ok(())) => outcome,
            Ok(Err(e)) => outcome.and(Err(e.into())),
            Err(_) => {
                tracing::error!("Timecode thread panicked");
                outcome.and(Err(PlaybackError::Panicked))
            }
        }
    }
}

/// Starts, steers and stops playback sessions.
pub struct PlaybackController<C: Clock + Clone + 'static = SystemClock> {
    sink: SharedSink,
    clock: C,
    status: Sender<StatusSnapshot>,
    timecode_config: TimecodeConfig,
    mtc_enabled: bool,
    looping: bool,
    transpose: i8,
    session: Option<Session>,
}

impl PlaybackController<SystemClock> {
    /// Creates a controller driven by wall-clock time.
    ///
    /// # Returns
    ///
    /// The controller and the receiving end of its status channel
    pub fn new(sink: SharedSink, timecode_config: TimecodeConfig) -> (Self, Receiver<StatusSnapshot>) {
        Self::with_clock(sink, timecode_config, SystemClock::new())
    }
}

impl<C: Clock + Clone + 'static> PlaybackController<C> {
    /// Creates a controller whose sessions read time from `clock`.
    pub fn with_clock(
        sink: SharedSink,
        timecode_config: TimecodeConfig,
        clock: C,
    ) -> (Self, Receiver<StatusSnapshot>) {
        let (status, receiver) = bounded(STATUS_CAPACITY);
        let controller = Self {
            sink,
            clock,
            status,
            timecode_config,
            mtc_enabled: false,
            looping: false,
            transpose: 0,
            session: None,
        };
        (controller, receiver)
    }

    /// Starts playing `sequence`, replacing any running session.
    ///
    /// # Arguments
    ///
    /// * `sequence` - The merged event stream to play
    /// * `looping` - Loop continuously until stopped
    /// * `transpose` - Initial transposition in semitones
    ///
    /// # Errors
    ///
    /// Returns error if a session thread cannot be spawned. Failures of the
    /// previous session are logged, not returned.
    pub fn play(
        &mut self,
        sequence: Arc<Sequence>,
        looping: bool,
        transpose: i8,
    ) -> Result<(), PlaybackError> {
        if let Some(Err(e)) = self.stop() {
            tracing::warn!("Previous session ended with error: {}", e);
        }
        self.looping = looping;
        self.transpose = transpose;

        let cancel = CancelToken::new();
        let cell = Arc::new(TimecodeCell::new(TimecodeState {
            position: self.timecode_config.start,
            rate: self.timecode_config.rate,
        }));
        let (command_tx, command_rx) = unbounded();
        let (timecode_tx, timecode_rx) = unbounded();
        // Disconnected when the scheduler thread exits
        let (finished_tx, finished_rx) = bounded::<()>(0);

        let timecode = {
            let generator = TimecodeGenerator::new(self.timecode_config, self.mtc_enabled);
            let clock = self.clock.clone();
            let sink = self.sink.clone();
            let cancel = cancel.clone();
            let cell = Arc::clone(&cell);
            thread::Builder::new()
                .name("smfplay-timecode".to_string())
                .spawn(move || {
                    let result = run_timecode(
                        generator,
                        clock,
                        sink,
                        cancel.clone(),
                        timecode_rx,
                        finished_rx,
                        &cell,
                    );
                    if let Err(e) = &result {
                        // Ends the scheduler too, which releases its notes
                        tracing::warn!("Timecode output failed: {}", e);
                        cancel.cancel();
                    }
                    result
                })?
        };

        let options = SchedulerOptions {
            loop_count: if looping { CONTINUOUS_LOOPS } else { 1 },
            transpose,
        };
        let scheduler = {
            let clock = self.clock.clone();
            let sink = self.sink.clone();
            let cancel = cancel.clone();
            let status = self.status.clone();
            thread::Builder::new()
                .name("smfplay-scheduler".to_string())
                .spawn(move || {
                    let _finished = finished_tx;
                    let link = SessionLink {
                        cancel,
                        commands: command_rx,
                        status,
                        timecode: &cell,
                    };
                    Scheduler::new(&sequence, clock, sink, link, options).run()
                })
        };
        let scheduler = match scheduler {
            Ok(handle) => handle,
            Err(e) => {
                cancel.cancel();
                if timecode.join().is_err() {
                    tracing::error!("Timecode thread panicked");
                }
                return Err(e.into());
            }
        };

        self.session = Some(Session {
            cancel,
            commands: command_tx,
            timecode_commands: timecode_tx,
            scheduler,
            timecode,
        });
        Ok(())
    }

    /// Cancels the running session and waits until its notes are released.
    ///
    /// # Returns
    ///
    /// The session's result, or `None` if nothing was playing
    pub fn stop(&mut self) -> Option<Result<SessionOutcome, PlaybackError>> {
        let session = self.session.take()?;
        session.cancel.cancel();
        let outcome = session.join();
        tracing::debug!("Session stopped: {:?}", outcome);
        Some(outcome)
    }

    /// Joins a session that ended on its own.
    ///
    /// # Returns
    ///
    /// The session's result once both threads have exited, `None` while
    /// it is still running or when there is no session
    pub fn poll_finished(&mut self) -> Option<Result<SessionOutcome, PlaybackError>> {
        let done = self
            .session
            .as_ref()
            .is_some_and(|s| s.scheduler.is_finished());
        if !done {
            return None;
        }
        let session = self.session.take()?;
        // The timecode loop sees the scheduler gone within one poll
        Some(session.join())
    }

    /// Sets the transposition. A running session applies it at its next
    /// status checkpoint, releasing all pending notes first.
    pub fn set_transpose(&mut self, transpose: i8) {
        self.transpose = transpose;
        self.send_command(SessionCommand::SetTranspose(transpose));
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
        self.send_command(SessionCommand::SetLoop(looping));
    }

    /// Toggles MTC output. The timecode keeps counting while disabled.
    pub fn set_mtc_enabled(&mut self, enabled: bool) {
        self.mtc_enabled = enabled;
        if let Some(session) = &self.session {
            let _ = session
                .timecode_commands
                .send(TimecodeCommand::SetEnabled(enabled));
        }
    }

    pub fn is_playing(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.scheduler.is_finished())
    }

    pub fn transpose(&self) -> i8 {
        self.transpose
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn mtc_enabled(&self) -> bool {
        self.mtc_enabled
    }

    fn send_command(&self, command: SessionCommand) {
        if let Some(session) = &self.session {
            // A closed channel means the session is already winding down
            let _ = session.commands.send(command);
        }
    }
}

impl<C: Clock + Clone + 'static> Drop for PlaybackController<C> {
    fn drop(&mut self) {
        if let Some(Err(e)) = self.stop() {
            tracing::warn!("Session ended with error on shutdown: {}", e);
        }
    }
}
