//! MIDI output sinks.
//!
//! The playback engine never opens or names a port itself; it writes raw
//! MIDI bytes to a [`MidiSink`]. [`MidiPort`] wraps a midir connection and
//! [`SharedSink`] lets the event scheduler and the timecode generator write
//! to the same port from their own threads.

use midir::{MidiOutput, MidiOutputConnection};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Client name registered with the system MIDI service.
pub const CLIENT_NAME: &str = "smfplay";

/// Name of the virtual output port created when no port is requested.
pub const DEFAULT_VIRTUAL_PORT: &str = "midi-curse";

/// Errors raised by MIDI output.
#[derive(Debug, Error)]
pub enum OutputError {
    /// The MIDI backend could not be initialised
    #[error("MIDI output initialisation failed: {0}")]
    Init(String),
    /// No output port matched the requested name
    #[error("no MIDI output port matching '{0}'")]
    PortNotFound(String),
    /// Connecting to (or creating) the port failed
    #[error("MIDI output connection failed: {0}")]
    Connect(String),
    /// Writing a message failed
    #[error("MIDI send failed: {0}")]
    Send(String),
    /// Another thread panicked while holding the shared sink
    #[error("MIDI output lock poisoned")]
    Poisoned,
}

/// Destination for raw MIDI bytes.
pub trait MidiSink {
    /// Sends one complete MIDI message (channel message or sysex).
    fn send(&mut self, message: &[u8]) -> Result<(), OutputError>;
}

impl<S: MidiSink + ?Sized> MidiSink for Box<S> {
    fn send(&mut self, message: &[u8]) -> Result<(), OutputError> {
        (**self).send(message)
    }
}

/// Which port to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortTarget {
    /// Create a virtual port with this name (Unix only).
    Virtual(String),
    /// Connect to the first existing port whose name contains this text.
    Existing(String),
}

impl Default for PortTarget {
    fn default() -> Self {
        PortTarget::Virtual(DEFAULT_VIRTUAL_PORT.to_string())
    }
}

/// A connected MIDI output port.
pub struct MidiPort {
    connection: MidiOutputConnection,
    name: String,
}

impl MidiPort {
    /// Opens the requested output port.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be initialised, no matching port
    /// exists, or the connection is refused.
    pub fn open(target: &PortTarget) -> Result<Self, OutputError> {
        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| OutputError::Init(e.to_string()))?;

        match target {
            PortTarget::Virtual(name) => Self::open_virtual(midi_out, name),
            PortTarget::Existing(pattern) => {
                let ports = midi_out.ports();
                let port = ports
                    .iter()
                    .find(|p| {
                        midi_out
                            .port_name(p)
                            .map(|n| n.contains(pattern.as_str()))
                            .unwrap_or(false)
                    })
                    .ok_or_else(|| OutputError::PortNotFound(pattern.clone()))?;
                let name = midi_out.port_name(port).unwrap_or_else(|_| pattern.clone());
                let connection = midi_out
                    .connect(port, &format!("{}-out", CLIENT_NAME))
                    .map_err(|e| OutputError::Connect(e.to_string()))?;
                tracing::info!("Connected to MIDI output '{}'", name);
                Ok(Self { connection, name })
            }
        }
    }

    #[cfg(unix)]
    fn open_virtual(midi_out: MidiOutput, name: &str) -> Result<Self, OutputError> {
        use midir::os::unix::VirtualOutput;

        let connection = midi_out
            .create_virtual(name)
            .map_err(|e| OutputError::Connect(e.to_string()))?;
        tracing::info!("Created virtual MIDI output '{}'", name);
        Ok(Self {
            connection,
            name: name.to_string(),
        })
    }

    #[cfg(not(unix))]
    fn open_virtual(_midi_out: MidiOutput, name: &str) -> Result<Self, OutputError> {
        Err(OutputError::Connect(format!(
            "virtual port '{}' is not supported on this platform, use --port",
            name
        )))
    }

    /// Returns the port name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl MidiSink for MidiPort {
    fn send(&mut self, message: &[u8]) -> Result<(), OutputError> {
        self.connection
            .send(message)
            .map_err(|e| OutputError::Send(e.to_string()))
    }
}

/// A sink shared between the playback threads.
///
/// Cloning is cheap; all clones write to the same underlying sink.
#[derive(Clone)]
pub struct SharedSink {
    inner: Arc<Mutex<Box<dyn MidiSink + Send>>>,
}

impl SharedSink {
    pub fn new<S: MidiSink + Send + 'static>(sink: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(sink))),
        }
    }
}

impl MidiSink for SharedSink {
    fn send(&mut self, message: &[u8]) -> Result<(), OutputError> {
        let mut sink = self.inner.lock().map_err(|_| OutputError::Poisoned)?;
        sink.send(message)
    }
}
