//! Standard MIDI File (SMF) import.
//!
//! Reads .mid/.midi/.kar files with midly and merges all tracks into one
//! delta-timed [`Sequence`] for playback.
//!
//! # Limitations
//!
//! - SMPTE-timed files are rejected
//! - Format 2 (sequential) files are rejected
//! - Meta events other than tempo, time signature and key signature are kept
//!   only for their timing

use super::{tempo_to_bpm, Event, Sequence, TimedEvent, DEFAULT_TEMPO};
use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during MIDI import.
#[derive(Debug, Error)]
pub enum ImportError {
    /// File could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// MIDI parsing failed
    #[error("MIDI parse error: {0}")]
    Parse(String),
    /// Unsupported MIDI format or timing
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Header facts shown by `--info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmfInfo {
    /// Ticks per quarter note.
    pub ticks_per_beat: u16,
    /// First tempo found in the first track, in microseconds per quarter note.
    pub tempo: u32,
}

impl SmfInfo {
    /// Tempo in BPM rounded to one decimal.
    pub fn bpm(&self) -> f64 {
        (tempo_to_bpm(self.tempo) * 10.0).round() / 10.0
    }
}

/// Imports a MIDI file into a playback sequence.
///
/// # Arguments
///
/// * `path` - Path to the .mid, .midi or .kar file
///
/// # Errors
///
/// Returns error if the file cannot be read, parsed, or uses an unsupported
/// format or timing.
pub fn import_from_file<P: AsRef<Path>>(path: P) -> Result<Sequence, ImportError> {
    let path = path.as_ref();
    let data = fs::read(path)?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Untitled")
        .to_string();
    import_from_bytes(&name, &data)
}

/// Imports SMF data already in memory.
pub fn import_from_bytes(name: &str, data: &[u8]) -> Result<Sequence, ImportError> {
    let smf = Smf::parse(data).map_err(|e| ImportError::Parse(e.to_string()))?;
    let ticks_per_beat = metrical_resolution(&smf)?;

    if smf.header.format == Format::Sequential {
        return Err(ImportError::UnsupportedFormat(
            "Format 2 (sequential) MIDI files not supported".to_string(),
        ));
    }

    // Absolute tick, decoded event. Track order is preserved for equal ticks
    // because the sort below is stable.
    let mut merged: Vec<(u64, Event)> = Vec::new();
    let mut end_tick: u64 = 0;
    for track in &smf.tracks {
        let mut tick: u64 = 0;
        for event in track {
            tick += event.delta.as_int() as u64;
            end_tick = end_tick.max(tick);
            if let TrackEventKind::Meta(MetaMessage::EndOfTrack) = event.kind {
                continue;
            }
            merged.push((tick, decode_event(&event.kind)));
        }
    }
    merged.sort_by_key(|(tick, _)| *tick);
    // Keep trailing silence up to the last end-of-track so loops stay in time
    if merged.last().map_or(0, |(tick, _)| *tick) < end_tick {
        merged.push((end_tick, Event::Unsupported));
    }

    let mut events = Vec::with_capacity(merged.len());
    let mut previous: u64 = 0;
    for (tick, event) in merged {
        let delta = (tick - previous).min(u32::MAX as u64) as u32;
        events.push(TimedEvent::new(delta, event));
        previous = tick;
    }

    tracing::debug!(
        "Imported '{}': {} tracks, {} events ({} sent), {} ticks per beat",
        name,
        smf.tracks.len(),
        events.len(),
        events.iter().filter(|e| e.event.is_output()).count(),
        ticks_per_beat
    );

    Ok(Sequence::new(name, ticks_per_beat, events))
}

/// Reads the resolution and first tempo of a MIDI file.
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed.
pub fn read_info<P: AsRef<Path>>(path: P) -> Result<SmfInfo, ImportError> {
    let data = fs::read(path)?;
    let smf = Smf::parse(&data).map_err(|e| ImportError::Parse(e.to_string()))?;
    let ticks_per_beat = metrical_resolution(&smf)?;

    let tempo = smf
        .tracks
        .first()
        .and_then(|track| {
            track.iter().find_map(|event| match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(t)) => Some(t.as_int()),
                _ => None,
            })
        })
        .unwrap_or(DEFAULT_TEMPO);

    Ok(SmfInfo {
        ticks_per_beat,
        tempo,
    })
}

fn metrical_resolution(smf: &Smf) -> Result<u16, ImportError> {
    match smf.header.timing {
        Timing::Metrical(tpb) => Ok(tpb.as_int()),
        Timing::Timecode(_, _) => Err(ImportError::UnsupportedFormat(
            "SMPTE timecode timing not supported".to_string(),
        )),
    }
}

/// Decodes one track event into the playback event model.
fn decode_event(kind: &TrackEventKind) -> Event {
    match *kind {
        TrackEventKind::Midi { channel, message } => {
            let ch = channel.as_int();
            match message {
                MidiMessage::NoteOn { key, vel } => Event::NoteOn {
                    channel: ch,
                    note: key.as_int(),
                    velocity: vel.as_int(),
                },
                MidiMessage::NoteOff { key, vel } => Event::NoteOff {
                    channel: ch,
                    note: key.as_int(),
                    velocity: vel.as_int(),
                },
                MidiMessage::Controller { controller, value } => Event::ControlChange {
                    channel: ch,
                    controller: controller.as_int(),
                    value: value.as_int(),
                },
                MidiMessage::Aftertouch { key, vel } => {
                    Event::Other(vec![0xA0 | ch, key.as_int(), vel.as_int()])
                }
                MidiMessage::ProgramChange { program } => {
                    Event::Other(vec![0xC0 | ch, program.as_int()])
                }
                MidiMessage::ChannelAftertouch { vel } => Event::Other(vec![0xD0 | ch, vel.as_int()]),
                MidiMessage::PitchBend { bend } => {
                    let value = bend.0.as_int();
                    Event::Other(vec![
                        0xE0 | ch,
                        (value & 0x7F) as u8,
                        ((value >> 7) & 0x7F) as u8,
                    ])
                }
            }
        }
        TrackEventKind::SysEx(data) => {
            let mut bytes = Vec::with_capacity(data.len() + 2);
            bytes.push(0xF0);
            bytes.extend_from_slice(data);
            if bytes.last() != Some(&0xF7) {
                bytes.push(0xF7);
            }
            Event::SysEx(bytes)
        }
        TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => Event::SetTempo(tempo.as_int()),
        TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, denom_power, _, _)) => {
            // denom_power is a power of 2 (2 means quarter note); 0 marks it unusable
            let denominator = 1u32.checked_shl(denom_power as u32).unwrap_or(0);
            Event::TimeSignature {
                numerator,
                denominator,
            }
        }
        TrackEventKind::Meta(MetaMessage::KeySignature(sharps, minor)) => {
            Event::KeySignature { sharps, minor }
        }
        _ => Event::Unsupported,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = tag.to_vec();
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn header(format: u16, tracks: u16, division: u16) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&format.to_be_bytes());
        body.extend_from_slice(&tracks.to_be_bytes());
        body.extend_from_slice(&division.to_be_bytes());
        chunk(b"MThd", &body)
    }

    /// Format 1 file: a tempo/meta track and one note track.
    fn two_track_file() -> Vec<u8> {
        let meta_track = chunk(
            b"MTrk",
            &[
                0x00, 0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, // tempo 500000
                0x00, 0xFF, 0x58, 0x04, 0x03, 0x02, 0x18, 0x08, // 3/4
                0x00, 0xFF, 0x59, 0x02, 0x01, 0x00, // G major
                0x83, 0x60, 0xFF, 0x51, 0x03, 0x0F, 0x42, 0x40, // tempo 1000000 at 480
                0x00, 0xFF, 0x2F, 0x00,
            ],
        );
        let note_track = chunk(
            b"MTrk",
            &[
                0x00, 0x90, 0x3C, 0x64, // note on C4
                0x83, 0x60, 0x80, 0x3C, 0x40, // note off after 480
                0x00, 0xE1, 0x00, 0x40, // pitch bend centre, channel 1
                0x00, 0xF0, 0x03, 0x7E, 0x7F, 0xF7, // sysex
                0x83, 0x60, 0xB0, 0x40, 0x00, // sustain off at 960
                0x00, 0xFF, 0x2F, 0x00,
            ],
        );
        let mut data = header(1, 2, 480);
        data.extend(meta_track);
        data.extend(note_track);
        data
    }

    #[test]
    fn test_merges_tracks_in_time_order() {
        let seq = import_from_bytes("song", &two_track_file()).unwrap();
        assert_eq!(seq.ticks_per_beat, 480);
        assert_eq!(seq.name, "song");

        let kinds: Vec<(u32, &Event)> = seq.events.iter().map(|e| (e.delta, &e.event)).collect();
        assert_eq!(kinds[0], (0, &Event::SetTempo(500_000)));
        assert_eq!(
            kinds[1],
            (
                0,
                &Event::TimeSignature {
                    numerator: 3,
                    denominator: 4
                }
            )
        );
        assert_eq!(
            kinds[2],
            (
                0,
                &Event::KeySignature {
                    sharps: 1,
                    minor: false
                }
            )
        );
        assert_eq!(
            kinds[3],
            (
                0,
                &Event::NoteOn {
                    channel: 0,
                    note: 60,
                    velocity: 100
                }
            )
        );
        // Meta track comes first at equal ticks
        assert_eq!(kinds[4], (480, &Event::SetTempo(1_000_000)));
        assert_eq!(
            kinds[5],
            (
                0,
                &Event::NoteOff {
                    channel: 0,
                    note: 60,
                    velocity: 64
                }
            )
        );
        assert_eq!(kinds[6], (0, &Event::Other(vec![0xE1, 0x00, 0x40])));
        assert_eq!(kinds[7], (0, &Event::SysEx(vec![0xF0, 0x7E, 0x7F, 0xF7])));
        assert_eq!(
            kinds[8],
            (
                480,
                &Event::ControlChange {
                    channel: 0,
                    controller: 64,
                    value: 0
                }
            )
        );
        assert_eq!(seq.len(), 9);
    }

    #[test]
    fn test_length_follows_tempo_map() {
        let seq = import_from_bytes("song", &two_track_file()).unwrap();
        // 480 ticks at 120 BPM + 480 ticks at 60 BPM
        assert!((seq.length_seconds - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_keeps_trailing_silence() {
        let mut data = header(0, 1, 96);
        data.extend(chunk(
            b"MTrk",
            &[
                0x00, 0x90, 0x3C, 0x64, //
                0x60, 0x80, 0x3C, 0x40, // off at 96
                0x81, 0x40, 0xFF, 0x2F, 0x00, // end of track at 288
            ],
        ));
        let seq = import_from_bytes("tail", &data).unwrap();
        assert_eq!(seq.len(), 3);
        assert_eq!(seq.events[2], TimedEvent::new(192, Event::Unsupported));
        assert_eq!(seq.total_ticks(), 288);
        assert!((seq.length_seconds - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_smpte_timing() {
        // Negative division byte selects SMPTE timing (-25 fps, 40 ticks/frame)
        let mut data = header(0, 1, 0xE728);
        data.extend(chunk(b"MTrk", &[0x00, 0xFF, 0x2F, 0x00]));
        assert!(matches!(
            import_from_bytes("smpte", &data),
            Err(ImportError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_rejects_sequential_format() {
        let mut data = header(2, 1, 96);
        data.extend(chunk(b"MTrk", &[0x00, 0xFF, 0x2F, 0x00]));
        assert!(matches!(
            import_from_bytes("seq", &data),
            Err(ImportError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            import_from_bytes("junk", b"not a midi file"),
            Err(ImportError::Parse(_))
        ));
    }

    #[test]
    fn test_read_info() {
        let path = std::env::temp_dir().join(format!("smfplay-info-{}.mid", std::process::id()));
        fs::write(&path, two_track_file()).unwrap();
        let info = read_info(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(info.ticks_per_beat, 480);
        assert_eq!(info.tempo, 500_000);
        assert!((info.bpm() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_info_bpm_rounding() {
        let info = SmfInfo {
            ticks_per_beat: 96,
            tempo: 461_538,
        };
        assert!((info.bpm() - 130.0).abs() < 1e-9);
    }
}
