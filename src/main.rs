//! smfplay - A real-time Standard MIDI File player.
//!
//! Plays MIDI files to a virtual or existing MIDI output port, optionally
//! emitting MIDI Time Code.
//!
//! # Usage
//!
//! ```bash
//! smfplay                     # Browse and play files in the terminal
//! smfplay -t song.mid         # Play a file headlessly with MTC
//! smfplay --info a.mid b.mid  # Print resolution and tempo
//! ```

use anyhow::{bail, Context, Result};
use crossbeam::channel::RecvTimeoutError;
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use smfplay::midi::{import_from_file, read_info};
use smfplay::playback::{
    FrameRate, PlaybackController, SessionOutcome, StatusSnapshot, TimecodeConfig,
};
use smfplay::{ui, App, MidiPort, PortTarget, Settings, SharedSink};
use std::io::{self, Stdout, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Command-line options for the application.
struct CliOptions {
    /// Emit MIDI Time Code.
    timecode: bool,
    /// Loop each file until interrupted.
    looping: bool,
    /// Do not print status lines in headless mode.
    quiet: bool,
    /// Print file information instead of playing.
    info: bool,
    /// Existing output port to connect to instead of a virtual one.
    port: Option<String>,
    /// MTC frame rate.
    fps: Option<FrameRate>,
    /// Files to play headlessly.
    files: Vec<PathBuf>,
}

impl CliOptions {
    /// Parses command-line arguments.
    ///
    /// Supports:
    /// - `--timecode` or `-t`: Send MIDI Time Code
    /// - `--loop` or `-l`: Loop playback
    /// - `--quiet` or `-q`: No status output in headless mode
    /// - `--info` or `-i`: Print ticks per quarter and tempo, then exit
    /// - `--port <name>` or `-p <name>`: Connect to an existing output port
    /// - `--fps <rate>`: MTC frame rate (24, 25, 29.97, 30)
    /// - `--help` or `-h`: Print help and exit
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut options = Self {
            timecode: false,
            looping: false,
            quiet: false,
            info: false,
            port: None,
            fps: None,
            files: Vec::new(),
        };
        let mut i = 1;

        while i < args.len() {
            match args[i].as_str() {
                "--timecode" | "-t" => options.timecode = true,
                "--loop" | "-l" => options.looping = true,
                "--quiet" | "-q" => options.quiet = true,
                "--info" | "-i" => options.info = true,
                "--port" | "-p" => {
                    i += 1;
                    let Some(name) = args.get(i) else {
                        bail!("--port requires a port name");
                    };
                    options.port = Some(name.clone());
                }
                "--fps" => {
                    i += 1;
                    let Some(value) = args.get(i) else {
                        bail!("--fps requires a frame rate");
                    };
                    let rate = value
                        .parse::<f64>()
                        .ok()
                        .and_then(FrameRate::from_fps)
                        .with_context(|| {
                            format!("Unsupported frame rate '{}' (use 24, 25, 29.97 or 30)", value)
                        })?;
                    options.fps = Some(rate);
                }
                "--help" | "-h" => {
                    eprintln!("smfplay - Real-time Standard MIDI File player");
                    eprintln!();
                    eprintln!(
                        "Usage: {} [OPTIONS] [FILES...]",
                        args.first().map(String::as_str).unwrap_or("smfplay")
                    );
                    eprintln!();
                    eprintln!("Options:");
                    eprintln!("  -t, --timecode      Send MIDI Time Code");
                    eprintln!("  -l, --loop          Loop playback");
                    eprintln!("  -q, --quiet         Do not print status while playing files");
                    eprintln!("  -i, --info          Print ticks per quarter and tempo of each file");
                    eprintln!("  -p, --port NAME     Connect to an existing output port");
                    eprintln!("      --fps RATE      MTC frame rate: 24, 25, 29.97 or 30");
                    eprintln!("  -h, --help          Print this help message");
                    eprintln!();
                    eprintln!("Without files, starts the interactive player.");
                    std::process::exit(0);
                }
                other if other.starts_with('-') => {
                    eprintln!("Unknown option: {}", other);
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
                file => options.files.push(PathBuf::from(file)),
            }
            i += 1;
        }

        Ok(options)
    }

    fn port_target(&self) -> PortTarget {
        match &self.port {
            Some(name) => PortTarget::Existing(name.clone()),
            None => PortTarget::default(),
        }
    }
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if cli.info {
        return print_info(&cli.files);
    }
    if !cli.files.is_empty() {
        return play_files(&cli);
    }
    run_player(&cli)
}

/// Prints the resolution and first tempo of each file.
fn print_info(files: &[PathBuf]) -> Result<()> {
    if files.is_empty() {
        bail!("--info requires at least one file");
    }
    for path in files {
        let info = read_info(path).with_context(|| format!("Failed to read {}", path.display()))?;
        println!(
            "{}: {} ticks per quarter, {} BPM",
            path.display(),
            info.ticks_per_beat,
            info.bpm()
        );
    }
    Ok(())
}

fn open_controller(
    cli: &CliOptions,
    rate: FrameRate,
) -> Result<(PlaybackController, crossbeam::channel::Receiver<StatusSnapshot>)> {
    let port = MidiPort::open(&cli.port_target()).context("Failed to open MIDI output")?;
    tracing::info!("Sending to '{}'", port.name());
    let config = TimecodeConfig {
        rate,
        ..TimecodeConfig::default()
    };
    Ok(PlaybackController::new(SharedSink::new(port), config))
}

/// Plays the given files one after another without a terminal UI.
fn play_files(cli: &CliOptions) -> Result<()> {
    let (mut controller, status) = open_controller(cli, cli.fps.unwrap_or_default())?;
    controller.set_mtc_enabled(cli.timecode);
    let stdout = io::stdout();

    for path in &cli.files {
        let sequence = match import_from_file(path) {
            Ok(sequence) => Arc::new(sequence),
            Err(e) => {
                eprintln!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        controller
            .play(sequence, cli.looping, 0)
            .context("Failed to start playback")?;

        let outcome = loop {
            match status.recv_timeout(Duration::from_millis(200)) {
                Ok(snapshot) if !cli.quiet => print_snapshot(&stdout, &snapshot)?,
                Ok(_) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break None,
            }
            if let Some(outcome) = controller.poll_finished() {
                break Some(outcome);
            }
        };
        // The session has ended; anything still queued belongs to this file
        for snapshot in status.try_iter() {
            if !cli.quiet {
                print_snapshot(&stdout, &snapshot)?;
            }
        }

        match outcome {
            Some(Ok(SessionOutcome::Completed)) | None => {}
            Some(Ok(SessionOutcome::Cancelled)) => break,
            Some(Err(e)) => {
                return Err(e).with_context(|| format!("Playback of {} failed", path.display()))
            }
        }
    }
    Ok(())
}

/// Writes one status snapshot as a JSON line.
fn print_snapshot(stdout: &Stdout, snapshot: &StatusSnapshot) -> Result<()> {
    let line = serde_json::to_string(snapshot)?;
    let mut out = stdout.lock();
    writeln!(out, "{}", line)?;
    out.flush()?;
    Ok(())
}

/// Runs the interactive terminal player.
fn run_player(cli: &CliOptions) -> Result<()> {
    let mut settings = Settings::load();
    if let Some(rate) = cli.fps {
        settings.frame_rate = rate;
    }
    if cli.timecode {
        settings.mtc = true;
    }
    if cli.looping {
        settings.looping = true;
    }

    let (controller, status) = open_controller(cli, settings.frame_rate)?;
    let mut app = App::new(controller, status, settings, Settings::default_path());

    let mut terminal = setup_terminal().context("Failed to setup terminal")?;
    let result = run_app(&mut terminal, &mut app);
    app.shutdown();
    restore_terminal(&mut terminal).context("Failed to restore terminal")?;
    result
}

/// Sets up the terminal for TUI rendering.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("Failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend).context("Failed to create terminal")?;
    Ok(terminal)
}

/// Restores the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode().context("Failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("Failed to leave alternate screen")?;
    terminal.show_cursor().context("Failed to show cursor")?;
    Ok(())
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    loop {
        app.update();
        terminal.draw(|frame| ui::render(frame, app))?;

        // Short timeout keeps the status display live
        if event::poll(Duration::from_millis(16))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && app.handle_key(key.code) {
                    return Ok(());
                }
            }
        }
    }
}
