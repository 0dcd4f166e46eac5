//! Terminal player state and key handling.
//!
//! Coordinates the file browser, the playback controller and the latest
//! status snapshot shown by the UI.

use crate::midi::import_from_file;
use crate::playback::{PlaybackController, StatusSnapshot};
use crate::settings::Settings;
use crossbeam::channel::Receiver;
use crossterm::event::KeyCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Transposition limit in semitones, either direction.
pub const MAX_TRANSPOSE: i8 = 48;

/// How long a status message stays visible.
const STATUS_MESSAGE_TIMEOUT: Duration = Duration::from_secs(3);

/// File extensions listed by the browser.
const MIDI_EXTENSIONS: [&str; 3] = ["mid", "midi", "kar"];

/// Returns true for paths the browser lists as playable.
pub fn is_midi_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            MIDI_EXTENSIONS
                .iter()
                .any(|known| e.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Directory listing of sub-directories and MIDI files.
#[derive(Debug, Clone)]
pub struct FileBrowser {
    /// Current directory path.
    pub current_dir: PathBuf,
    /// Directories first, then files, each sorted by name.
    pub entries: Vec<PathBuf>,
    /// Currently selected index.
    pub selected: usize,
    /// Scroll offset for long lists.
    pub scroll: usize,
}

impl FileBrowser {
    pub fn new(dir: PathBuf) -> Self {
        let mut browser = Self {
            current_dir: dir,
            entries: Vec::new(),
            selected: 0,
            scroll: 0,
        };
        browser.refresh();
        browser
    }

    /// Re-reads the current directory.
    pub fn refresh(&mut self) {
        self.entries.clear();

        if self.current_dir.parent().is_some() {
            self.entries.push(PathBuf::from(".."));
        }

        match std::fs::read_dir(&self.current_dir) {
            Ok(entries) => {
                let mut dirs: Vec<PathBuf> = Vec::new();
                let mut files: Vec<PathBuf> = Vec::new();

                for entry in entries.flatten() {
                    let path = entry.path();
                    if is_hidden(&path) {
                        continue;
                    }
                    if path.is_dir() {
                        dirs.push(path);
                    } else if is_midi_file(&path) {
                        files.push(path);
                    }
                }

                dirs.sort();
                files.sort();
                self.entries.extend(dirs);
                self.entries.extend(files);
            }
            Err(e) => {
                tracing::warn!("Cannot list {}: {}", self.current_dir.display(), e);
            }
        }

        if self.selected >= self.entries.len() {
            self.selected = 0;
        }
    }

    pub fn move_up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            if self.selected < self.scroll {
                self.scroll = self.selected;
            }
        }
    }

    /// Moves the selection down, scrolling within `visible` rows.
    pub fn move_down(&mut self, visible: usize) {
        if self.selected + 1 < self.entries.len() {
            self.selected += 1;
            let visible = visible.max(1);
            if self.selected >= self.scroll + visible {
                self.scroll = self.selected + 1 - visible;
            }
        }
    }

    pub fn selected_path(&self) -> Option<&PathBuf> {
        self.entries.get(self.selected)
    }

    /// Changes into `dir` and lists it.
    pub fn enter(&mut self, dir: PathBuf) {
        self.current_dir = dir;
        self.selected = 0;
        self.scroll = 0;
        self.refresh();
    }

    /// Changes to the parent directory, selecting the one just left.
    pub fn parent(&mut self) {
        let Some(parent) = self.current_dir.parent().map(Path::to_path_buf) else {
            return;
        };
        let previous = std::mem::replace(&mut self.current_dir, parent);
        self.scroll = 0;
        self.refresh();
        self.selected = self
            .entries
            .iter()
            .position(|p| p == &previous)
            .unwrap_or(0);
    }
}

/// Terminal player state.
pub struct App {
    pub browser: FileBrowser,
    pub controller: PlaybackController,
    status: Receiver<StatusSnapshot>,
    /// Latest snapshot received from the running session.
    pub snapshot: StatusSnapshot,
    pub settings: Settings,
    settings_path: Option<PathBuf>,
    /// Name of the file last started.
    pub now_playing: Option<String>,
    /// Temporary message and the moment it was set.
    pub status_message: Option<(String, Instant)>,
    /// Rows available to the browser list, updated by the renderer.
    pub visible_rows: usize,
}

impl App {
    /// Creates the player.
    ///
    /// # Arguments
    ///
    /// * `controller` - Controller connected to the output port
    /// * `status` - The controller's status channel
    /// * `settings` - Restored settings
    /// * `settings_path` - Where to save settings on quit, if anywhere
    pub fn new(
        mut controller: PlaybackController,
        status: Receiver<StatusSnapshot>,
        settings: Settings,
        settings_path: Option<PathBuf>,
    ) -> Self {
        controller.set_mtc_enabled(settings.mtc);
        controller.set_loop(settings.looping);
        let browser = FileBrowser::new(settings.start_directory());
        let snapshot = StatusSnapshot {
            looping: settings.looping,
            ..StatusSnapshot::default()
        };
        Self {
            browser,
            controller,
            status,
            snapshot,
            settings,
            settings_path,
            now_playing: None,
            status_message: None,
            visible_rows: 20,
        }
    }

    /// Sets a status message to display temporarily.
    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = Some((message.into(), Instant::now()));
    }

    /// Pulls pending snapshots and reports sessions that ended.
    pub fn update(&mut self) {
        if let Some(latest) = self.status.try_iter().last() {
            self.snapshot = latest;
        }

        match self.controller.poll_finished() {
            Some(Ok(outcome)) => tracing::debug!("Session finished: {:?}", outcome),
            Some(Err(e)) => self.set_status(format!("Playback failed: {}", e)),
            None => {}
        }

        if let Some((_, time)) = &self.status_message {
            if time.elapsed() > STATUS_MESSAGE_TIMEOUT {
                self.status_message = None;
            }
        }
    }

    /// Handles one key press.
    ///
    /// # Returns
    ///
    /// true if the player should quit
    pub fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Up | KeyCode::Char('k') => self.browser.move_up(),
            KeyCode::Down | KeyCode::Char('j') => self.browser.move_down(self.visible_rows),
            KeyCode::Enter | KeyCode::Right => self.activate_selected(),
            KeyCode::Left | KeyCode::Backspace => self.browser.parent(),
            KeyCode::Char(' ') | KeyCode::Char('s') => self.stop(),
            KeyCode::Char('+') | KeyCode::Char('=') => self.shift_transpose(1),
            KeyCode::Char('-') => self.shift_transpose(-1),
            KeyCode::Char('l') => self.toggle_loop(),
            KeyCode::Char('t') => self.toggle_mtc(),
            _ => {}
        }
        false
    }

    /// Opens the selected directory or plays the selected file.
    pub fn activate_selected(&mut self) {
        let Some(path) = self.browser.selected_path().cloned() else {
            return;
        };
        if path == Path::new("..") {
            self.browser.parent();
        } else if path.is_dir() {
            self.browser.enter(path);
        } else {
            self.play_file(&path);
        }
    }

    /// Imports and plays a file, replacing the current session.
    pub fn play_file(&mut self, path: &Path) {
        let sequence = match import_from_file(path) {
            Ok(sequence) => Arc::new(sequence),
            Err(e) => {
                tracing::warn!("Cannot play {}: {}", path.display(), e);
                self.set_status(format!("Cannot play: {}", e));
                return;
            }
        };
        let name = sequence.name.clone();
        let transpose = self.controller.transpose();
        match self.controller.play(sequence, self.settings.looping, transpose) {
            Ok(()) => {
                self.set_status(format!("Playing {}", name));
                self.now_playing = Some(name);
            }
            Err(e) => self.set_status(format!("Playback failed: {}", e)),
        }
    }

    pub fn stop(&mut self) {
        if let Some(Err(e)) = self.controller.stop() {
            self.set_status(format!("Playback failed: {}", e));
        }
        self.snapshot.playing = false;
    }

    fn shift_transpose(&mut self, step: i8) {
        let transpose = self
            .controller
            .transpose()
            .saturating_add(step)
            .clamp(-MAX_TRANSPOSE, MAX_TRANSPOSE);
        self.controller.set_transpose(transpose);
        self.snapshot.transpose = transpose;
    }

    fn toggle_loop(&mut self) {
        self.settings.looping = !self.settings.looping;
        self.controller.set_loop(self.settings.looping);
        self.snapshot.looping = self.settings.looping;
    }

    fn toggle_mtc(&mut self) {
        self.settings.mtc = !self.settings.mtc;
        self.controller.set_mtc_enabled(self.settings.mtc);
        self.set_status(if self.settings.mtc { "MTC on" } else { "MTC off" });
    }

    /// Stops playback, waiting for the flush, and saves settings.
    pub fn shutdown(&mut self) {
        self.stop();
        self.settings.last_directory = Some(self.browser.current_dir.clone());
        if let Some(path) = &self.settings_path {
            if let Err(e) = self.settings.save_to_file(path) {
                tracing::warn!("Could not save settings to {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::testing::CaptureSink;
    use crate::output::SharedSink;
    use crate::playback::TimecodeConfig;
    use std::fs;

    fn temp_dir(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("smfplay-app-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn populate(dir: &Path) {
        fs::create_dir_all(dir.join("b_dir")).unwrap();
        fs::create_dir_all(dir.join("a_dir")).unwrap();
        fs::create_dir_all(dir.join(".hidden")).unwrap();
        for name in ["song.mid", "Karaoke.KAR", "other.midi", "notes.txt", ".secret.mid"] {
            fs::write(dir.join(name), b"").unwrap();
        }
    }

    fn names(browser: &FileBrowser) -> Vec<String> {
        browser
            .entries
            .iter()
            .map(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| p.display().to_string())
            })
            .collect()
    }

    fn app(dir: &Path, capture: &CaptureSink) -> App {
        let (controller, status) =
            PlaybackController::new(SharedSink::new(capture.clone()), TimecodeConfig::default());
        let settings = Settings {
            last_directory: Some(dir.to_path_buf()),
            ..Settings::default()
        };
        App::new(controller, status, settings, None)
    }

    #[test]
    fn test_midi_extensions() {
        assert!(is_midi_file(Path::new("a.mid")));
        assert!(is_midi_file(Path::new("a.MIDI")));
        assert!(is_midi_file(Path::new("a.kar")));
        assert!(!is_midi_file(Path::new("a.wav")));
        assert!(!is_midi_file(Path::new("mid")));
    }

    #[test]
    fn test_browser_lists_dirs_then_files() {
        let dir = temp_dir("list");
        populate(&dir);
        let browser = FileBrowser::new(dir.clone());
        let listed = names(&browser);
        fs::remove_dir_all(&dir).ok();

        assert_eq!(
            listed,
            vec!["..", "a_dir", "b_dir", "Karaoke.KAR", "other.midi", "song.mid"]
        );
    }

    #[test]
    fn test_browser_navigation() {
        let dir = temp_dir("nav");
        populate(&dir);
        let mut browser = FileBrowser::new(dir.clone());

        browser.move_down(3);
        assert_eq!(names(&browser)[browser.selected], "a_dir");
        browser.move_down(3);
        browser.move_down(3);
        assert_eq!(browser.scroll, 1);

        browser.enter(dir.join("b_dir"));
        assert_eq!(names(&browser), vec![".."]);
        browser.parent();
        assert_eq!(browser.current_dir, dir);
        assert_eq!(names(&browser)[browser.selected], "b_dir");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_keys_steer_controller() {
        let dir = temp_dir("keys");
        let capture = CaptureSink::new();
        let mut app = app(&dir, &capture);

        assert!(!app.handle_key(KeyCode::Char('+')));
        app.handle_key(KeyCode::Char('+'));
        app.handle_key(KeyCode::Char('-'));
        assert_eq!(app.controller.transpose(), 1);

        app.handle_key(KeyCode::Char('l'));
        assert!(app.settings.looping);
        assert!(app.controller.looping());

        app.handle_key(KeyCode::Char('t'));
        assert!(app.settings.mtc);
        assert!(app.controller.mtc_enabled());

        assert!(app.handle_key(KeyCode::Char('q')));
        assert!(app.handle_key(KeyCode::Esc));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_transpose_clamped() {
        let dir = temp_dir("clamp");
        let capture = CaptureSink::new();
        let mut app = app(&dir, &capture);
        for _ in 0..100 {
            app.handle_key(KeyCode::Char('-'));
        }
        assert_eq!(app.controller.transpose(), -MAX_TRANSPOSE);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unplayable_file_reports_status() {
        let dir = temp_dir("bad");
        fs::write(dir.join("broken.mid"), b"garbage").unwrap();
        let capture = CaptureSink::new();
        let mut app = app(&dir, &capture);

        app.play_file(&dir.join("broken.mid"));
        assert!(app.status_message.is_some());
        assert!(!app.controller.is_playing());
        assert!(capture.bytes().is_empty());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_shutdown_saves_settings() {
        let dir = temp_dir("save");
        let path = dir.join("cfg").join("settings.json");
        let capture = CaptureSink::new();
        let (controller, status) =
            PlaybackController::new(SharedSink::new(capture.clone()), TimecodeConfig::default());
        let settings = Settings {
            last_directory: Some(dir.clone()),
            ..Settings::default()
        };
        let mut app = App::new(controller, status, settings, Some(path.clone()));

        app.handle_key(KeyCode::Char('l'));
        app.shutdown();
        let saved = Settings::load_from_file(&path).unwrap();
        fs::remove_dir_all(&dir).ok();

        assert!(saved.looping);
        assert_eq!(saved.last_directory, Some(dir));
    }
}
