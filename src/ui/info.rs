//! Playback status panel.

use crate::app::App;
use crate::playback::{FrameRate, StatusSnapshot};
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

/// Formats a length in seconds as `mm'ss''`.
pub fn format_length(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };
    format!("{:02}'{:02}''", total / 60, total % 60)
}

/// Display label of a frame rate.
pub fn rate_label(rate: FrameRate) -> &'static str {
    match rate {
        FrameRate::Fps24 => "24",
        FrameRate::Fps25 => "25",
        FrameRate::Fps2997 => "29.97",
        FrameRate::Fps30 => "30",
    }
}

/// Formats the timecode as `h.mm.ss.ff @ rate`.
pub fn format_timecode(snapshot: &StatusSnapshot) -> String {
    format!(
        "{} @ {}fps",
        snapshot.timecode.position,
        rate_label(snapshot.timecode.rate)
    )
}

/// Formats the 1-based musical position as `bar.beat`.
pub fn format_position(snapshot: &StatusSnapshot) -> String {
    format!("{}.{}", snapshot.bar + 1, snapshot.beat + 1)
}

fn field(label: &str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{:<11}", label), Style::default().fg(Color::DarkGray)),
        Span::styled(value, Style::default().fg(Color::White)),
    ])
}

/// Renders the status panel on the right side.
///
/// # Arguments
///
/// * `frame` - The frame to render to
/// * `area` - The area to render in
/// * `app` - Application state
pub fn render_info(frame: &mut Frame, area: Rect, app: &App) {
    let snapshot = &app.snapshot;
    let title = match &app.now_playing {
        Some(name) => format!(" {} ", name),
        None => " Player ".to_string(),
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Gray));

    let state = if snapshot.playing {
        Span::styled(
            "PLAYING",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled(
            "STOPPED",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )
    };

    let clock_label = if app.settings.mtc { "MTC" } else { "Time" };
    let (numerator, denominator) = snapshot.time_signature;
    let key = if snapshot.key_signature.is_empty() {
        "-".to_string()
    } else {
        snapshot.key_signature.clone()
    };

    let lines = vec![
        Line::from(state),
        Line::from(""),
        field(clock_label, format_timecode(snapshot)),
        field("BPM", format!("{:.2}", snapshot.tempo_bpm)),
        field("Position", format_position(snapshot)),
        field("Length", format_length(snapshot.length_seconds)),
        field("Key", key),
        field("Signature", format!("{}/{}", numerator, denominator)),
        field("Loop", (if snapshot.looping { "on" } else { "off" }).to_string()),
        field("Transpose", format!("{:+}", snapshot.transpose)),
    ];

    frame.render_widget(Paragraph::new(lines).block(block), area);
}
