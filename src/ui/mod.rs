//! Terminal user interface.
//!
//! Two panes: the file browser on the left and the playback status on the
//! right, above a line of key hints or the latest status message.

mod browser;
mod info;

use crate::app::App;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;

pub use browser::render_browser;
pub use info::{format_length, format_position, format_timecode, rate_label, render_info};

const HINTS: [(&str, &str); 7] = [
    ("Enter", "play/open"),
    ("Bksp", "up"),
    ("Space", "stop"),
    ("+/-", "transpose"),
    ("l", "loop"),
    ("t", "MTC"),
    ("q", "quit"),
];

/// Renders the complete UI.
pub fn render(frame: &mut Frame, app: &mut App) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(1)])
        .split(frame.area());

    let panes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(rows[0]);

    render_browser(frame, panes[0], app);
    render_info(frame, panes[1], app);

    let footer = match &app.status_message {
        Some((message, _)) => Line::from(Span::styled(
            message.clone(),
            Style::default().fg(Color::Yellow),
        )),
        None => Line::from(
            HINTS
                .iter()
                .flat_map(|(key, action)| {
                    [
                        Span::styled(format!("[{}]", key), Style::default().fg(Color::Yellow)),
                        Span::styled(format!(" {}  ", action), Style::default().fg(Color::DarkGray)),
                    ]
                })
                .collect::<Vec<_>>(),
        ),
    };
    frame.render_widget(Paragraph::new(footer), rows[1]);
}
