//! File browser rendering.

use crate::app::App;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem};
use ratatui::Frame;
use std::path::Path;

/// Renders the directory listing on the left side.
///
/// Also records how many rows fit, so key handling can scroll.
pub fn render_browser(frame: &mut Frame, area: Rect, app: &mut App) {
    let browser = &app.browser;
    let path_str = browser.current_dir.display().to_string();
    let max_width = area.width.saturating_sub(4) as usize;
    let title = if path_str.chars().count() > max_width && max_width > 3 {
        let tail: String = path_str
            .chars()
            .rev()
            .take(max_width - 3)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!(" ...{} ", tail)
    } else {
        format!(" {} ", path_str)
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    let visible_height = inner.height as usize;
    let start_idx = browser.scroll;
    let end_idx = (start_idx + visible_height).min(browser.entries.len());

    let items: Vec<ListItem> = if browser.entries.is_empty() {
        vec![ListItem::new(Line::from(Span::styled(
            "Nothing to play here",
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        )))]
    } else {
        browser.entries[start_idx..end_idx]
            .iter()
            .enumerate()
            .map(|(i, path)| {
                let is_selected = start_idx + i == browser.selected;
                let (icon, name, style) = if path == Path::new("..") {
                    ("[..]", "..".to_string(), Style::default().fg(Color::Blue))
                } else {
                    let name = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("?")
                        .to_string();
                    if path.is_dir() {
                        ("[D] ", name, Style::default().fg(Color::Blue))
                    } else {
                        ("    ", name, Style::default().fg(Color::Green))
                    }
                };
                let style = if is_selected {
                    style.add_modifier(Modifier::REVERSED)
                } else {
                    style
                };
                ListItem::new(Line::from(vec![
                    Span::styled(format!("{} ", icon), Style::default().fg(Color::DarkGray)),
                    Span::styled(name, style),
                ]))
            })
            .collect()
    };

    frame.render_widget(List::new(items).block(block), area);
    app.visible_rows = visible_height.max(1);
}
