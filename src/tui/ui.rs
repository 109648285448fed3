use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table};
use ratatui::Frame;

use super::app::{App, View};
use crate::format::{format_db, format_file_size};
use crate::models::{AnalysisState, EngineStatus, NormalizeState, TrackedFile};

const ACCENT: Color = Color::Cyan;
const DIM: Color = Color::DarkGray;
const COMPLETE_COLOR: Color = Color::Green;
const ERROR_COLOR: Color = Color::Red;
const PROGRESS_COLOR: Color = Color::Yellow;

pub fn render(frame: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(5),    // File table
            Constraint::Length(3), // Summary
            Constraint::Length(1), // Footer
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);
    render_file_table(frame, app, chunks[1]);
    render_summary(frame, app, chunks[2]);
    render_footer(frame, app, chunks[3]);

    if app.view == View::About {
        render_about_overlay(frame);
    }
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let (engine_text, engine_color) = match &app.engine {
        EngineStatus::Loading => ("loading".to_string(), PROGRESS_COLOR),
        EngineStatus::Ready => ("ready".to_string(), COMPLETE_COLOR),
        EngineStatus::Failed(msg) => (format!("failed: {}", msg), ERROR_COLOR),
    };

    let text = vec![Line::from(vec![
        Span::styled("ffmpeg: ", Style::default().fg(DIM)),
        Span::styled(engine_text, Style::default().fg(engine_color)),
        Span::raw("  "),
        Span::styled("Target peak: ", Style::default().fg(DIM)),
        Span::styled(
            format!("{:.1} dB", app.target_peak_db),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled("Output: ", Style::default().fg(DIM)),
        Span::styled(app.out_dir.display().to_string(), Style::default().fg(DIM)),
    ])];

    let block = Block::default()
        .title(Span::styled(
            " Peak Normalizer ",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT));

    frame.render_widget(Paragraph::new(text).block(block), area);
}

fn progress_bar(fraction: f32) -> String {
    let bar_width = 12;
    let filled = ((fraction.clamp(0.0, 1.0) * bar_width as f32) as usize).min(bar_width);
    format!(
        "{}{} {:>3}%",
        "\u{2588}".repeat(filled),
        "\u{2591}".repeat(bar_width - filled),
        (fraction * 100.0).round() as u32
    )
}

fn analysis_cells(file: &TrackedFile) -> (Cell<'static>, Cell<'static>) {
    match &file.analysis {
        AnalysisState::Pending => (
            Cell::from("\u{00b7}").style(Style::default().fg(DIM)),
            Cell::from(""),
        ),
        AnalysisState::Running => (
            Cell::from("analyzing").style(Style::default().fg(PROGRESS_COLOR)),
            Cell::from(""),
        ),
        AnalysisState::Done(result) => (
            Cell::from(format_db(result.peak_db)),
            Cell::from(format_db(result.mean_db)),
        ),
        AnalysisState::Error(msg) => (
            Cell::from("ERR").style(Style::default().fg(ERROR_COLOR)),
            Cell::from(msg.clone()).style(Style::default().fg(ERROR_COLOR)),
        ),
    }
}

fn normalize_cells(file: &TrackedFile) -> (Cell<'static>, Cell<'static>) {
    match &file.normalize {
        NormalizeState::Idle => (
            Cell::from(""),
            Cell::from("\u{00b7}").style(Style::default().fg(DIM)),
        ),
        NormalizeState::Processing => (
            Cell::from(progress_bar(file.normalize_progress))
                .style(Style::default().fg(PROGRESS_COLOR)),
            Cell::from("\u{27f3}").style(Style::default().fg(PROGRESS_COLOR)),
        ),
        NormalizeState::Done(artifact) => (
            Cell::from(artifact.name.clone()).style(Style::default().fg(COMPLETE_COLOR)),
            Cell::from("\u{2713}").style(Style::default().fg(COMPLETE_COLOR)),
        ),
        NormalizeState::Error(msg) => (
            Cell::from(msg.clone()).style(Style::default().fg(ERROR_COLOR)),
            Cell::from("\u{2717}").style(Style::default().fg(ERROR_COLOR)),
        ),
    }
}

fn render_file_table(frame: &mut Frame, app: &mut App, area: Rect) {
    // 2 for borders, 1 for header
    let inner_height = area.height.saturating_sub(3) as usize;
    app.visible_rows = inner_height;

    let total = app.files.len();
    let scroll_info = if total > inner_height {
        format!(
            " [{}-{}/{}] ",
            app.scroll_offset + 1,
            (app.scroll_offset + inner_height).min(total),
            total
        )
    } else {
        String::new()
    };

    let header = Row::new(vec![
        Cell::from("#").style(Style::default().fg(DIM)),
        Cell::from("File").style(Style::default().fg(DIM)),
        Cell::from("Size").style(Style::default().fg(DIM)),
        Cell::from("Peak").style(Style::default().fg(DIM)),
        Cell::from("Mean").style(Style::default().fg(DIM)),
        Cell::from("Normalized").style(Style::default().fg(DIM)),
        Cell::from("").style(Style::default().fg(DIM)),
    ])
    .height(1);

    let end = (app.scroll_offset + inner_height).min(total);
    let visible_slice = &app.files[app.scroll_offset.min(end)..end];

    let rows: Vec<Row> = visible_slice
        .iter()
        .enumerate()
        .map(|(vi, file)| {
            let actual_index = app.scroll_offset + vi;
            let style = if actual_index == app.selected {
                Style::default().bg(Color::DarkGray)
            } else {
                Style::default()
            };
            let (peak, mean) = analysis_cells(file);
            let (output, mark) = normalize_cells(file);
            Row::new(vec![
                Cell::from(format!("{}", actual_index + 1)),
                Cell::from(file.name().to_string()),
                Cell::from(format_file_size(file.source.size)),
                peak,
                mean,
                output,
                mark,
            ])
            .style(style)
        })
        .collect();

    let widths = [
        Constraint::Length(4),
        Constraint::Min(20),
        Constraint::Length(10),
        Constraint::Length(11),
        Constraint::Length(11),
        Constraint::Length(24),
        Constraint::Length(2),
    ];

    let block = Block::default()
        .title(Span::styled(scroll_info, Style::default().fg(DIM)))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT));

    let table = Table::new(rows, widths).header(header).block(block);
    frame.render_widget(table, area);
}

fn render_summary(frame: &mut Frame, app: &App, area: Rect) {
    let status = app.message.clone().unwrap_or_else(|| {
        format!(
            "{} files, {} analyzed, {} normalized",
            app.files.len(),
            app.analyzed_count(),
            app.normalized_count()
        )
    });
    let paragraph = Paragraph::new(status).alignment(Alignment::Center).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(ACCENT)),
    );
    frame.render_widget(paragraph, area);
}

fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
    let keys = match app.view {
        View::Main if app.can_normalize() => {
            "[n]ormalize  [+/-] target  [o]pen  [s]ave  [a]bout  [q]uit"
        }
        View::Main => "[+/-] target  [o]pen  [s]ave  [a]bout  [q]uit",
        View::About => "[Esc] close",
        View::AddPath => {
            let prompt = Line::from(vec![
                Span::styled("Add path: ", Style::default().fg(ACCENT)),
                Span::raw(format!("{}_", app.input)),
                Span::styled("  [Enter] add  [Esc] cancel", Style::default().fg(DIM)),
            ]);
            frame.render_widget(Paragraph::new(prompt), area);
            return;
        }
    };
    let footer = Paragraph::new(keys)
        .style(Style::default().fg(DIM))
        .alignment(Alignment::Center);
    frame.render_widget(footer, area);
}

fn render_about_overlay(frame: &mut Frame) {
    let area = centered_rect(46, 10, frame.area());
    frame.render_widget(Clear, area);

    let text = vec![
        Line::from(Span::styled(
            "Peak Normalizer",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(format!("Version {}", env!("CARGO_PKG_VERSION"))),
        Line::from(""),
        Line::from("Measures MP3 peak volume with ffmpeg"),
        Line::from("and shifts each file onto a target peak."),
        Line::from(""),
        Line::from(Span::styled("[Esc] close", Style::default().fg(DIM))),
    ];

    let block = Block::default()
        .title(" About ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT));

    let paragraph = Paragraph::new(text)
        .alignment(Alignment::Center)
        .block(block);
    frame.render_widget(paragraph, area);
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width.min(area.width), height.min(area.height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0.0), format!("{}   0%", "\u{2591}".repeat(12)));
        assert_eq!(
            progress_bar(0.5),
            format!("{}{}  50%", "\u{2588}".repeat(6), "\u{2591}".repeat(6))
        );
        assert_eq!(progress_bar(1.0), format!("{} 100%", "\u{2588}".repeat(12)));
    }
}
