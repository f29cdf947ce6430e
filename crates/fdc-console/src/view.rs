use fdc_core::EntityStatus;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};

use crate::app::{App, ConnStatus, InputMode};
use crate::registry::EntityRecord;

/// Derived, disposable list handle for one entity. Rebuilt whenever the
/// registry marks the identity dirty; never authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRow {
    pub identity: String,
    pub title: String,
    pub status: EntityStatus,
}

pub fn project_row(record: &EntityRecord) -> EntityRow {
    let title = match (record.attribute_str("game"), record.attribute_str("version")) {
        (Some(game), Some(version)) => format!("{} ({game} @ {version})", record.identity),
        _ => record.identity.clone(),
    };
    EntityRow {
        identity: record.identity.clone(),
        title,
        status: record.status,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Ok,
    Info,
    Warn,
    Critical,
    Muted,
}

/// How one value renders in a key/value table. A closed set selected by
/// `match`, not a decorator lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueCell {
    Plain(String),
    Label { text: String, tone: Tone },
    Icon { glyph: &'static str, text: String },
}

pub fn status_glyph(status: EntityStatus) -> &'static str {
    match status {
        EntityStatus::Loading => "~",
        EntityStatus::Running => ">",
        EntityStatus::Stopped => "#",
        EntityStatus::Error => "!",
    }
}

pub fn status_tone(status: EntityStatus) -> Tone {
    match status {
        EntityStatus::Loading => Tone::Info,
        EntityStatus::Running => Tone::Ok,
        EntityStatus::Stopped => Tone::Muted,
        EntityStatus::Error => Tone::Critical,
    }
}

pub fn conn_cell(conn: &ConnStatus) -> ValueCell {
    match conn {
        ConnStatus::Connecting => ValueCell::Label {
            text: "connecting...".to_string(),
            tone: Tone::Info,
        },
        ConnStatus::Connected => ValueCell::Label {
            text: "connected".to_string(),
            tone: Tone::Ok,
        },
        ConnStatus::Closed { reason } => ValueCell::Label {
            text: format!("closed: {reason}"),
            tone: Tone::Critical,
        },
    }
}

/// Deep link into the external management page for this entity's workload.
pub fn management_link(record: &EntityRecord) -> Option<String> {
    let game = record.attribute_str("game")?;
    let version = record.attribute_str("version")?;
    Some(format!("/service/game/app_version?app={game}&version={version}"))
}

/// Attribute table for the detail panel: the status row first, then every
/// opaque attribute, then the deep link.
pub fn detail_rows(record: &EntityRecord) -> Vec<(String, ValueCell)> {
    let mut rows = vec![(
        "status".to_string(),
        ValueCell::Icon {
            glyph: status_glyph(record.status),
            text: record.status.label().to_string(),
        },
    )];
    for (key, value) in &record.attributes {
        let text = match value.as_str() {
            Some(text) => text.to_string(),
            None => value.to_string(),
        };
        rows.push((key.clone(), ValueCell::Plain(text)));
    }
    if let Some(link) = management_link(record) {
        rows.push(("manage".to_string(), ValueCell::Plain(link)));
    }
    rows
}

#[derive(Clone, Copy)]
pub struct Theme {
    surface: Color,
    border: Color,
    title: Color,
    text: Color,
    muted: Color,
    accent: Color,
    ok: Color,
    warn: Color,
    critical: Color,
    info: Color,
}

fn console_theme() -> Theme {
    Theme {
        surface: Color::Rgb(15, 20, 34),
        border: Color::Rgb(71, 85, 105),
        title: Color::Rgb(191, 219, 254),
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        accent: Color::Rgb(56, 189, 248),
        ok: Color::Rgb(34, 197, 94),
        warn: Color::Rgb(245, 158, 11),
        critical: Color::Rgb(239, 68, 68),
        info: Color::Rgb(59, 130, 246),
    }
}

impl Tone {
    fn color(self, theme: Theme) -> Color {
        match self {
            Tone::Ok => theme.ok,
            Tone::Info => theme.info,
            Tone::Warn => theme.warn,
            Tone::Critical => theme.critical,
            Tone::Muted => theme.muted,
        }
    }
}

fn cell_spans(cell: &ValueCell, theme: Theme) -> Vec<Span<'static>> {
    match cell {
        ValueCell::Plain(text) => vec![Span::styled(
            text.clone(),
            Style::default().fg(theme.text),
        )],
        ValueCell::Label { text, tone } => vec![Span::styled(
            format!("[{text}]"),
            Style::default()
                .fg(tone.color(theme))
                .add_modifier(Modifier::BOLD),
        )],
        ValueCell::Icon { glyph, text } => vec![
            Span::styled(
                (*glyph).to_string(),
                Style::default().fg(theme.accent).add_modifier(Modifier::BOLD),
            ),
            Span::raw(" "),
            Span::styled(text.clone(), Style::default().fg(theme.text)),
        ],
    }
}

pub fn render_ui(frame: &mut ratatui::Frame, app: &App) {
    let theme = console_theme();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(6),
            Constraint::Length(3),
        ])
        .split(frame.size());

    frame.render_widget(render_header(app, theme), chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(36), Constraint::Min(24)])
        .split(chunks[1]);
    render_entity_list(frame, app, theme, body[0]);
    render_detail(frame, app, theme, body[1]);

    frame.render_widget(render_footer(app, theme), chunks[2]);

    if app.help_open {
        render_help_overlay(frame, theme);
    }
}

fn render_header(app: &App, theme: Theme) -> Paragraph<'static> {
    let mut status_spans = vec![Span::styled(
        "link ",
        Style::default().fg(theme.muted),
    )];
    status_spans.extend(cell_spans(&conn_cell(&app.conn), theme));
    if let Some(note) = &app.search_note {
        status_spans.push(Span::raw("  "));
        status_spans.push(Span::styled(
            note.clone(),
            Style::default().fg(theme.accent),
        ));
    }

    let notice_line = match &app.notice {
        Some(notice) => Line::from(Span::styled(
            notice.clone(),
            Style::default().fg(theme.warn),
        )),
        None => Line::from(""),
    };

    Paragraph::new(vec![Line::from(status_spans), notice_line])
        .style(Style::default().fg(theme.text).bg(theme.surface))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.border))
                .title(Span::styled(
                    "Fleet debug console",
                    Style::default()
                        .fg(theme.title)
                        .add_modifier(Modifier::BOLD),
                )),
        )
}

fn render_entity_list(frame: &mut ratatui::Frame, app: &App, theme: Theme, area: Rect) {
    let rows = app.visible_rows();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(Style::default().bg(theme.surface))
        .title(Span::styled(
            format!("Entities ({})", rows.len()),
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ));

    if rows.is_empty() {
        let paragraph = Paragraph::new(Line::from(Span::styled(
            "Entities will appear here when they start.",
            Style::default().fg(theme.muted),
        )))
        .wrap(Wrap { trim: true })
        .block(block);
        frame.render_widget(paragraph, area);
        return;
    }

    let items: Vec<ListItem> = rows
        .iter()
        .map(|row| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    status_glyph(row.status).to_string(),
                    Style::default()
                        .fg(status_tone(row.status).color(theme))
                        .add_modifier(Modifier::BOLD),
                ),
                Span::raw(" "),
                Span::styled(row.title.clone(), Style::default().fg(theme.text)),
            ]))
        })
        .collect();
    let mut state = ListState::default();
    state.select(Some(app.cursor.min(rows.len() - 1)));
    let list = List::new(items)
        .highlight_symbol(">> ")
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .block(block);
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_detail(frame: &mut ratatui::Frame, app: &App, theme: Theme, area: Rect) {
    let record = app
        .selected
        .as_deref()
        .and_then(|identity| app.registry.get(identity));
    let Some(record) = record else {
        let paragraph = Paragraph::new(Line::from(Span::styled(
            "Select an entity to open its panel (enter).",
            Style::default().fg(theme.muted),
        )))
        .block(detail_block(theme, "Detail"));
        frame.render_widget(paragraph, area);
        return;
    };

    let rows = detail_rows(record);
    let show_logs = record.logs.panel_open();
    let chunks = if show_logs {
        Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(rows.len() as u16 + 3),
                Constraint::Min(3),
            ])
            .split(area)
    } else {
        Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3)])
            .split(area)
    };

    let mut lines = Vec::with_capacity(rows.len());
    for (label, cell) in &rows {
        let mut spans = vec![Span::styled(
            format!("{label:<14}"),
            Style::default().fg(theme.muted),
        )];
        spans.extend(cell_spans(cell, theme));
        lines.push(Line::from(spans));
    }
    lines.push(Line::from(Span::styled(
        "l logs  t terminate  K kill  i stdin",
        Style::default().fg(theme.muted),
    )));
    let title = format!("Detail: {}", record.identity);
    frame.render_widget(
        Paragraph::new(lines).block(detail_block(theme, &title)),
        chunks[0],
    );

    if show_logs {
        render_log_pane(frame, record, theme, chunks[1]);
    }
}

fn render_log_pane(frame: &mut ratatui::Frame, record: &EntityRecord, theme: Theme, area: Rect) {
    let visible = area.height.saturating_sub(2) as usize;
    let lines = record.logs.lines();
    let start = lines.len().saturating_sub(visible);
    let body: Vec<Line> = lines[start..]
        .iter()
        .map(|line| Line::from(Span::styled(line.clone(), Style::default().fg(theme.text))))
        .collect();
    frame.render_widget(
        Paragraph::new(body).block(detail_block(theme, "Logs (streaming)")),
        area,
    );
}

fn detail_block(theme: Theme, title: &str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(Style::default().bg(theme.surface))
        .title(Span::styled(
            title.to_string(),
            Style::default()
                .fg(theme.title)
                .add_modifier(Modifier::BOLD),
        ))
}

fn render_footer(app: &App, theme: Theme) -> Paragraph<'static> {
    let line = match &app.input {
        InputMode::Search(buffer) => Line::from(vec![
            Span::styled("search logs: ", Style::default().fg(theme.accent)),
            Span::styled(format!("{buffer}_"), Style::default().fg(theme.text)),
        ]),
        InputMode::Stdin(buffer) => Line::from(vec![
            Span::styled("stdin> ", Style::default().fg(theme.accent)),
            Span::styled(format!("{buffer}_"), Style::default().fg(theme.text)),
        ]),
        InputMode::Normal => Line::from(Span::styled(
            "enter select  l logs  t terminate  K kill  / search  i stdin  ? help  q quit",
            Style::default().fg(theme.muted),
        )),
    };
    Paragraph::new(line)
        .style(Style::default().bg(theme.surface))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.border)),
        )
}

fn render_help_overlay(frame: &mut ratatui::Frame, theme: Theme) {
    let area = centered_rect(60, 60, frame.size());
    let lines = vec![
        Line::from("up/down, j/k   move over visible entities"),
        Line::from("enter          open the detail panel"),
        Line::from("l              stream logs / toggle the log pane"),
        Line::from("t              terminate (graceful)"),
        Line::from("K              kill (hard)"),
        Line::from("/              search logs; empty query clears the filter"),
        Line::from("i              send one line to the entity's stdin"),
        Line::from("q              quit"),
    ];
    frame.render_widget(Clear, area);
    frame.render_widget(
        Paragraph::new(lines)
            .style(Style::default().fg(theme.text).bg(theme.surface))
            .block(detail_block(theme, "Help")),
        area,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
