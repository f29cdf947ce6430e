mod app;
mod commands;
mod filter;
mod logs;
mod registry;
mod transport;
mod view;

use std::{error::Error, io, path::PathBuf};

use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use app::{App, InputMode};
use commands::CommandDispatcher;
use transport::link_loop;
use view::render_ui;

const LINK_QUEUE_CAPACITY: usize = 256;
const OUTBOUND_QUEUE_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct Config {
    pub socket_path: PathBuf,
    /// Channel id this console is scoped to; frames for other zones are
    /// dropped at the link.
    pub zone: String,
    pub client_id: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = load_config();
    init_logging();
    info!(event = "console_start", zone = %config.zone, socket = %config.socket_path.display());

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let mut app = App::new(CommandDispatcher::new(outbound_tx));

    let (link_tx, mut link_rx) = mpsc::channel(LINK_QUEUE_CAPACITY);
    let link_config = config.clone();
    tokio::spawn(async move {
        link_loop(link_config, link_tx, outbound_rx).await;
    });

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut events = EventStream::new();

    loop {
        app.refresh_projection();
        terminal.draw(|frame| render_ui(frame, &app))?;
        tokio::select! {
            Some(event) = link_rx.recv() => {
                app.apply_link_event(event);
            }
            maybe_event = events.next() => {
                if let Some(Ok(event)) = maybe_event {
                    if handle_input(event, &mut app) {
                        break;
                    }
                }
            }
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Returns true when the console should exit.
fn handle_input(event: Event, app: &mut App) -> bool {
    match event {
        Event::Key(key) => handle_key(key, app),
        _ => false,
    }
}

fn handle_key(key: KeyEvent, app: &mut App) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }

    match std::mem::replace(&mut app.input, InputMode::Normal) {
        InputMode::Search(mut buffer) => {
            match key.code {
                KeyCode::Enter => {
                    let query = buffer.clone();
                    app.submit_search(&query);
                }
                KeyCode::Esc => {}
                KeyCode::Backspace => {
                    buffer.pop();
                    app.input = InputMode::Search(buffer);
                }
                KeyCode::Char(c) => {
                    buffer.push(c);
                    app.input = InputMode::Search(buffer);
                }
                _ => app.input = InputMode::Search(buffer),
            }
            return false;
        }
        InputMode::Stdin(mut buffer) => {
            match key.code {
                KeyCode::Enter => {
                    if let Some(identity) = stdin_target(app) {
                        let line = buffer.clone();
                        app.submit_stdin(&identity, &line);
                    }
                }
                KeyCode::Esc => {}
                KeyCode::Backspace => {
                    buffer.pop();
                    app.input = InputMode::Stdin(buffer);
                }
                KeyCode::Char(c) => {
                    buffer.push(c);
                    app.input = InputMode::Stdin(buffer);
                }
                _ => app.input = InputMode::Stdin(buffer),
            }
            return false;
        }
        InputMode::Normal => {}
    }

    if app.help_open {
        // any key dismisses the overlay
        app.help_open = false;
        return false;
    }

    match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Char('?') => app.help_open = true,
        KeyCode::Up | KeyCode::Char('k') => app.move_cursor(-1),
        KeyCode::Down | KeyCode::Char('j') => app.move_cursor(1),
        KeyCode::Enter => {
            if let Some(identity) = app.cursor_identity() {
                app.open_detail(&identity);
            }
        }
        KeyCode::Char('l') => {
            if let Some(identity) = app.cursor_identity() {
                app.open_detail(&identity);
                app.request_logs(&identity);
            }
        }
        KeyCode::Char('t') => {
            if let Some(identity) = app.cursor_identity() {
                app.terminate(&identity, false);
            }
        }
        KeyCode::Char('K') => {
            if let Some(identity) = app.cursor_identity() {
                app.terminate(&identity, true);
            }
        }
        KeyCode::Char('/') => app.input = InputMode::Search(String::new()),
        KeyCode::Char('i') => {
            if stdin_target(app).is_some() {
                app.input = InputMode::Stdin(String::new());
            } else {
                app.notice = Some("no entity selected for stdin".to_string());
            }
        }
        KeyCode::Esc => app.notice = None,
        _ => {}
    }
    false
}

fn stdin_target(app: &App) -> Option<String> {
    app.selected.clone().or_else(|| app.cursor_identity())
}

fn load_config() -> Config {
    let zone = resolve_zone();
    let socket_path = resolve_socket_path(&zone);
    let client_id = format!("fdc-{}", std::process::id());
    Config {
        socket_path,
        zone,
        client_id,
    }
}

fn resolve_zone() -> String {
    match std::env::var("FDC_ZONE") {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => format!("pid-{}", std::process::id()),
    }
}

fn resolve_socket_path(zone: &str) -> PathBuf {
    if let Ok(value) = std::env::var("FDC_LINK_SOCKET") {
        if !value.trim().is_empty() {
            return PathBuf::from(value);
        }
    }
    let runtime_dir = match std::env::var("XDG_RUNTIME_DIR") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => PathBuf::from("/tmp"),
    };
    runtime_dir.join(format!("fdc-{zone}.sock"))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_enabled = matches!(
        std::env::var("FDC_LOG_STDOUT").ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    );
    // stdout belongs to the terminal UI; logs go to a sink unless asked for
    if stdout_enabled {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}
