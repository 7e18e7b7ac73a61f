use std::io::{self, Stdout};
use std::path::PathBuf;
use std::time::Duration;

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::{Frame, Terminal};
use sqlgrid_adapters::export::{write_export, DelimitedExporter};
use sqlgrid_adapters::memory::MemoryRowStore;
use sqlgrid_core::config::GridConfig;
use sqlgrid_core::controller::{GridController, RenderedRow, RowView};
use sqlgrid_core::edit_state::ExportScope;
use sqlgrid_core::events::GridEvent;
use sqlgrid_core::export::{ExportError, Exporter};
use sqlgrid_core::keyboard::{GridKey, KeyStroke};
use sqlgrid_core::range_cache::ResultId;
use sqlgrid_core::row::{CellAddress, CellValue, Column, ColumnKind};
use sqlgrid_core::validation::{coerce_value, display_value};
use sqlgrid_core::view_state::SortDirection;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::{debug, info};

const TICK_RATE: Duration = Duration::from_millis(120);
/// Column 0 is the selection checkbox.
const DATA_COLUMN_START: usize = 1;
/// Header, footer, borders and the column header line.
const CHROME_ROWS: u16 = 10;
const PIXELS_PER_CHAR: u16 = 8;
const ROW_PREFIX_WIDTH: usize = 6;

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
}

#[derive(Debug, Clone)]
pub struct TuiOptions {
    pub rows: usize,
    pub export_dir: PathBuf,
}

#[must_use]
pub fn demo_columns() -> Vec<Column> {
    vec![
        Column::new("id", ColumnKind::Number).primary_key(),
        Column::new("name", ColumnKind::Text)
            .editable()
            .with_header("Name"),
        Column::new("score", ColumnKind::Number)
            .editable()
            .required()
            .with_header("Score"),
        Column::new("active", ColumnKind::Boolean)
            .editable()
            .with_header("Active"),
        Column::new("joined", ColumnKind::Date)
            .editable()
            .with_header("Joined"),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    Grid(KeyStroke),
    Input(char),
    InputBackspace,
    SaveAll,
    Export,
    ToggleAllPages,
    SortFocusedColumn,
}

#[derive(Debug)]
struct TuiApp {
    controller: GridController<MemoryRowStore, MemoryRowStore>,
    runtime: Runtime,
    draft: Option<String>,
    export_dir: PathBuf,
    show_help: bool,
    should_quit: bool,
    status_line: String,
}

impl TuiApp {
    fn new(config: &GridConfig, options: TuiOptions) -> Result<Self, TuiError> {
        let runtime = tokio::runtime::Builder::new_current_thread().build()?;
        let columns = demo_columns();
        let store = MemoryRowStore::synthetic(options.rows, &columns);
        let config = GridConfig {
            estimated_row_height: 1.0,
            ..config.clone()
        };
        let mut controller =
            GridController::new(store.clone(), store, &config, DATA_COLUMN_START);
        controller.open_result(ResultId::new("demo"), options.rows, columns);

        Ok(Self {
            controller,
            runtime,
            draft: None,
            export_dir: options.export_dir,
            show_help: false,
            should_quit: false,
            status_line: format!("Loaded demo result with {} rows", options.rows),
        })
    }

    fn editing(&self) -> bool {
        self.draft.is_some()
    }

    fn resize(&mut self, body_rows: u16) {
        self.controller.set_viewport_height(f64::from(body_rows));
        self.refresh();
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Quit => self.should_quit = true,
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::Grid(stroke) => {
                if let Some(request) = self.runtime.block_on(self.controller.handle_key(stroke)) {
                    debug!(offset = request.offset, behavior = ?request.behavior, "scrolled to focus");
                }
                self.sync_draft();
            }
            Msg::Input(character) => {
                if let Some(draft) = &mut self.draft {
                    draft.push(character);
                }
                self.push_draft();
            }
            Msg::InputBackspace => {
                if let Some(draft) = &mut self.draft {
                    draft.pop();
                }
                self.push_draft();
            }
            Msg::SaveAll => {
                let dirty = self.controller.engine().dirty_count();
                let saved = self.runtime.block_on(self.controller.save_dirty_rows());
                self.status_line = format!("Saved {saved} of {dirty} dirty rows");
            }
            Msg::Export => {
                self.status_line = match self.export() {
                    Ok(path) => format!("Exported to {}", path.display()),
                    Err(error) => error.to_string(),
                };
            }
            Msg::ToggleAllPages => {
                let enabled = !self.controller.engine().selection().is_all_pages();
                self.controller.engine_mut().set_select_all_pages(enabled);
                self.status_line = if enabled {
                    "Selected every row of the result".to_string()
                } else {
                    "Selection limited to checked rows".to_string()
                };
            }
            Msg::SortFocusedColumn => {
                if let Some(column_id) = self.focused_column().map(|column| column.id.clone()) {
                    self.controller.toggle_sort(&column_id);
                    self.status_line = format!("Sorting by {column_id}");
                }
            }
        }
        self.refresh();
    }

    fn refresh(&mut self) {
        self.runtime.block_on(self.controller.sync_window());
        for event in self.controller.take_events() {
            if let GridEvent::SaveFailed { row_id, message } = event {
                self.status_line = format!("Save of {row_id} failed: {message}");
            }
        }
    }

    fn focused_column(&self) -> Option<&Column> {
        let index = self
            .controller
            .cursor()
            .column
            .checked_sub(DATA_COLUMN_START)?;
        self.controller.engine().visible_columns().get(index).copied()
    }

    /// Opens or drops the text draft to match the engine's edit session.
    fn sync_draft(&mut self) {
        match self.controller.engine().editing_session() {
            Some(session) if self.draft.is_none() => {
                self.draft = Some(display_value(&session.draft));
            }
            Some(_) => {}
            None => self.draft = None,
        }
    }

    fn push_draft(&mut self) {
        let Some(text) = &self.draft else {
            return;
        };
        let Some(column) = self
            .controller
            .engine()
            .editing_session()
            .and_then(|session| self.controller.engine().column(&session.address.column_id))
        else {
            return;
        };
        let value = parse_draft(text, column);
        self.controller.engine_mut().update_editing_cell(value);
    }

    fn export(&self) -> Result<PathBuf, TuiError> {
        let scope = if self.controller.engine().selected_count() > 0 {
            ExportScope::Selected
        } else {
            ExportScope::All
        };
        let exporter = DelimitedExporter::csv();
        let bytes = self.controller.export(&exporter, scope)?;
        let path = self
            .export_dir
            .join(format!("sqlgrid-export.{}", exporter.file_extension()));
        write_export(&path, &bytes)?;
        Ok(path)
    }
}

fn parse_draft(text: &str, column: &Column) -> CellValue {
    if text.is_empty() {
        return CellValue::Null;
    }
    coerce_value(column.kind, CellValue::String(text.to_string()))
}

#[must_use]
pub fn ui_name() -> &'static str {
    "sqlgrid-tui"
}

pub fn run(config: &GridConfig, options: TuiOptions) -> Result<(), TuiError> {
    let mut app = TuiApp::new(config, options)?;
    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, &mut app);
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    app: &mut TuiApp,
) -> Result<(), TuiError> {
    let mut body_rows = 0;
    info!("grid session started");

    loop {
        let rows = terminal.size()?.height.saturating_sub(CHROME_ROWS).max(1);
        if rows != body_rows {
            body_rows = rows;
            app.resize(body_rows);
        }

        terminal.draw(|frame| render(frame, app))?;

        if event::poll(TICK_RATE)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(message) = map_key_event(key, app.editing()) {
                        app.handle(message);
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    info!("grid session ended");
    Ok(())
}

fn render(frame: &mut Frame<'_>, app: &TuiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(4),
            Constraint::Length(4),
        ])
        .split(frame.area());

    let engine = app.controller.engine();
    let cache = app.controller.cache();
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" Result: {} ", cache.result_id()),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!("Rows: {}", engine.row_count())),
        Span::raw(" | "),
        Span::raw(format!("Loaded: {}", engine.known_row_count())),
        Span::raw(" | "),
        Span::raw(format!("Fetches: {}", cache.fetch_count())),
        Span::raw(" | "),
        Span::raw(format!(
            "Mode: {}",
            if app.editing() { "editing" } else { "browse" }
        )),
    ]))
    .block(Block::default().borders(Borders::ALL).title("sqlgrid"));
    frame.render_widget(header, chunks[0]);

    let body = Paragraph::new(grid_lines(app, chunks[1]))
        .block(Block::default().borders(Borders::ALL).title("Grid"))
        .alignment(Alignment::Left);
    frame.render_widget(body, chunks[1]);

    let mut counters = format!(
        "Dirty: {} | Invalid: {} | Selected: {} | Saving: {}",
        engine.dirty_count(),
        engine.invalid_cell_count(),
        engine.selected_count(),
        engine.pending_save_count(),
    );
    if let Some(error) = engine.last_save_error() {
        counters.push_str(&format!(" | Last error: {error}"));
    }
    let footer = Paragraph::new(vec![
        Line::from(counters),
        Line::from(format!("Status: {}", app.status_line)),
    ])
    .block(Block::default().borders(Borders::ALL).title("? for help"));
    frame.render_widget(footer, chunks[2]);

    if app.show_help {
        render_help_popup(frame);
    }
}

fn grid_lines(app: &TuiApp, area: Rect) -> Vec<Line<'static>> {
    let engine = app.controller.engine();
    let columns = engine.visible_columns();
    let widths: Vec<usize> = columns
        .iter()
        .map(|column| {
            let pixels = engine
                .column_width(&column.id)
                .unwrap_or(column.default_width);
            usize::from((pixels / PIXELS_PER_CHAR).max(3))
        })
        .collect();

    let mut header = vec![Span::raw(" ".repeat(ROW_PREFIX_WIDTH))];
    for (column, width) in columns.iter().zip(&widths) {
        let mut label = column.header.clone();
        if let Some(key) = engine
            .view()
            .sorting()
            .iter()
            .find(|key| key.column_id == column.id)
        {
            label.push_str(match key.direction {
                SortDirection::Ascending => " ^",
                SortDirection::Descending => " v",
            });
        }
        header.push(Span::styled(
            fit(&label, *width),
            Style::default().add_modifier(Modifier::BOLD),
        ));
    }
    let mut lines = vec![Line::from(header)];

    let frame = app.controller.frame();
    let offset = app.controller.virtualizer().scroll_offset();
    let bottom = offset + app.controller.virtualizer().viewport_height();
    let limit = usize::from(area.height.saturating_sub(3));
    lines.extend(
        frame
            .rows
            .iter()
            .filter(|row| row.start >= offset && row.start + row.size <= bottom)
            .take(limit)
            .map(|row| row_line(app, row, &columns, &widths)),
    );

    if lines.len() == 1 {
        lines.push(Line::from("No rows"));
    }
    lines
}

fn row_line(app: &TuiApp, row: &RenderedRow, columns: &[&Column], widths: &[usize]) -> Line<'static> {
    let prefix = format!(
        "{}{}{} ",
        if row.focused { ">" } else { " " },
        if row.selected { "[x]" } else { "[ ]" },
        if row.dirty { "*" } else { " " },
    );
    let mut spans = vec![Span::raw(prefix)];

    let loaded = match &row.view {
        RowView::Ready(loaded) => loaded,
        RowView::Loading => {
            spans.push(Span::styled("loading...", Style::default().fg(Color::DarkGray)));
            return Line::from(spans);
        }
        RowView::Failed(message) => {
            spans.push(Span::styled(
                format!("! {message}"),
                Style::default().fg(Color::Red),
            ));
            return Line::from(spans);
        }
        RowView::Deleted => {
            spans.push(Span::styled("(deleted)", Style::default().fg(Color::DarkGray)));
            return Line::from(spans);
        }
    };

    let cursor = app.controller.cursor();
    let session = app.controller.engine().editing_session();
    for (index, (column, width)) in columns.iter().zip(widths).enumerate() {
        let address = CellAddress::new(loaded.id.clone(), column.id.clone());
        let editing_here = session.is_some_and(|session| session.address == address);
        let text = match (&app.draft, editing_here) {
            (Some(draft), true) => draft.clone(),
            _ => display_value(loaded.get(&column.id)),
        };

        let mut style = Style::default();
        if row.cell_errors.iter().any(|(column_id, _)| column_id == &column.id) {
            style = style.fg(Color::Red);
        }
        if row.focused && cursor.column == DATA_COLUMN_START + index {
            style = style.add_modifier(Modifier::REVERSED);
        }
        if editing_here {
            style = style.add_modifier(Modifier::UNDERLINED);
        }
        spans.push(Span::styled(fit(&text, *width), style));
    }
    Line::from(spans)
}

fn fit(text: &str, width: usize) -> String {
    let clipped: String = text.chars().take(width.saturating_sub(1)).collect();
    format!("{clipped:<width$}")
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Grid keymap"),
        Line::from("q: quit    ?: toggle help"),
        Line::from("Arrows, PageUp/PageDown, Home/End: move"),
        Line::from("Ctrl+Home / Ctrl+End: first / last row"),
        Line::from("Enter or F2: edit    Enter: commit    Esc: cancel"),
        Line::from("Tab / Shift+Tab: commit and move"),
        Line::from("Delete or Backspace: clear cell"),
        Line::from("Space: toggle row    Ctrl+A: select all pages"),
        Line::from("Ctrl+Z: undo    Ctrl+Y or Ctrl+Shift+Z: redo"),
        Line::from("s: sort by column    Ctrl+S: save dirty rows"),
        Line::from("Ctrl+E: export CSV"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent, editing: bool) -> Option<Msg> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let mut shift = key.modifiers.contains(KeyModifiers::SHIFT);

    if editing {
        match key.code {
            KeyCode::Char(character) if !ctrl => return Some(Msg::Input(character)),
            KeyCode::Backspace => return Some(Msg::InputBackspace),
            _ => {}
        }
    } else {
        match (ctrl, key.code) {
            (false, KeyCode::Char('q')) | (true, KeyCode::Char('c')) => return Some(Msg::Quit),
            (false, KeyCode::Char('?')) => return Some(Msg::ToggleHelp),
            (false, KeyCode::Char('s')) => return Some(Msg::SortFocusedColumn),
            (true, KeyCode::Char('s')) => return Some(Msg::SaveAll),
            (true, KeyCode::Char('e')) => return Some(Msg::Export),
            (true, KeyCode::Char('a')) => return Some(Msg::ToggleAllPages),
            _ => {}
        }
    }

    let grid_key = match key.code {
        KeyCode::Up => GridKey::Up,
        KeyCode::Down => GridKey::Down,
        KeyCode::Left => GridKey::Left,
        KeyCode::Right => GridKey::Right,
        KeyCode::Home => GridKey::Home,
        KeyCode::End => GridKey::End,
        KeyCode::PageUp => GridKey::PageUp,
        KeyCode::PageDown => GridKey::PageDown,
        KeyCode::Enter => GridKey::Enter,
        KeyCode::F(2) => GridKey::F2,
        KeyCode::Esc => GridKey::Escape,
        KeyCode::Delete => GridKey::Delete,
        KeyCode::Backspace => GridKey::Backspace,
        KeyCode::Tab => GridKey::Tab,
        KeyCode::BackTab => {
            shift = true;
            GridKey::Tab
        }
        KeyCode::Char(character) => GridKey::Char(character.to_ascii_lowercase()),
        _ => return None,
    };
    Some(Msg::Grid(KeyStroke {
        key: grid_key,
        ctrl,
        shift,
    }))
}
