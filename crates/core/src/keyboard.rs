//! Keyboard cursor for the grid. The cursor is independent of which rows are
//! rendered; the controller turns each [`NavCommand`] into engine
//! operations and scrolls the focused row into view.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridKey {
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Enter,
    F2,
    Escape,
    Delete,
    Backspace,
    Tab,
    Char(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub key: GridKey,
    /// Ctrl on Linux/Windows, Cmd on macOS.
    pub ctrl: bool,
    pub shift: bool,
}

impl KeyStroke {
    #[must_use]
    pub fn plain(key: GridKey) -> Self {
        Self {
            key,
            ctrl: false,
            shift: false,
        }
    }

    #[must_use]
    pub fn ctrl(key: GridKey) -> Self {
        Self {
            key,
            ctrl: true,
            shift: false,
        }
    }

    #[must_use]
    pub fn shift(key: GridKey) -> Self {
        Self {
            key,
            ctrl: false,
            shift: true,
        }
    }

    #[must_use]
    pub fn ctrl_shift(key: GridKey) -> Self {
        Self {
            key,
            ctrl: true,
            shift: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub row: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavContext {
    pub row_count: usize,
    pub column_count: usize,
    /// Rows moved by PageUp/PageDown.
    pub page_rows: usize,
    pub editing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavCommand {
    Moved(Cursor),
    StartEdit(Cursor),
    CommitEdit { then: Option<Cursor> },
    CancelEdit,
    ClearCell(Cursor),
    ToggleSelection(usize),
    Undo,
    Redo,
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct KeyboardNavigator {
    cursor: Cursor,
    data_column_start: usize,
}

impl KeyboardNavigator {
    /// `data_column_start` counts leading non-data columns (e.g. a selection
    /// checkbox column) that can be focused but never edited.
    #[must_use]
    pub fn new(data_column_start: usize) -> Self {
        Self {
            cursor: Cursor::default(),
            data_column_start,
        }
    }

    #[must_use]
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    #[must_use]
    pub fn data_column_start(&self) -> usize {
        self.data_column_start
    }

    #[must_use]
    pub fn is_data_column(&self, column: usize) -> bool {
        column >= self.data_column_start
    }

    pub fn focus(&mut self, cursor: Cursor, row_count: usize, column_count: usize) -> Cursor {
        self.cursor = clamp(cursor, row_count, column_count);
        self.cursor
    }

    pub fn reset(&mut self) {
        self.cursor = Cursor::default();
    }

    pub fn handle(&mut self, stroke: KeyStroke, context: NavContext) -> NavCommand {
        if let Some(command) = history_command(stroke) {
            return if context.editing {
                NavCommand::Ignored
            } else {
                command
            };
        }
        if context.editing {
            return self.handle_editing(stroke, context);
        }
        if context.row_count == 0 || context.column_count == 0 {
            return NavCommand::Ignored;
        }

        let Cursor { row, column } = self.cursor;
        let last_row = context.row_count - 1;
        let last_column = context.column_count - 1;
        let target = match stroke.key {
            GridKey::Up => Cursor { row: row.saturating_sub(1), column },
            GridKey::Down => Cursor { row: row + 1, column },
            GridKey::Left => Cursor {
                row,
                column: column
                    .saturating_sub(1)
                    .max(self.data_column_start.min(column)),
            },
            GridKey::Right => Cursor { row, column: column + 1 },
            GridKey::PageUp => Cursor {
                row: row.saturating_sub(context.page_rows.max(1)),
                column,
            },
            GridKey::PageDown => Cursor {
                row: row + context.page_rows.max(1),
                column,
            },
            GridKey::Home if stroke.ctrl => Cursor { row: 0, column },
            GridKey::End if stroke.ctrl => Cursor { row: last_row, column },
            GridKey::Home => Cursor {
                row,
                column: self.data_column_start.min(last_column),
            },
            GridKey::End => Cursor { row, column: last_column },
            GridKey::Tab => self.tab_target(stroke.shift, context),
            GridKey::Enter | GridKey::F2 => {
                return self.on_data_cell(NavCommand::StartEdit(self.cursor));
            }
            GridKey::Delete | GridKey::Backspace => {
                return self.on_data_cell(NavCommand::ClearCell(self.cursor));
            }
            GridKey::Char(' ') => return NavCommand::ToggleSelection(row.min(last_row)),
            GridKey::Escape | GridKey::Char(_) => return NavCommand::Ignored,
        };

        self.cursor = clamp(target, context.row_count, context.column_count);
        NavCommand::Moved(self.cursor)
    }

    fn handle_editing(&mut self, stroke: KeyStroke, context: NavContext) -> NavCommand {
        match stroke.key {
            GridKey::Escape => NavCommand::CancelEdit,
            GridKey::Enter => NavCommand::CommitEdit { then: None },
            GridKey::Tab if context.row_count > 0 && context.column_count > 0 => {
                let target = clamp(
                    self.tab_target(stroke.shift, context),
                    context.row_count,
                    context.column_count,
                );
                self.cursor = target;
                NavCommand::CommitEdit { then: Some(target) }
            }
            _ => NavCommand::Ignored,
        }
    }

    /// Tab walks data columns only and wraps onto the next/previous row.
    fn tab_target(&self, backwards: bool, context: NavContext) -> Cursor {
        let first = self.data_column_start.min(context.column_count - 1);
        let last = context.column_count - 1;
        let Cursor { row, column } = self.cursor;
        let column = column.max(first);

        if backwards {
            if column > first {
                Cursor { row, column: column - 1 }
            } else if row > 0 {
                Cursor { row: row - 1, column: last }
            } else {
                Cursor { row, column }
            }
        } else if column < last {
            Cursor { row, column: column + 1 }
        } else if row + 1 < context.row_count {
            Cursor { row: row + 1, column: first }
        } else {
            Cursor { row, column }
        }
    }

    fn on_data_cell(&self, command: NavCommand) -> NavCommand {
        if self.is_data_column(self.cursor.column) {
            command
        } else {
            NavCommand::Ignored
        }
    }
}

fn history_command(stroke: KeyStroke) -> Option<NavCommand> {
    if !stroke.ctrl {
        return None;
    }
    match stroke.key {
        GridKey::Char('z' | 'Z') if stroke.shift => Some(NavCommand::Redo),
        GridKey::Char('z' | 'Z') => Some(NavCommand::Undo),
        GridKey::Char('y' | 'Y') => Some(NavCommand::Redo),
        _ => None,
    }
}

fn clamp(cursor: Cursor, row_count: usize, column_count: usize) -> Cursor {
    Cursor {
        row: cursor.row.min(row_count.saturating_sub(1)),
        column: cursor.column.min(column_count.saturating_sub(1)),
    }
}
