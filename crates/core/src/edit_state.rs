//! Single owner of a table's rows and everything derived from them: edit
//! session, dirty rows, validation errors, selection, view state and undo
//! history. Other components read counts from it and route every mutation
//! through its operations.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::events::{EventQueue, GridEvent};
use crate::history::{UndoEntry, UndoHistory};
use crate::persistence::{CellChange, PersistenceError, SaveTicket};
use crate::row::{CellAddress, CellValue, Column, RowId, SharedRow};
use crate::selection::SelectionState;
use crate::validation::{coerce_value, CellValidator, TypeValidator};
use crate::view_state::{SortKey, ViewState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    Idle,
    Editing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditSession {
    pub address: CellAddress,
    pub original: CellValue,
    pub draft: CellValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportScope {
    All,
    Selected,
}

#[derive(Debug, Clone)]
struct RowRecord {
    current: SharedRow,
    baseline: SharedRow,
}

pub struct EditStateEngine {
    columns: Vec<Column>,
    validators: HashMap<String, Box<dyn CellValidator>>,
    total_rows: usize,
    records: HashMap<RowId, RowRecord>,
    positions: BTreeMap<usize, RowId>,
    deleted: HashSet<RowId>,
    display: Option<Vec<RowId>>,
    view: ViewState,
    selection: SelectionState,
    session: Option<EditSession>,
    dirty: BTreeSet<RowId>,
    invalid: BTreeMap<CellAddress, String>,
    save_errors: BTreeMap<CellAddress, String>,
    last_save_error: Option<String>,
    history: UndoHistory,
    next_ticket: u64,
    in_flight: HashMap<u64, RowId>,
    issued: HashMap<CellAddress, u64>,
    confirmed: HashMap<CellAddress, u64>,
    events: EventQueue,
}

impl fmt::Debug for EditStateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditStateEngine")
            .field("columns", &self.columns.len())
            .field("total_rows", &self.total_rows)
            .field("known_rows", &self.records.len())
            .field("dirty", &self.dirty.len())
            .field("invalid", &self.invalid.len())
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl EditStateEngine {
    #[must_use]
    pub fn new(columns: Vec<Column>, max_undo_depth: usize) -> Self {
        Self {
            columns,
            validators: HashMap::new(),
            total_rows: 0,
            records: HashMap::new(),
            positions: BTreeMap::new(),
            deleted: HashSet::new(),
            display: None,
            view: ViewState::default(),
            selection: SelectionState::default(),
            session: None,
            dirty: BTreeSet::new(),
            invalid: BTreeMap::new(),
            save_errors: BTreeMap::new(),
            last_save_error: None,
            history: UndoHistory::new(max_undo_depth),
            next_ticket: 1,
            in_flight: HashMap::new(),
            issued: HashMap::new(),
            confirmed: HashMap::new(),
            events: EventQueue::default(),
        }
    }

    // ── Row set lifecycle ─────────────────────────────────────────────

    /// Re-points the engine at a new result set and drops all per-row state.
    pub fn replace_result(&mut self, total_rows: usize, columns: Vec<Column>) {
        self.total_rows = total_rows;
        self.columns = columns;
        self.validators
            .retain(|column_id, _| self.columns.iter().any(|column| &column.id == column_id));
        self.view = ViewState::default();
        self.reset_rows();
        self.events.push(GridEvent::ColumnsChanged);
    }

    /// Replaces the column set wholesale; rows loaded for the old columns are
    /// dropped along with their state.
    pub fn replace_columns(&mut self, columns: Vec<Column>) {
        let total_rows = self.total_rows;
        self.replace_result(total_rows, columns);
    }

    fn reset_rows(&mut self) {
        let had_dirty = !self.dirty.is_empty();
        let had_selection = !self.selection.is_empty();
        let had_session = self.session.is_some();

        self.records.clear();
        self.positions.clear();
        self.deleted.clear();
        self.display = None;
        self.selection.clear();
        self.session = None;
        self.dirty.clear();
        self.invalid.clear();
        self.save_errors.clear();
        self.last_save_error = None;
        self.history.clear();
        self.in_flight.clear();
        self.issued.clear();
        self.confirmed.clear();

        self.events.push(GridEvent::DataChanged);
        if had_dirty {
            self.events.push(GridEvent::DirtyRowsChanged);
        }
        if had_selection {
            self.events.push(GridEvent::SelectionChanged);
        }
        if had_session {
            self.events.push(GridEvent::EditStateChanged);
        }
    }

    /// Adds freshly loaded rows at their result indices. Rows the engine
    /// already knows keep their current state.
    pub fn merge_rows(&mut self, start_index: usize, rows: &[SharedRow]) {
        let mut changed = false;
        for (offset, row) in rows.iter().enumerate() {
            if self.deleted.contains(&row.id) {
                continue;
            }
            self.positions.insert(start_index + offset, row.id.clone());
            if !self.records.contains_key(&row.id) {
                self.records.insert(
                    row.id.clone(),
                    RowRecord {
                        current: Arc::clone(row),
                        baseline: Arc::clone(row),
                    },
                );
                changed = true;
            }
        }
        if changed {
            self.refresh_display();
            self.events.push(GridEvent::DataChanged);
        }
    }

    /// Removes a row (after the host deleted it remotely) and prunes every
    /// piece of state that referenced it.
    pub fn delete_row(&mut self, row_id: &RowId) -> bool {
        if self.records.remove(row_id).is_none() {
            debug!(%row_id, "delete of unknown row ignored");
            return false;
        }
        self.deleted.insert(row_id.clone());
        self.positions.retain(|_, id| id != row_id);
        self.history.forget_row(row_id);
        self.invalid.retain(|address, _| &address.row_id != row_id);
        self.save_errors.retain(|address, _| &address.row_id != row_id);
        self.issued.retain(|address, _| &address.row_id != row_id);
        self.confirmed.retain(|address, _| &address.row_id != row_id);
        self.in_flight.retain(|_, id| id != row_id);
        if self
            .session
            .as_ref()
            .is_some_and(|session| &session.address.row_id == row_id)
        {
            self.session = None;
            self.events.push(GridEvent::EditStateChanged);
        }
        if self.dirty.remove(row_id) {
            self.events.push(GridEvent::DirtyRowsChanged);
        }
        if self.selection.forget(row_id) {
            self.events.push(GridEvent::SelectionChanged);
        }
        self.refresh_display();
        self.events.push(GridEvent::DataChanged);
        true
    }

    // ── Reads ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, column_id: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.id == column_id)
    }

    #[must_use]
    pub fn visible_columns(&self) -> Vec<&Column> {
        self.columns
            .iter()
            .filter(|column| self.view.is_column_visible(&column.id))
            .collect()
    }

    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    #[must_use]
    pub fn known_row_count(&self) -> usize {
        self.records.len()
    }

    /// Rows the virtualizer should lay out: the local projection while
    /// sorting or filtering, otherwise the whole remote result.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.display
            .as_ref()
            .map_or(self.total_rows, std::vec::Vec::len)
    }

    #[must_use]
    pub fn is_local_view(&self) -> bool {
        self.display.is_some()
    }

    #[must_use]
    pub fn row_id_at(&self, index: usize) -> Option<&RowId> {
        match &self.display {
            Some(display) => display.get(index),
            None => self.positions.get(&index),
        }
    }

    #[must_use]
    pub fn row(&self, row_id: &RowId) -> Option<&SharedRow> {
        self.records.get(row_id).map(|record| &record.current)
    }

    #[must_use]
    pub fn baseline(&self, row_id: &RowId) -> Option<&SharedRow> {
        self.records.get(row_id).map(|record| &record.baseline)
    }

    #[must_use]
    pub fn is_deleted(&self, row_id: &RowId) -> bool {
        self.deleted.contains(row_id)
    }

    #[must_use]
    pub fn view(&self) -> &ViewState {
        &self.view
    }

    #[must_use]
    pub fn edit_state(&self) -> EditState {
        if self.session.is_some() {
            EditState::Editing
        } else {
            EditState::Idle
        }
    }

    #[must_use]
    pub fn editing_session(&self) -> Option<&EditSession> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn is_dirty(&self, row_id: &RowId) -> bool {
        self.dirty.contains(row_id)
    }

    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    #[must_use]
    pub fn dirty_row_ids(&self) -> Vec<RowId> {
        self.dirty.iter().cloned().collect()
    }

    #[must_use]
    pub fn invalid_cell_count(&self) -> usize {
        self.invalid.len()
    }

    /// Validation error for the cell, falling back to its last save error.
    #[must_use]
    pub fn cell_error(&self, address: &CellAddress) -> Option<&str> {
        self.invalid
            .get(address)
            .or_else(|| self.save_errors.get(address))
            .map(String::as_str)
    }

    #[must_use]
    pub fn row_error(&self, row_id: &RowId) -> Option<&str> {
        self.save_errors
            .iter()
            .find(|(address, _)| &address.row_id == row_id)
            .map(|(_, message)| message.as_str())
    }

    #[must_use]
    pub fn last_save_error(&self) -> Option<&str> {
        self.last_save_error.as_deref()
    }

    #[must_use]
    pub fn pending_save_count(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn take_events(&mut self) -> Vec<GridEvent> {
        self.events.drain()
    }

    // ── Validation ────────────────────────────────────────────────────

    pub fn set_validator(&mut self, column_id: impl Into<String>, validator: Box<dyn CellValidator>) {
        self.validators.insert(column_id.into(), validator);
    }

    fn validate(&self, column: &Column, value: &CellValue) -> Result<(), String> {
        match self.validators.get(&column.id) {
            Some(validator) => validator.validate(value),
            None => TypeValidator::for_column(column).validate(value),
        }
    }

    // ── Edit lifecycle ────────────────────────────────────────────────

    fn editable_column(&self, address: &CellAddress) -> Option<&Column> {
        if !self.records.contains_key(&address.row_id) {
            debug!(%address, "edit on unknown row ignored");
            return None;
        }
        match self.column(&address.column_id) {
            Some(column) if column.editable => Some(column),
            _ => {
                debug!(%address, "edit on non-editable column ignored");
                None
            }
        }
    }

    /// Opens an edit session; any other open session is cancelled, never
    /// committed. Non-editable columns and unknown rows are a no-op.
    pub fn start_editing(
        &mut self,
        row_id: &RowId,
        column_id: &str,
        current_value: CellValue,
    ) -> bool {
        let address = CellAddress::new(row_id.clone(), column_id);
        if self.editable_column(&address).is_none() {
            return false;
        }
        self.cancel_editing();

        let original = self
            .row(row_id)
            .map(|row| row.get(column_id).clone())
            .unwrap_or_default();
        debug!(%address, "edit started");
        self.session = Some(EditSession {
            address,
            original,
            draft: current_value,
        });
        self.events.push(GridEvent::EditStateChanged);
        true
    }

    pub fn update_editing_cell(&mut self, draft: CellValue) {
        if let Some(session) = &mut self.session {
            session.draft = draft;
        }
    }

    /// Validates and commits the draft, converted to the column's kind
    /// first when it is typed text. An invalid draft keeps the session
    /// open and records the error. A valid one is applied optimistically
    /// and returns the ticket the caller must persist and complete.
    pub fn save_editing(&mut self) -> Option<SaveTicket> {
        let session = self.session.clone()?;
        let Some(column) = self.editable_column(&session.address).cloned() else {
            self.session = None;
            self.events.push(GridEvent::EditStateChanged);
            return None;
        };

        let value = coerce_value(column.kind, session.draft);
        if let Err(message) = self.validate(&column, &value) {
            debug!(address = %session.address, %message, "draft rejected by validator");
            self.invalid.insert(session.address, message);
            return None;
        }

        self.invalid.remove(&session.address);
        self.session = None;
        self.events.push(GridEvent::EditStateChanged);
        self.commit_cell(&session.address, value)
    }

    pub fn cancel_editing(&mut self) {
        if let Some(session) = self.session.take() {
            self.invalid.remove(&session.address);
            debug!(address = %session.address, "edit cancelled");
            self.events.push(GridEvent::EditStateChanged);
        }
    }

    /// Sets the cell to null through the regular commit path.
    pub fn clear_cell(&mut self, address: &CellAddress) -> Option<SaveTicket> {
        let column = self.editable_column(address)?.clone();
        if self
            .session
            .as_ref()
            .is_some_and(|session| &session.address == address)
        {
            self.cancel_editing();
        }
        if let Err(message) = self.validate(&column, &CellValue::Null) {
            self.invalid.insert(address.clone(), message);
            return None;
        }
        self.invalid.remove(address);
        self.commit_cell(address, CellValue::Null)
    }

    pub fn clear_cells(&mut self, addresses: &[CellAddress]) -> Vec<SaveTicket> {
        addresses
            .iter()
            .filter_map(|address| self.clear_cell(address))
            .collect()
    }

    fn commit_cell(&mut self, address: &CellAddress, value: CellValue) -> Option<SaveTicket> {
        let record = self.records.get_mut(&address.row_id)?;
        let previous = record.current.get(&address.column_id).clone();
        if previous == value {
            return None;
        }
        record.current = Arc::new(record.current.with_cell(&address.column_id, value.clone()));

        let ticket_id = self.next_ticket_id();
        self.issued.insert(address.clone(), ticket_id);
        self.in_flight.insert(ticket_id, address.row_id.clone());
        self.history.record(UndoEntry {
            address: address.clone(),
            previous: previous.clone(),
            next: value.clone(),
            ticket: Some(ticket_id),
        });
        self.recompute_dirty(&address.row_id);
        self.after_row_mutation();
        debug!(%address, ticket = ticket_id, "cell committed");

        Some(SaveTicket {
            id: ticket_id,
            row_id: address.row_id.clone(),
            changes: vec![CellChange {
                column_id: address.column_id.clone(),
                previous,
                value,
            }],
        })
    }

    /// Batches every editable cell that differs from its baseline into one
    /// save ticket.
    pub fn begin_row_save(&mut self, row_id: &RowId) -> Option<SaveTicket> {
        let record = self.records.get(row_id)?;
        let changes: Vec<CellChange> = self
            .columns
            .iter()
            .filter(|column| column.editable)
            .filter_map(|column| {
                let value = record.current.get(&column.id);
                let baseline = record.baseline.get(&column.id);
                (value != baseline).then(|| CellChange {
                    column_id: column.id.clone(),
                    previous: baseline.clone(),
                    value: value.clone(),
                })
            })
            .collect();
        if changes.is_empty() {
            return None;
        }

        let ticket_id = self.next_ticket_id();
        for change in &changes {
            self.issued
                .insert(CellAddress::new(row_id.clone(), change.column_id.clone()), ticket_id);
        }
        self.in_flight.insert(ticket_id, row_id.clone());
        Some(SaveTicket {
            id: ticket_id,
            row_id: row_id.clone(),
            changes,
        })
    }

    /// Reconciles a save outcome against the row as it is now. Success moves
    /// the baseline forward unless a newer save for the cell was already
    /// confirmed. Failure rolls a cell back only if no newer value has
    /// been written since this ticket was issued.
    pub fn complete_save(&mut self, ticket: &SaveTicket, outcome: Result<(), PersistenceError>) {
        if self.in_flight.remove(&ticket.id).is_none() {
            debug!(ticket = ticket.id, "completion for unknown save ignored");
            return;
        }
        if !self.records.contains_key(&ticket.row_id) {
            debug!(row_id = %ticket.row_id, "save completed for a row that is gone");
            return;
        }

        match outcome {
            Ok(()) => self.confirm_save(ticket),
            Err(error) => self.roll_back_save(ticket, &error),
        }
        self.recompute_dirty(&ticket.row_id);
    }

    fn confirm_save(&mut self, ticket: &SaveTicket) {
        let Some(record) = self.records.get_mut(&ticket.row_id) else {
            return;
        };
        let mut baseline = (*record.baseline).clone();
        for change in &ticket.changes {
            let address = CellAddress::new(ticket.row_id.clone(), change.column_id.clone());
            let newer_confirmed = self
                .confirmed
                .get(&address)
                .is_some_and(|confirmed| *confirmed > ticket.id);
            if newer_confirmed {
                continue;
            }
            baseline.cells.insert(change.column_id.clone(), change.value.clone());
            self.confirmed.insert(address.clone(), ticket.id);
            self.save_errors.remove(&address);
        }
        record.baseline = Arc::new(baseline);
    }

    fn roll_back_save(&mut self, ticket: &SaveTicket, error: &PersistenceError) {
        let message = error.to_string();
        let mut rolled_back = false;
        let mut reported = false;
        for change in &ticket.changes {
            let address = CellAddress::new(ticket.row_id.clone(), change.column_id.clone());
            let is_latest = self.issued.get(&address) == Some(&ticket.id);
            let superseded = !is_latest
                && self
                    .confirmed
                    .get(&address)
                    .is_some_and(|confirmed| *confirmed > ticket.id);
            if superseded {
                debug!(%address, ticket = ticket.id, "failure superseded by a confirmed save");
                continue;
            }
            self.save_errors.insert(address.clone(), message.clone());
            reported = true;

            let Some(record) = self.records.get_mut(&ticket.row_id) else {
                continue;
            };
            if is_latest && record.current.get(&change.column_id) == &change.value {
                record.current =
                    Arc::new(record.current.with_cell(&change.column_id, change.previous.clone()));
                rolled_back = true;
            }
        }
        if rolled_back {
            self.history.discard_ticket(ticket.id);
            self.after_row_mutation();
        }
        if !reported {
            return;
        }

        warn!(row_id = %ticket.row_id, ticket = ticket.id, %message, "row save failed");
        self.last_save_error = Some(message.clone());
        self.events.push(GridEvent::SaveFailed {
            row_id: ticket.row_id.clone(),
            message,
        });
    }

    fn next_ticket_id(&mut self) -> u64 {
        let id = self.next_ticket;
        self.next_ticket += 1;
        id
    }

    // ── Undo / redo ───────────────────────────────────────────────────

    /// Applies the inverse of the latest commit locally. Nothing is
    /// persisted; the row becomes dirty relative to its baseline.
    pub fn undo(&mut self) -> bool {
        if self.session.is_some() {
            return false;
        }
        match self.history.undo() {
            Some(patch) => self.apply_patch(&patch),
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        if self.session.is_some() {
            return false;
        }
        match self.history.redo() {
            Some(patch) => self.apply_patch(&patch),
            None => false,
        }
    }

    fn apply_patch(&mut self, patch: &UndoEntry) -> bool {
        let Some(record) = self.records.get_mut(&patch.address.row_id) else {
            debug!(address = %patch.address, "history patch for unknown row dropped");
            return false;
        };
        record.current =
            Arc::new(record.current.with_cell(&patch.address.column_id, patch.next.clone()));
        self.invalid.remove(&patch.address);
        self.recompute_dirty(&patch.address.row_id);
        self.after_row_mutation();
        true
    }

    fn recompute_dirty(&mut self, row_id: &RowId) {
        let is_dirty = self.records.get(row_id).is_some_and(|record| {
            !Arc::ptr_eq(&record.current, &record.baseline)
                && self
                    .columns
                    .iter()
                    .filter(|column| column.editable)
                    .any(|column| record.current.get(&column.id) != record.baseline.get(&column.id))
        });
        let changed = if is_dirty {
            self.dirty.insert(row_id.clone())
        } else {
            self.dirty.remove(row_id)
        };
        if changed {
            self.events.push(GridEvent::DirtyRowsChanged);
        }
    }

    fn after_row_mutation(&mut self) {
        self.refresh_display();
        self.events.push(GridEvent::DataChanged);
    }

    // ── Selection ─────────────────────────────────────────────────────

    #[must_use]
    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    #[must_use]
    pub fn is_selected(&self, row_id: &RowId) -> bool {
        self.selection.is_selected(row_id)
    }

    #[must_use]
    pub fn selected_row_ids(&self) -> Vec<RowId> {
        self.selection.selected_ids().iter().cloned().collect()
    }

    /// In select-all-pages mode this is the size of the remote result.
    #[must_use]
    pub fn selected_count(&self) -> usize {
        if self.selection.is_all_pages() {
            self.total_rows
        } else {
            self.selection.selected_ids().len()
        }
    }

    pub fn toggle_row_selection(&mut self, row_id: &RowId) {
        if !self.records.contains_key(row_id) {
            debug!(%row_id, "selection of unknown row ignored");
            return;
        }
        self.selection.toggle(row_id);
        self.events.push(GridEvent::SelectionChanged);
    }

    pub fn set_row_selected(&mut self, row_id: &RowId, selected: bool) {
        if !self.records.contains_key(row_id) {
            debug!(%row_id, "selection of unknown row ignored");
            return;
        }
        if self.selection.set(row_id, selected) {
            self.events.push(GridEvent::SelectionChanged);
        }
    }

    /// Selects or clears every known row. Select-all-pages mode is left
    /// untouched either way.
    pub fn select_all_rows(&mut self, selected: bool) {
        let ids: Vec<RowId> = if selected {
            self.records.keys().cloned().collect()
        } else {
            Vec::new()
        };
        if self.selection.replace(ids) {
            self.events.push(GridEvent::SelectionChanged);
        }
    }

    pub fn set_select_all_pages(&mut self, enabled: bool) {
        if enabled {
            self.select_all_rows(true);
        }
        if self.selection.set_all_pages(enabled) {
            self.events.push(GridEvent::SelectionChanged);
        }
    }

    // ── View state ────────────────────────────────────────────────────

    pub fn set_sorting(&mut self, sorting: Vec<SortKey>) {
        let sorting = sorting
            .into_iter()
            .filter(|key| self.column(&key.column_id).is_some_and(|column| column.sortable))
            .collect();
        if self.view.set_sorting(sorting) {
            self.view_changed(GridEvent::SortChanged);
        }
    }

    pub fn toggle_sort(&mut self, column_id: &str) {
        if !self.column(column_id).is_some_and(|column| column.sortable) {
            return;
        }
        self.view.toggle_sort(column_id);
        self.view_changed(GridEvent::SortChanged);
    }

    pub fn set_global_filter(&mut self, filter: Option<String>) {
        if self.view.set_global_filter(filter) {
            self.view_changed(GridEvent::FilterChanged);
        }
    }

    pub fn set_column_filter(&mut self, column_id: &str, filter: Option<String>) {
        if !self.column(column_id).is_some_and(|column| column.filterable) {
            return;
        }
        if self.view.set_column_filter(column_id, filter) {
            self.view_changed(GridEvent::FilterChanged);
        }
    }

    pub fn set_column_visibility(&mut self, column_id: &str, visible: bool) {
        if self.column(column_id).is_none() {
            return;
        }
        if self.view.set_column_visibility(column_id, visible) {
            self.events.push(GridEvent::ColumnsChanged);
            if self.view.global_filter().is_some() {
                self.view_changed(GridEvent::FilterChanged);
            }
        }
    }

    #[must_use]
    pub fn column_width(&self, column_id: &str) -> Option<u16> {
        self.column(column_id)
            .map(|column| self.view.column_width(column))
    }

    pub fn set_column_width(&mut self, column_id: &str, width: u16) -> Option<u16> {
        let column = self.column(column_id)?.clone();
        let width = self.view.set_column_width(&column, width);
        self.events.push(GridEvent::ColumnsChanged);
        Some(width)
    }

    /// Drops every user-set width so columns fall back to their defaults.
    pub fn reset_column_widths(&mut self) {
        self.view.reset_sizing();
        self.events.push(GridEvent::ColumnsChanged);
    }

    fn view_changed(&mut self, event: GridEvent) {
        self.refresh_display();
        self.events.push(event);
        self.events.push(GridEvent::DataChanged);
    }

    fn refresh_display(&mut self) {
        if !self.view.is_local_view_active() {
            self.display = None;
            return;
        }
        let mut rows: Vec<&SharedRow> = self
            .positions
            .values()
            .filter_map(|row_id| self.records.get(row_id))
            .map(|record| &record.current)
            .filter(|row| self.view.matches(row, &self.columns))
            .collect();
        rows.sort_by(|left, right| self.view.compare(left, right));
        self.display = Some(rows.into_iter().map(|row| row.id.clone()).collect());
    }

    // ── Export ────────────────────────────────────────────────────────

    /// Current rows in display order, optionally limited to the selection.
    #[must_use]
    pub fn export_rows(&self, scope: ExportScope) -> Vec<SharedRow> {
        let order: Box<dyn Iterator<Item = &RowId>> = match &self.display {
            Some(display) => Box::new(display.iter()),
            None => Box::new(self.positions.values()),
        };
        order
            .filter(|row_id| match scope {
                ExportScope::All => true,
                ExportScope::Selected => self.selection.is_selected(row_id),
            })
            .filter_map(|row_id| self.row(row_id).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{EditState, EditStateEngine, ExportScope};
    use crate::events::GridEvent;
    use crate::persistence::PersistenceError;
    use crate::row::{CellAddress, CellValue, Column, ColumnKind, Row, RowId, SharedRow};
    use crate::validation::FnValidator;
    use crate::view_state::SortKey;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("id", ColumnKind::Number).primary_key(),
            Column::new("name", ColumnKind::Text).editable(),
            Column::new("amount", ColumnKind::Number).editable(),
            Column::new("note", ColumnKind::Text),
        ]
    }

    fn rows(count: usize) -> Vec<SharedRow> {
        (0..count)
            .map(|index| {
                Arc::new(
                    Row::new(format!("r{}", index + 1))
                        .with("id", index + 1)
                        .with("name", format!("name-{}", index + 1))
                        .with("amount", (index as i64 + 1) * 10),
                )
            })
            .collect()
    }

    fn engine(count: usize) -> EditStateEngine {
        let mut engine = EditStateEngine::new(columns(), 100);
        engine.replace_result(count, columns());
        engine.merge_rows(0, &rows(count));
        engine.take_events();
        engine
    }

    fn id(raw: &str) -> RowId {
        RowId::new(raw)
    }

    fn amount(engine: &EditStateEngine, row: &str) -> CellValue {
        engine.row(&id(row)).expect("row").get("amount").clone()
    }

    fn edit(engine: &mut EditStateEngine, row: &str, value: CellValue) -> Option<crate::persistence::SaveTicket> {
        assert!(engine.start_editing(&id(row), "amount", amount(engine, row)));
        engine.update_editing_cell(value);
        engine.save_editing()
    }

    #[test]
    fn basic_edit_then_undo_is_dirty_against_new_baseline() {
        let mut engine = engine(1);

        let ticket = edit(&mut engine, "r1", json!(20)).expect("commit issues a save");
        assert!(engine.is_dirty(&id("r1")));
        engine.complete_save(&ticket, Ok(()));

        assert_eq!(engine.dirty_count(), 0);
        assert_eq!(engine.baseline(&id("r1")).expect("baseline").get("amount"), &json!(20));

        assert!(engine.undo());
        assert_eq!(amount(&engine, "r1"), json!(10));
        assert!(engine.is_dirty(&id("r1")));
    }

    #[test]
    fn failed_save_rolls_back_and_attaches_error() {
        let mut engine = engine(1);
        let ticket = edit(&mut engine, "r1", json!(20)).expect("ticket");
        engine.complete_save(&ticket, Ok(()));

        let ticket = edit(&mut engine, "r1", json!(999)).expect("ticket");
        assert_eq!(amount(&engine, "r1"), json!(999));
        engine.complete_save(&ticket, Err(PersistenceError::new("constraint violated")));

        let address = CellAddress::new("r1", "amount");
        assert_eq!(amount(&engine, "r1"), json!(20));
        assert_eq!(engine.cell_error(&address), Some("constraint violated"));
        assert_eq!(engine.last_save_error(), Some("constraint violated"));
        assert_eq!(engine.dirty_count(), 0);
        assert!(engine.take_events().contains(&GridEvent::SaveFailed {
            row_id: id("r1"),
            message: "constraint violated".to_string(),
        }));
    }

    #[test]
    fn failed_save_does_not_clobber_a_newer_edit() {
        let mut engine = engine(1);
        let first = edit(&mut engine, "r1", json!(11)).expect("first ticket");
        let second = edit(&mut engine, "r1", json!(12)).expect("second ticket");

        engine.complete_save(&first, Err(PersistenceError::new("timeout")));
        assert_eq!(amount(&engine, "r1"), json!(12));

        engine.complete_save(&second, Ok(()));
        assert_eq!(engine.baseline(&id("r1")).expect("baseline").get("amount"), &json!(12));
        assert!(!engine.is_dirty(&id("r1")));
        assert_eq!(engine.cell_error(&CellAddress::new("r1", "amount")), None);
    }

    #[test]
    fn older_failure_after_newer_success_reports_nothing() {
        let mut engine = engine(1);
        let first = edit(&mut engine, "r1", json!(11)).expect("first ticket");
        let second = edit(&mut engine, "r1", json!(12)).expect("second ticket");
        engine.complete_save(&second, Ok(()));
        engine.take_events();

        engine.complete_save(&first, Err(PersistenceError::new("timeout")));

        assert_eq!(amount(&engine, "r1"), json!(12));
        assert_eq!(engine.baseline(&id("r1")).expect("baseline").get("amount"), &json!(12));
        assert!(!engine.is_dirty(&id("r1")));
        assert_eq!(engine.cell_error(&CellAddress::new("r1", "amount")), None);
        assert_eq!(engine.last_save_error(), None);
        assert!(!engine
            .take_events()
            .iter()
            .any(|event| matches!(event, GridEvent::SaveFailed { .. })));
    }

    #[test]
    fn late_success_for_older_save_does_not_regress_baseline() {
        let mut engine = engine(1);
        let first = edit(&mut engine, "r1", json!(11)).expect("first ticket");
        let second = edit(&mut engine, "r1", json!(12)).expect("second ticket");

        engine.complete_save(&second, Ok(()));
        engine.complete_save(&first, Ok(()));

        assert_eq!(engine.baseline(&id("r1")).expect("baseline").get("amount"), &json!(12));
        assert_eq!(amount(&engine, "r1"), json!(12));
        assert_eq!(engine.dirty_count(), 0);
        assert_eq!(engine.pending_save_count(), 0);
    }

    #[test]
    fn invalid_draft_stays_in_editing_state() {
        let mut engine = engine(1);

        assert!(edit(&mut engine, "r1", json!("lots")).is_none());

        assert_eq!(engine.edit_state(), EditState::Editing);
        assert_eq!(engine.invalid_cell_count(), 1);
        assert_eq!(amount(&engine, "r1"), json!(10));

        engine.update_editing_cell(json!(15));
        assert!(engine.save_editing().is_some());
        assert_eq!(engine.invalid_cell_count(), 0);
        assert_eq!(engine.edit_state(), EditState::Idle);
    }

    #[test]
    fn custom_validator_overrides_type_check() {
        let mut engine = engine(1);
        engine.set_validator(
            "amount",
            Box::new(FnValidator(|value: &CellValue| {
                if value.as_i64().is_some_and(|amount| amount <= 100) {
                    Ok(())
                } else {
                    Err("amount over limit".to_string())
                }
            })),
        );

        assert!(edit(&mut engine, "r1", json!(500)).is_none());
        assert_eq!(
            engine.cell_error(&CellAddress::new("r1", "amount")),
            Some("amount over limit")
        );
    }

    #[test]
    fn non_editable_columns_and_unknown_rows_are_ignored() {
        let mut engine = engine(1);

        assert!(!engine.start_editing(&id("r1"), "id", json!(1)));
        assert!(!engine.start_editing(&id("r1"), "note", json!("x")));
        assert!(!engine.start_editing(&id("missing"), "amount", json!(1)));
        assert_eq!(engine.edit_state(), EditState::Idle);
        assert!(engine.clear_cell(&CellAddress::new("r1", "id")).is_none());
    }

    #[test]
    fn starting_a_new_session_cancels_the_previous_one() {
        let mut engine = engine(2);
        engine.start_editing(&id("r1"), "amount", json!(10));
        engine.update_editing_cell(json!(77));

        engine.start_editing(&id("r2"), "amount", json!(20));

        assert_eq!(amount(&engine, "r1"), json!(10));
        assert_eq!(
            engine.editing_session().map(|session| session.address.row_id.clone()),
            Some(id("r2"))
        );
    }

    #[test]
    fn cancel_discards_draft_without_touching_row() {
        let mut engine = engine(1);
        engine.start_editing(&id("r1"), "amount", json!(10));
        engine.update_editing_cell(json!(99));

        engine.cancel_editing();

        assert_eq!(amount(&engine, "r1"), json!(10));
        assert_eq!(engine.edit_state(), EditState::Idle);
        assert!(!engine.can_undo());
    }

    #[test]
    fn editing_back_to_original_clears_dirty() {
        let mut engine = engine(1);
        edit(&mut engine, "r1", json!(30));
        assert!(engine.is_dirty(&id("r1")));

        edit(&mut engine, "r1", json!(10));

        assert!(!engine.is_dirty(&id("r1")));
    }

    #[test]
    fn text_drafts_commit_as_typed_values() {
        let mut engine = engine(1);
        edit(&mut engine, "r1", json!(30));
        assert!(engine.is_dirty(&id("r1")));

        let ticket = edit(&mut engine, "r1", json!(" 10 ")).expect("numeric text commits");

        assert_eq!(amount(&engine, "r1"), json!(10));
        assert_eq!(ticket.changes[0].value, json!(10));
        assert!(!engine.is_dirty(&id("r1")));
    }

    #[test]
    fn undo_then_redo_restores_state_after_commits() {
        let mut engine = engine(3);
        edit(&mut engine, "r1", json!(1));
        edit(&mut engine, "r2", json!(2));
        edit(&mut engine, "r1", json!(3));
        let after: Vec<CellValue> = ["r1", "r2", "r3"].iter().map(|row| amount(&engine, row)).collect();
        let dirty_after = engine.dirty_row_ids();

        for _ in 0..3 {
            assert!(engine.undo());
        }
        assert_eq!(amount(&engine, "r1"), json!(10));
        assert_eq!(engine.dirty_count(), 0);
        for _ in 0..3 {
            assert!(engine.redo());
        }

        let restored: Vec<CellValue> = ["r1", "r2", "r3"].iter().map(|row| amount(&engine, row)).collect();
        assert_eq!(restored, after);
        assert_eq!(engine.dirty_row_ids(), dirty_after);
        assert!(!engine.redo());
    }

    #[test]
    fn undo_on_empty_history_is_a_noop() {
        let mut engine = engine(1);
        assert!(!engine.undo());
        assert!(!engine.redo());
    }

    #[test]
    fn new_commit_clears_redo() {
        let mut engine = engine(1);
        edit(&mut engine, "r1", json!(1));
        engine.undo();
        assert!(engine.can_redo());

        edit(&mut engine, "r1", json!(2));

        assert!(!engine.can_redo());
    }

    #[test]
    fn clear_cell_goes_through_commit_path() {
        let mut engine = engine(1);

        let ticket = engine
            .clear_cell(&CellAddress::new("r1", "name"))
            .expect("clear issues a save");

        assert_eq!(ticket.changes[0].value, CellValue::Null);
        assert!(engine.is_dirty(&id("r1")));
        assert!(engine.undo());
        assert_eq!(engine.row(&id("r1")).expect("row").get("name"), &json!("name-1"));
    }

    #[test]
    fn clearing_a_required_column_is_rejected_by_validation() {
        let mut columns = columns();
        columns[1] = Column::new("name", ColumnKind::Text).editable().required();
        let mut engine = EditStateEngine::new(columns.clone(), 100);
        engine.replace_result(1, columns);
        engine.merge_rows(0, &rows(1));

        assert!(engine.clear_cells(&[CellAddress::new("r1", "name")]).is_empty());
        assert_eq!(engine.invalid_cell_count(), 1);
        assert!(!engine.is_dirty(&id("r1")));
    }

    #[test]
    fn row_save_batches_all_changed_cells_against_baseline() {
        let mut engine = engine(1);
        edit(&mut engine, "r1", json!(5));
        engine.start_editing(&id("r1"), "name", json!("name-1"));
        engine.update_editing_cell(json!("renamed"));
        engine.save_editing();

        let ticket = engine.begin_row_save(&id("r1")).expect("row has changes");
        assert_eq!(ticket.changes.len(), 2);
        assert_eq!(ticket.changes.iter().find(|change| change.column_id == "amount").map(|change| change.previous.clone()), Some(json!(10)));

        engine.complete_save(&ticket, Ok(()));
        assert_eq!(engine.dirty_count(), 0);
        assert!(engine.begin_row_save(&id("r1")).is_none());
    }

    #[test]
    fn selection_tracks_ids_across_sorting() {
        let mut engine = engine(3);
        engine.toggle_row_selection(&id("r1"));
        engine.toggle_row_selection(&id("r3"));

        engine.set_sorting(vec![SortKey::descending("amount")]);

        assert_eq!(engine.row_id_at(0), Some(&id("r3")));
        assert_eq!(engine.selected_row_ids(), vec![id("r1"), id("r3")]);
        assert!(engine.take_events().contains(&GridEvent::SortChanged));
    }

    #[test]
    fn unknown_ids_never_enter_selection() {
        let mut engine = engine(1);
        engine.toggle_row_selection(&id("ghost"));
        engine.set_row_selected(&id("ghost"), true);
        assert_eq!(engine.selected_count(), 0);
    }

    #[test]
    fn select_all_pages_requires_explicit_exit() {
        let mut engine = engine(3);
        engine.replace_result(1_000, columns());
        engine.merge_rows(0, &rows(3));

        engine.set_select_all_pages(true);
        assert_eq!(engine.selected_count(), 1_000);
        engine.select_all_rows(false);
        assert!(engine.selection().is_all_pages());
        assert!(engine.is_selected(&id("r2")));

        engine.set_select_all_pages(false);
        assert_eq!(engine.selected_count(), 0);
    }

    #[test]
    fn filter_projects_local_view_and_clearing_restores_remote_order() {
        let mut engine = engine(20);
        engine.set_global_filter(Some("name-1".to_string()));

        assert!(engine.is_local_view());
        assert_eq!(engine.row_count(), 11);
        engine.set_global_filter(None);
        assert!(!engine.is_local_view());
        assert_eq!(engine.row_count(), 20);
        assert_eq!(engine.row_id_at(4), Some(&id("r5")));
    }

    #[test]
    fn replacing_result_prunes_all_row_state() {
        let mut engine = engine(2);
        edit(&mut engine, "r1", json!(1));
        engine.toggle_row_selection(&id("r2"));

        engine.replace_result(5, columns());

        assert_eq!(engine.dirty_count(), 0);
        assert_eq!(engine.selected_count(), 0);
        assert!(!engine.can_undo());
        assert!(engine.row(&id("r1")).is_none());
        let events = engine.take_events();
        assert!(events.contains(&GridEvent::DirtyRowsChanged));
        assert!(events.contains(&GridEvent::SelectionChanged));
    }

    #[test]
    fn deleting_a_row_prunes_its_state_and_tolerates_late_saves() {
        let mut engine = engine(2);
        let ticket = edit(&mut engine, "r1", json!(1)).expect("ticket");
        engine.toggle_row_selection(&id("r1"));

        assert!(engine.delete_row(&id("r1")));
        engine.complete_save(&ticket, Err(PersistenceError::new("gone")));
        engine.merge_rows(0, &rows(1));

        assert_eq!(engine.dirty_count(), 0);
        assert_eq!(engine.selected_count(), 0);
        assert!(!engine.can_undo());
        assert!(engine.row(&id("r1")).is_none());
        assert!(engine.last_save_error().is_none());
    }

    #[test]
    fn merge_keeps_locally_edited_rows() {
        let mut engine = engine(1);
        edit(&mut engine, "r1", json!(42));

        engine.merge_rows(0, &rows(1));

        assert_eq!(amount(&engine, "r1"), json!(42));
        assert!(engine.is_dirty(&id("r1")));
    }

    #[test]
    fn export_respects_display_order_and_selection() {
        let mut engine = engine(3);
        engine.set_sorting(vec![SortKey::descending("amount")]);
        engine.toggle_row_selection(&id("r1"));

        let all: Vec<String> = engine
            .export_rows(ExportScope::All)
            .iter()
            .map(|row| row.id.to_string())
            .collect();
        let selected = engine.export_rows(ExportScope::Selected);

        assert_eq!(all, vec!["r3", "r2", "r1"]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, id("r1"));
    }

    #[test]
    fn hiding_columns_and_resizing_emit_column_events() {
        let mut engine = engine(1);
        engine.set_column_visibility("note", false);
        assert_eq!(engine.visible_columns().len(), 3);
        assert_eq!(engine.set_column_width("name", 10_000), Some(640));
        assert_eq!(engine.take_events(), vec![GridEvent::ColumnsChanged]);
    }

    #[test]
    fn resetting_widths_restores_column_defaults() {
        let mut engine = engine(1);
        let default_width = engine.column_width("name");
        engine.set_column_width("name", 300);
        engine.take_events();

        engine.reset_column_widths();

        assert_eq!(engine.column_width("name"), default_width);
        assert_eq!(engine.take_events(), vec![GridEvent::ColumnsChanged]);
    }
}
