use tracing::{debug, info};

use crate::config::GridConfig;
use crate::edit_state::{EditSession, EditStateEngine, ExportScope};
use crate::events::GridEvent;
use crate::export::{ExportError, Exporter};
use crate::keyboard::{Cursor, KeyStroke, KeyboardNavigator, NavCommand, NavContext};
use crate::persistence::{RowPersistence, SaveTicket};
use crate::range_cache::{ChunkRequest, RangeCache, ResultId, RowSlot, RowSource, RowSourceError};
use crate::row::{CellAddress, Column, Row, RowId, SharedRow};
use crate::view_state::SortKey;
use crate::virtualizer::{ScrollAlign, ScrollRequest, Virtualizer};

#[derive(Debug, Clone, PartialEq)]
pub enum RowView {
    Ready(SharedRow),
    Loading,
    Failed(String),
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedRow {
    pub index: usize,
    pub start: f64,
    pub size: f64,
    pub view: RowView,
    pub selected: bool,
    pub dirty: bool,
    pub focused: bool,
    /// `(column_id, message)` for every visible cell carrying an error.
    pub cell_errors: Vec<(String, String)>,
}

impl RenderedRow {
    #[must_use]
    pub fn row(&self) -> Option<&SharedRow> {
        match &self.view {
            RowView::Ready(row) => Some(row),
            _ => None,
        }
    }
}

/// Everything a host needs to draw the grid body once.
#[derive(Debug, Clone, PartialEq)]
pub struct GridFrame {
    pub padding_top: f64,
    pub padding_bottom: f64,
    pub total_size: f64,
    pub rows: Vec<RenderedRow>,
    pub focus: Cursor,
    pub editing: Option<EditSession>,
}

/// Composition root for one table: wires the virtual window to the range
/// cache, loaded rows into the edit engine, and keyboard focus back into the
/// virtual window. Hosts keep one instance per table across renders.
#[derive(Debug)]
pub struct GridController<S, P> {
    source: S,
    persistence: P,
    cache: RangeCache,
    virtualizer: Virtualizer,
    engine: EditStateEngine,
    navigator: KeyboardNavigator,
}

impl<S, P> GridController<S, P>
where
    S: RowSource,
    P: RowPersistence,
{
    #[must_use]
    pub fn new(source: S, persistence: P, config: &GridConfig, data_column_start: usize) -> Self {
        let config = config.clone().normalized();
        Self {
            source,
            persistence,
            cache: RangeCache::new(ResultId::new(""), 0, config.chunk_size),
            virtualizer: Virtualizer::new(&config),
            engine: EditStateEngine::new(Vec::new(), config.max_undo_depth),
            navigator: KeyboardNavigator::new(data_column_start),
        }
    }

    /// Points the grid at a new result set. Every per-row state is reset.
    pub fn open_result(&mut self, result_id: ResultId, total_rows: usize, columns: Vec<Column>) {
        info!(%result_id, total_rows, columns = columns.len(), "opening result set");
        self.cache.reset(result_id, total_rows);
        self.engine.replace_result(total_rows, columns);
        self.virtualizer.set_count(total_rows);
        self.virtualizer.reset_measurements();
        self.virtualizer.scroll_to_offset(0.0);
        self.navigator.reset();
    }

    #[must_use]
    pub fn engine(&self) -> &EditStateEngine {
        &self.engine
    }

    /// Direct engine access for operations without layout impact
    /// (selection, validators, column sizing).
    pub fn engine_mut(&mut self) -> &mut EditStateEngine {
        &mut self.engine
    }

    #[must_use]
    pub fn cache(&self) -> &RangeCache {
        &self.cache
    }

    #[must_use]
    pub fn virtualizer(&self) -> &Virtualizer {
        &self.virtualizer
    }

    #[must_use]
    pub fn cursor(&self) -> Cursor {
        self.navigator.cursor()
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    #[must_use]
    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    pub fn take_events(&mut self) -> Vec<GridEvent> {
        self.engine.take_events()
    }

    // ── Viewport ──────────────────────────────────────────────────────

    pub fn set_viewport_height(&mut self, height: f64) {
        self.virtualizer.set_viewport_height(height);
    }

    pub fn scroll_to_offset(&mut self, offset: f64) {
        self.virtualizer.scroll_to_offset(offset);
    }

    pub fn scroll_to_row(&mut self, index: usize, align: ScrollAlign) -> Option<ScrollRequest> {
        self.virtualizer.scroll_to_index(index, align)
    }

    pub fn measure_row(&mut self, index: usize, height: f64) -> bool {
        self.virtualizer.measure(index, height)
    }

    fn sync_row_count(&mut self) {
        let count = self.engine.row_count();
        if count != self.virtualizer.count() {
            self.virtualizer.set_count(count);
        }
    }

    /// Loads whatever the current window still misses and merges it into the
    /// engine. While a local sort/filter projection is active only loaded
    /// rows are shown, so nothing is fetched.
    pub async fn sync_window(&mut self) -> usize {
        self.sync_row_count();
        if self.engine.is_local_view() {
            return 0;
        }
        let Some((start, end)) = self.virtualizer.visible_range() else {
            return 0;
        };

        let loaded = self
            .cache
            .ensure_range_loaded(&self.source, start, end)
            .await;
        let mut merged = 0;
        for chunk in loaded {
            merged += chunk.rows.len();
            self.engine.merge_rows(chunk.start, &chunk.rows);
        }
        merged
    }

    /// First half of a host-driven load: the chunk fetches the current
    /// window needs. Feed each outcome back through [`Self::apply_chunk`].
    pub fn plan_window(&mut self) -> Vec<ChunkRequest> {
        self.sync_row_count();
        if self.engine.is_local_view() {
            return Vec::new();
        }
        match self.virtualizer.visible_range() {
            Some((start, end)) => self.cache.plan_range(start, end),
            None => Vec::new(),
        }
    }

    /// Applies a chunk outcome whenever it arrives. Rows are merged even if
    /// the user scrolled away; the scroll position is left alone.
    pub fn apply_chunk(&mut self, request: &ChunkRequest, outcome: Result<Vec<Row>, RowSourceError>) {
        if let Some(loaded) = self.cache.complete_chunk(request, outcome) {
            self.engine.merge_rows(loaded.start, &loaded.rows);
        }
    }

    #[must_use]
    pub fn frame(&self) -> GridFrame {
        let window = self.virtualizer.window();
        let columns = self.engine.visible_columns();
        let focus = self.navigator.cursor();

        let rows = window
            .items
            .iter()
            .map(|item| {
                let view = self.row_view(item.index);
                let (selected, dirty, cell_errors) = match &view {
                    RowView::Ready(row) => (
                        self.engine.is_selected(&row.id),
                        self.engine.is_dirty(&row.id),
                        columns
                            .iter()
                            .filter_map(|column| {
                                let address = CellAddress::new(row.id.clone(), column.id.clone());
                                self.engine
                                    .cell_error(&address)
                                    .map(|message| (column.id.clone(), message.to_string()))
                            })
                            .collect(),
                    ),
                    _ => (false, false, Vec::new()),
                };
                RenderedRow {
                    index: item.index,
                    start: item.start,
                    size: item.size,
                    view,
                    selected,
                    dirty,
                    focused: focus.row == item.index,
                    cell_errors,
                }
            })
            .collect();

        GridFrame {
            padding_top: window.padding_top,
            padding_bottom: window.padding_bottom,
            total_size: window.total_size,
            rows,
            focus,
            editing: self.engine.editing_session().cloned(),
        }
    }

    fn row_view(&self, index: usize) -> RowView {
        if let Some(row) = self
            .engine
            .row_id_at(index)
            .and_then(|row_id| self.engine.row(row_id))
        {
            return RowView::Ready(row.clone());
        }
        if self.engine.is_local_view() {
            return RowView::Loading;
        }
        match self.cache.slot(index) {
            RowSlot::Ready(row) if self.engine.is_deleted(&row.id) => RowView::Deleted,
            RowSlot::Ready(row) => RowView::Ready(row),
            RowSlot::Loading => RowView::Loading,
            RowSlot::Failed(message) => RowView::Failed(message),
            RowSlot::Absent => RowView::Failed("row not returned by source".to_string()),
        }
    }

    // ── Keyboard ──────────────────────────────────────────────────────

    fn data_column_count(&self) -> usize {
        self.engine.visible_columns().len()
    }

    fn nav_context(&self) -> NavContext {
        NavContext {
            row_count: self.engine.row_count(),
            column_count: self.navigator.data_column_start() + self.data_column_count(),
            page_rows: self.virtualizer.page_rows(),
            editing: self.engine.editing_session().is_some(),
        }
    }

    /// Resolves a cursor to the cell it points at, if that cell is a data
    /// cell of a loaded row.
    #[must_use]
    pub fn address_at(&self, cursor: Cursor) -> Option<CellAddress> {
        let data_index = cursor
            .column
            .checked_sub(self.navigator.data_column_start())?;
        let column = self.engine.visible_columns().get(data_index).copied()?;
        let row_id = self.engine.row_id_at(cursor.row)?;
        Some(CellAddress::new(row_id.clone(), column.id.clone()))
    }

    pub fn focus(&mut self, cursor: Cursor) -> Option<ScrollRequest> {
        let context = self.nav_context();
        let cursor = self
            .navigator
            .focus(cursor, context.row_count, context.column_count);
        self.virtualizer.scroll_into_view(cursor.row)
    }

    /// Routes a key through the navigator and applies the outcome. Every
    /// cursor move scrolls the focused row into view.
    pub async fn handle_key(&mut self, stroke: KeyStroke) -> Option<ScrollRequest> {
        self.sync_row_count();
        let before = self.navigator.cursor();
        let context = self.nav_context();
        let command = self.navigator.handle(stroke, context);
        debug!(?stroke, ?command, "grid key");

        match command {
            NavCommand::Moved(cursor) => self.virtualizer.scroll_into_view(cursor.row),
            NavCommand::StartEdit(cursor) => {
                self.start_edit_at(cursor);
                self.virtualizer.scroll_into_view(cursor.row)
            }
            NavCommand::CommitEdit { then } => {
                if !self.commit_edit().await {
                    self.navigator
                        .focus(before, context.row_count, context.column_count);
                    return None;
                }
                then.and_then(|cursor| self.virtualizer.scroll_into_view(cursor.row))
            }
            NavCommand::CancelEdit => {
                self.engine.cancel_editing();
                None
            }
            NavCommand::ClearCell(cursor) => {
                if let Some(address) = self.address_at(cursor) {
                    if let Some(ticket) = self.engine.clear_cell(&address) {
                        self.persist(ticket).await;
                    }
                }
                None
            }
            NavCommand::ToggleSelection(row) => {
                if let Some(row_id) = self.engine.row_id_at(row).cloned() {
                    self.engine.toggle_row_selection(&row_id);
                }
                None
            }
            NavCommand::Undo => {
                self.engine.undo();
                None
            }
            NavCommand::Redo => {
                self.engine.redo();
                None
            }
            NavCommand::Ignored => None,
        }
    }

    /// Opens an edit session on the cell under `cursor`, seeded with its
    /// current value.
    pub fn start_edit_at(&mut self, cursor: Cursor) -> bool {
        let Some(address) = self.address_at(cursor) else {
            return false;
        };
        let current = self
            .engine
            .row(&address.row_id)
            .map(|row| row.get(&address.column_id).clone())
            .unwrap_or_default();
        self.engine
            .start_editing(&address.row_id, &address.column_id, current)
    }

    // ── Saving ────────────────────────────────────────────────────────

    /// Commits the open edit and awaits its save. Returns `false` when the
    /// draft failed validation and the session is still open.
    pub async fn commit_edit(&mut self) -> bool {
        if self.engine.editing_session().is_none() {
            return true;
        }
        let ticket = self.engine.save_editing();
        if self.engine.editing_session().is_some() {
            return false;
        }
        if let Some(ticket) = ticket {
            self.persist(ticket).await;
        }
        true
    }

    /// Issues one batched save per dirty row. Returns the number of rows that
    /// saved successfully.
    pub async fn save_dirty_rows(&mut self) -> usize {
        let mut saved = 0;
        for row_id in self.engine.dirty_row_ids() {
            if let Some(ticket) = self.engine.begin_row_save(&row_id) {
                if self.persist(ticket).await {
                    saved += 1;
                }
            }
        }
        saved
    }

    async fn persist(&mut self, ticket: SaveTicket) -> bool {
        let outcome = self
            .persistence
            .save_row(&ticket.row_id, &ticket.changes)
            .await;
        let succeeded = outcome.is_ok();
        self.engine.complete_save(&ticket, outcome);
        succeeded
    }

    pub fn delete_row(&mut self, row_id: &RowId) -> bool {
        let deleted = self.engine.delete_row(row_id);
        self.sync_row_count();
        deleted
    }

    // ── View state ────────────────────────────────────────────────────

    pub fn set_sorting(&mut self, sorting: Vec<SortKey>) {
        self.engine.set_sorting(sorting);
        self.after_view_change();
    }

    pub fn toggle_sort(&mut self, column_id: &str) {
        self.engine.toggle_sort(column_id);
        self.after_view_change();
    }

    pub fn set_global_filter(&mut self, filter: Option<String>) {
        self.engine.set_global_filter(filter);
        self.after_view_change();
    }

    pub fn set_column_filter(&mut self, column_id: &str, filter: Option<String>) {
        self.engine.set_column_filter(column_id, filter);
        self.after_view_change();
    }

    pub fn set_column_visibility(&mut self, column_id: &str, visible: bool) {
        self.engine.set_column_visibility(column_id, visible);
        let context = self.nav_context();
        self.navigator
            .focus(self.navigator.cursor(), context.row_count, context.column_count);
        self.sync_row_count();
    }

    fn after_view_change(&mut self) {
        self.sync_row_count();
        self.virtualizer.reset_measurements();
        self.virtualizer.scroll_to_offset(0.0);
        let context = self.nav_context();
        let column = self.navigator.cursor().column;
        self.navigator
            .focus(Cursor { row: 0, column }, context.row_count, context.column_count);
    }

    // ── Export ────────────────────────────────────────────────────────

    pub fn export(&self, exporter: &dyn Exporter, scope: ExportScope) -> Result<Vec<u8>, ExportError> {
        let rows = self.engine.export_rows(scope);
        let columns = self.engine.visible_columns();
        debug!(
            format = exporter.format_name(),
            rows = rows.len(),
            columns = columns.len(),
            "exporting rows"
        );
        exporter.export(&columns, &rows)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use serde_json::json;

    use super::{GridController, RowView};
    use crate::config::GridConfig;
    use crate::edit_state::ExportScope;
    use crate::export::{ExportError, Exporter};
    use crate::keyboard::{Cursor, GridKey, KeyStroke};
    use crate::persistence::{CellChange, PersistenceError, RowPersistence};
    use crate::range_cache::{ResultId, RowSource, RowSourceError};
    use crate::row::{CellAddress, Column, ColumnKind, Row, RowId, SharedRow};
    use crate::view_state::SortKey;
    use crate::virtualizer::{ScrollAlign, ScrollBehavior};

    #[derive(Debug, Default, Clone)]
    struct FakeSource {
        fetches: Arc<Mutex<Vec<(usize, usize)>>>,
        fail: Arc<AtomicBool>,
    }

    impl FakeSource {
        fn fetch_count(&self) -> usize {
            self.fetches.lock().expect("fetch log poisoned").len()
        }
    }

    #[async_trait::async_trait]
    impl RowSource for FakeSource {
        async fn fetch_range(
            &self,
            _result_id: &ResultId,
            start: usize,
            end: usize,
        ) -> Result<Vec<Row>, RowSourceError> {
            self.fetches
                .lock()
                .expect("fetch log poisoned")
                .push((start, end));
            if self.fail.load(Ordering::SeqCst) {
                return Err(RowSourceError::new("connection reset"));
            }
            Ok((start..=end).map(sample_row).collect())
        }
    }

    #[derive(Debug, Default, Clone)]
    struct FakePersistence {
        saves: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl RowPersistence for FakePersistence {
        async fn save_row(
            &self,
            _row_id: &RowId,
            _changes: &[CellChange],
        ) -> Result<(), PersistenceError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(PersistenceError::new("save rejected"));
            }
            Ok(())
        }
    }

    struct IdsExporter;

    impl Exporter for IdsExporter {
        fn format_name(&self) -> &'static str {
            "ids"
        }

        fn file_extension(&self) -> &'static str {
            "txt"
        }

        fn export(&self, _columns: &[&Column], rows: &[SharedRow]) -> Result<Vec<u8>, ExportError> {
            Ok(rows
                .iter()
                .map(|row| row.id.to_string())
                .collect::<Vec<_>>()
                .join(",")
                .into_bytes())
        }
    }

    fn sample_row(index: usize) -> Row {
        Row::new(format!("r{index}"))
            .with("id", index)
            .with("amount", index * 10)
            .with("label", format!("row {index}"))
    }

    fn columns() -> Vec<Column> {
        vec![
            Column::new("id", ColumnKind::Number).primary_key(),
            Column::new("amount", ColumnKind::Number).editable(),
            Column::new("label", ColumnKind::Text).editable(),
        ]
    }

    fn controller(total_rows: usize) -> GridController<FakeSource, FakePersistence> {
        let config = GridConfig {
            chunk_size: 500,
            overscan: 8,
            estimated_row_height: 28.0,
            ..GridConfig::default()
        };
        let mut controller =
            GridController::new(FakeSource::default(), FakePersistence::default(), &config, 1);
        controller.open_result(ResultId::new("q1"), total_rows, columns());
        controller.set_viewport_height(280.0);
        controller
    }

    #[tokio::test]
    async fn jumping_deep_into_result_fetches_only_the_covering_chunk() {
        let mut controller = controller(100_000);

        controller.scroll_to_row(50_250, ScrollAlign::Start);
        controller.sync_window().await;

        assert_eq!(controller.source().fetch_count(), 1);
        assert_eq!(
            controller.source().fetches.lock().expect("fetch log poisoned")[0],
            (50_000, 50_499)
        );
        let frame = controller.frame();
        assert!(frame.rows.iter().all(|row| matches!(row.view, RowView::Ready(_))));
        assert_eq!(frame.rows.first().map(|row| row.index), Some(50_250 - 8));
    }

    #[tokio::test]
    async fn unloaded_window_renders_loading_placeholders_then_rows() {
        let mut controller = controller(1_000);

        let before = controller.frame();
        assert!(before.rows.iter().all(|row| row.view == RowView::Loading));
        assert_eq!(before.padding_top, 0.0);

        controller.sync_window().await;
        let after = controller.frame();
        assert_eq!(after.rows[0].row().map(|row| row.id.to_string()), Some("r0".to_string()));
        assert!(after.rows[0].focused);
        let rendered: f64 = after.rows.iter().map(|row| row.size).sum();
        assert!((after.padding_top + rendered + after.padding_bottom - 28_000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn failed_chunk_shows_error_and_retries_on_next_sync() {
        let mut controller = controller(1_000);
        controller.source().fail.store(true, Ordering::SeqCst);

        controller.sync_window().await;
        assert!(matches!(controller.frame().rows[0].view, RowView::Failed(_)));
        controller.sync_window().await;
        assert_eq!(controller.source().fetch_count(), 2);

        controller.source().fail.store(false, Ordering::SeqCst);
        controller.sync_window().await;
        assert!(matches!(controller.frame().rows[0].view, RowView::Ready(_)));
    }

    #[tokio::test]
    async fn late_chunk_is_merged_without_moving_the_scroll_position() {
        let mut controller = controller(10_000);
        let requests = controller.plan_window();
        assert_eq!(requests.len(), 1);

        controller.scroll_to_row(9_000, ScrollAlign::Start);
        let offset = controller.virtualizer().scroll_offset();
        let request = &requests[0];
        controller.apply_chunk(request, Ok((request.start..=request.end).map(sample_row).collect()));

        assert_eq!(controller.virtualizer().scroll_offset(), offset);
        assert!(controller.engine().row(&RowId::new("r3")).is_some());
    }

    #[tokio::test]
    async fn ctrl_end_jumps_straight_to_the_last_window() {
        let mut controller = controller(10_000);
        controller.sync_window().await;

        let request = controller
            .handle_key(KeyStroke::ctrl(GridKey::End))
            .await
            .expect("focus moved off-window");
        controller.sync_window().await;

        assert_eq!(request.behavior, ScrollBehavior::Instant);
        assert_eq!(controller.cursor().row, 9_999);
        let frame = controller.frame();
        assert_eq!(frame.rows.last().map(|row| row.index), Some(9_999));
        assert!(frame.rows.iter().all(|row| row.index >= 9_980));
        assert_eq!(controller.source().fetch_count(), 2);
    }

    #[tokio::test]
    async fn keyboard_edit_round_trip_saves_and_clears_dirty() {
        let mut controller = controller(100);
        controller.sync_window().await;
        controller.handle_key(KeyStroke::plain(GridKey::Right)).await;
        controller.handle_key(KeyStroke::plain(GridKey::Right)).await;

        controller.handle_key(KeyStroke::plain(GridKey::Enter)).await;
        controller.engine_mut().update_editing_cell(json!(77));
        controller.handle_key(KeyStroke::plain(GridKey::Enter)).await;

        let row = controller.engine().row(&RowId::new("r0")).expect("row");
        assert_eq!(row.get("amount"), &json!(77));
        assert_eq!(controller.engine().dirty_count(), 0);
        assert_eq!(controller.persistence().saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_save_via_controller_rolls_back() {
        let mut controller = controller(100);
        controller.sync_window().await;
        controller.persistence().fail.store(true, Ordering::SeqCst);

        controller.start_edit_at(Cursor { row: 2, column: 2 });
        controller.engine_mut().update_editing_cell(json!(999));
        assert!(controller.commit_edit().await);

        let address = CellAddress::new("r2", "amount");
        let row = controller.engine().row(&address.row_id).expect("row");
        assert_eq!(row.get("amount"), &json!(20));
        assert_eq!(controller.engine().cell_error(&address), Some("save rejected"));
        let frame = controller.frame();
        assert_eq!(
            frame.rows[2].cell_errors,
            vec![("amount".to_string(), "save rejected".to_string())]
        );
    }

    #[tokio::test]
    async fn invalid_draft_keeps_cursor_on_tab_commit() {
        let mut controller = controller(100);
        controller.sync_window().await;
        controller.focus(Cursor { row: 0, column: 2 });
        controller.handle_key(KeyStroke::plain(GridKey::F2)).await;
        controller.engine_mut().update_editing_cell(json!("not a number"));

        controller.handle_key(KeyStroke::plain(GridKey::Tab)).await;

        assert_eq!(controller.cursor(), Cursor { row: 0, column: 2 });
        assert!(controller.engine().editing_session().is_some());
        assert_eq!(controller.persistence().saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delete_key_clears_cell_and_undo_restores_it() {
        let mut controller = controller(100);
        controller.sync_window().await;
        controller.focus(Cursor { row: 1, column: 3 });

        controller.handle_key(KeyStroke::plain(GridKey::Delete)).await;
        let row_id = RowId::new("r1");
        assert!(controller.engine().row(&row_id).expect("row").get("label").is_null());

        controller.handle_key(KeyStroke::ctrl(GridKey::Char('z'))).await;
        assert_eq!(
            controller.engine().row(&row_id).expect("row").get("label"),
            &json!("row 1")
        );
        assert!(controller.engine().is_dirty(&row_id));

        assert_eq!(controller.save_dirty_rows().await, 1);
        assert_eq!(controller.engine().dirty_count(), 0);
    }

    #[tokio::test]
    async fn sorting_switches_to_local_view_and_keeps_selection() {
        let mut controller = controller(100_000);
        controller.sync_window().await;
        controller.handle_key(KeyStroke::plain(GridKey::Char(' '))).await;
        assert_eq!(controller.engine().selected_row_ids(), vec![RowId::new("r0")]);

        controller.set_sorting(vec![SortKey::descending("amount")]);

        assert_eq!(controller.virtualizer().count(), 500);
        assert_eq!(controller.sync_window().await, 0);
        let frame = controller.frame();
        assert_eq!(frame.rows[0].row().map(|row| row.id.to_string()), Some("r499".to_string()));
        assert_eq!(controller.engine().selected_row_ids(), vec![RowId::new("r0")]);

        controller.set_sorting(Vec::new());
        assert_eq!(controller.virtualizer().count(), 100_000);
    }

    #[tokio::test]
    async fn export_uses_selected_rows_in_display_order() {
        let mut controller = controller(20);
        controller.sync_window().await;
        controller.engine_mut().toggle_row_selection(&RowId::new("r3"));
        controller.engine_mut().toggle_row_selection(&RowId::new("r1"));

        let bytes = controller
            .export(&IdsExporter, ExportScope::Selected)
            .expect("export succeeds");

        assert_eq!(String::from_utf8(bytes).expect("utf8"), "r1,r3");
    }

    #[tokio::test]
    async fn reopening_result_resets_cursor_and_scroll() {
        let mut controller = controller(10_000);
        controller.handle_key(KeyStroke::ctrl(GridKey::End)).await;

        controller.open_result(ResultId::new("q2"), 50, columns());

        assert_eq!(controller.cursor(), Cursor::default());
        assert_eq!(controller.virtualizer().scroll_offset(), 0.0);
        assert_eq!(controller.engine().row_count(), 50);
    }
}
