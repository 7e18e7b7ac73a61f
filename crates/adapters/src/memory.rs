use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::json;
use sqlgrid_core::persistence::{CellChange, PersistenceError, RowPersistence};
use sqlgrid_core::range_cache::{ResultId, RowSource, RowSourceError};
use sqlgrid_core::row::{Column, ColumnKind, Row, RowId};
use tracing::debug;

#[derive(Debug, Default)]
struct Faults {
    fetches: usize,
    saves: usize,
    rows: HashSet<RowId>,
}

/// In-process table that serves ranges and accepts row saves. Clones share
/// the same rows, counters, and injected faults.
#[derive(Debug, Clone, Default)]
pub struct MemoryRowStore {
    rows: Arc<Mutex<Vec<Row>>>,
    faults: Arc<Mutex<Faults>>,
    fetch_count: Arc<AtomicUsize>,
    save_count: Arc<AtomicUsize>,
}

impl MemoryRowStore {
    #[must_use]
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(rows)),
            ..Self::default()
        }
    }

    /// Deterministic demo data: ids `row-<n>`, values derived from the row
    /// index and column kind.
    #[must_use]
    pub fn synthetic(total: usize, columns: &[Column]) -> Self {
        let rows = (0..total)
            .map(|index| {
                columns.iter().fold(
                    Row::new(format!("row-{index}")),
                    |row, column| row.with(column.id.clone(), synthetic_value(index, column)),
                )
            })
            .collect();
        Self::new(rows)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stored_row(&self, row_id: &RowId) -> Option<Row> {
        lock(&self.rows).iter().find(|row| &row.id == row_id).cloned()
    }

    pub fn fail_next_fetches(&self, count: usize) {
        lock(&self.faults).fetches = count;
    }

    pub fn fail_next_saves(&self, count: usize) {
        lock(&self.faults).saves = count;
    }

    /// Every save of `row_id` fails until [`Self::clear_faults`].
    pub fn fail_row(&self, row_id: impl Into<RowId>) {
        lock(&self.faults).rows.insert(row_id.into());
    }

    pub fn clear_faults(&self) {
        *lock(&self.faults) = Faults::default();
    }
}

#[async_trait]
impl RowSource for MemoryRowStore {
    async fn fetch_range(
        &self,
        result_id: &ResultId,
        start: usize,
        end: usize,
    ) -> Result<Vec<Row>, RowSourceError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        {
            let mut faults = lock(&self.faults);
            if faults.fetches > 0 {
                faults.fetches -= 1;
                return Err(RowSourceError::new(format!(
                    "injected fetch failure for rows {start}..={end}"
                )));
            }
        }

        let rows = lock(&self.rows);
        if start >= rows.len() {
            return Ok(Vec::new());
        }
        let end = end.min(rows.len() - 1);
        debug!(%result_id, start, end, "serving rows from memory");
        Ok(rows[start..=end].to_vec())
    }
}

#[async_trait]
impl RowPersistence for MemoryRowStore {
    async fn save_row(&self, row_id: &RowId, changes: &[CellChange]) -> Result<(), PersistenceError> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        {
            let mut faults = lock(&self.faults);
            if faults.rows.contains(row_id) {
                return Err(PersistenceError::new(format!("row {row_id} is locked")));
            }
            if faults.saves > 0 {
                faults.saves -= 1;
                return Err(PersistenceError::new("injected save failure"));
            }
        }

        let mut rows = lock(&self.rows);
        let Some(row) = rows.iter_mut().find(|row| &row.id == row_id) else {
            return Err(PersistenceError::new(format!("row {row_id} not found")));
        };
        for change in changes {
            row.cells
                .insert(change.column_id.clone(), change.value.clone());
        }
        debug!(%row_id, changes = changes.len(), "row saved to memory");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn synthetic_value(index: usize, column: &Column) -> serde_json::Value {
    if column.primary_key {
        return json!(index);
    }
    match column.kind {
        ColumnKind::Number => json!((index * 37) % 10_000),
        ColumnKind::Boolean => json!(index % 3 == 0),
        ColumnKind::Date => json!(format!(
            "2024-{:02}-{:02}",
            index % 12 + 1,
            index % 28 + 1
        )),
        ColumnKind::Text | ColumnKind::Other => json!(format!("{} {index}", column.id)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sqlgrid_core::persistence::{CellChange, RowPersistence};
    use sqlgrid_core::range_cache::{ResultId, RowSource};
    use sqlgrid_core::row::{Column, ColumnKind, RowId};

    use super::MemoryRowStore;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("id", ColumnKind::Number).primary_key(),
            Column::new("name", ColumnKind::Text).editable(),
            Column::new("active", ColumnKind::Boolean).editable(),
            Column::new("created", ColumnKind::Date).editable(),
        ]
    }

    #[tokio::test]
    async fn serves_inclusive_ranges_clamped_to_the_table() {
        let store = MemoryRowStore::synthetic(10, &columns());
        let result_id = ResultId::new("demo");

        let rows = store.fetch_range(&result_id, 8, 20).await.expect("fetch");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, RowId::new("row-8"));
        assert_eq!(rows[0].get("id"), &json!(8));
        assert_eq!(rows[0].get("name"), &json!("name 8"));

        let past_end = store.fetch_range(&result_id, 50, 60).await.expect("fetch");
        assert!(past_end.is_empty());
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn injected_fetch_failures_are_consumed_in_order() {
        let store = MemoryRowStore::synthetic(10, &columns());
        let result_id = ResultId::new("demo");
        store.fail_next_fetches(1);

        assert!(store.fetch_range(&result_id, 0, 4).await.is_err());
        assert!(store.fetch_range(&result_id, 0, 4).await.is_ok());
    }

    #[tokio::test]
    async fn saves_apply_changes_unless_the_row_is_failed() {
        let store = MemoryRowStore::synthetic(3, &columns());
        let change = CellChange {
            column_id: "name".to_string(),
            previous: json!("name 1"),
            value: json!("renamed"),
        };

        store
            .save_row(&RowId::new("row-1"), std::slice::from_ref(&change))
            .await
            .expect("save");
        assert_eq!(
            store.stored_row(&RowId::new("row-1")).expect("row").get("name"),
            &json!("renamed")
        );

        store.fail_row("row-2");
        let error = store
            .save_row(&RowId::new("row-2"), &[change])
            .await
            .expect_err("row is failed");
        assert_eq!(error.to_string(), "row row-2 is locked");
        assert_eq!(store.save_count(), 2);
    }

    #[tokio::test]
    async fn saving_an_unknown_row_is_an_error() {
        let store = MemoryRowStore::default();

        let outcome = store.save_row(&RowId::new("ghost"), &[]).await;

        assert!(outcome.is_err());
        assert!(store.is_empty());
    }
}
