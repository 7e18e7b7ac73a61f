use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::row::{CellValue, Column, Row};
use crate::validation::display_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column_id: String,
    pub direction: SortDirection,
}

impl SortKey {
    #[must_use]
    pub fn ascending(column_id: impl Into<String>) -> Self {
        Self {
            column_id: column_id.into(),
            direction: SortDirection::Ascending,
        }
    }

    #[must_use]
    pub fn descending(column_id: impl Into<String>) -> Self {
        Self {
            column_id: column_id.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Sort, filter, visibility and sizing state for one table.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    sorting: Vec<SortKey>,
    global_filter: Option<String>,
    column_filters: BTreeMap<String, String>,
    hidden_columns: HashSet<String>,
    column_widths: HashMap<String, u16>,
}

impl ViewState {
    #[must_use]
    pub fn sorting(&self) -> &[SortKey] {
        &self.sorting
    }

    #[must_use]
    pub fn global_filter(&self) -> Option<&str> {
        self.global_filter.as_deref()
    }

    #[must_use]
    pub fn column_filter(&self, column_id: &str) -> Option<&str> {
        self.column_filters.get(column_id).map(String::as_str)
    }

    /// Sorting or filtering forces a local projection over loaded rows.
    #[must_use]
    pub fn is_local_view_active(&self) -> bool {
        !self.sorting.is_empty() || self.global_filter.is_some() || !self.column_filters.is_empty()
    }

    pub fn set_sorting(&mut self, sorting: Vec<SortKey>) -> bool {
        if self.sorting == sorting {
            return false;
        }
        self.sorting = sorting;
        true
    }

    /// Cycles a single-column sort: none, ascending, descending, none.
    pub fn toggle_sort(&mut self, column_id: &str) {
        let next = match self.sorting.as_slice() {
            [key] if key.column_id == column_id => match key.direction {
                SortDirection::Ascending => vec![SortKey::descending(column_id)],
                SortDirection::Descending => Vec::new(),
            },
            _ => vec![SortKey::ascending(column_id)],
        };
        self.sorting = next;
    }

    pub fn set_global_filter(&mut self, filter: Option<String>) -> bool {
        let filter = normalize_filter(filter);
        if self.global_filter == filter {
            return false;
        }
        self.global_filter = filter;
        true
    }

    pub fn set_column_filter(&mut self, column_id: &str, filter: Option<String>) -> bool {
        match normalize_filter(filter) {
            Some(filter) => {
                if self.column_filters.get(column_id) == Some(&filter) {
                    return false;
                }
                self.column_filters.insert(column_id.to_string(), filter);
                true
            }
            None => self.column_filters.remove(column_id).is_some(),
        }
    }

    #[must_use]
    pub fn is_column_visible(&self, column_id: &str) -> bool {
        !self.hidden_columns.contains(column_id)
    }

    pub fn set_column_visibility(&mut self, column_id: &str, visible: bool) -> bool {
        if visible {
            self.hidden_columns.remove(column_id)
        } else {
            self.hidden_columns.insert(column_id.to_string())
        }
    }

    #[must_use]
    pub fn column_width(&self, column: &Column) -> u16 {
        self.column_widths
            .get(&column.id)
            .copied()
            .unwrap_or_else(|| column.clamp_width(column.default_width))
    }

    pub fn set_column_width(&mut self, column: &Column, width: u16) -> u16 {
        let width = column.clamp_width(width);
        self.column_widths.insert(column.id.clone(), width);
        width
    }

    pub fn reset_sizing(&mut self) {
        self.column_widths.clear();
    }

    #[must_use]
    pub fn matches(&self, row: &Row, columns: &[Column]) -> bool {
        for (column_id, needle) in &self.column_filters {
            if !contains_ignore_case(row.get(column_id), needle) {
                return false;
            }
        }

        let Some(needle) = &self.global_filter else {
            return true;
        };
        columns
            .iter()
            .filter(|column| column.filterable && self.is_column_visible(&column.id))
            .any(|column| contains_ignore_case(row.get(&column.id), needle))
    }

    #[must_use]
    pub fn compare(&self, left: &Row, right: &Row) -> Ordering {
        for key in &self.sorting {
            let ordering = compare_values(left.get(&key.column_id), right.get(&key.column_id));
            let ordering = match key.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => match (
                    left.get(&key.column_id).is_null(),
                    right.get(&key.column_id).is_null(),
                ) {
                    (false, false) => ordering.reverse(),
                    _ => ordering,
                },
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

fn normalize_filter(filter: Option<String>) -> Option<String> {
    filter
        .map(|filter| filter.trim().to_lowercase())
        .filter(|filter| !filter.is_empty())
}

fn contains_ignore_case(value: &CellValue, needle: &str) -> bool {
    display_value(value).to_lowercase().contains(needle)
}

/// Typed comparison; nulls always sort last.
#[must_use]
pub fn compare_values(left: &CellValue, right: &CellValue) -> Ordering {
    match (left, right) {
        (CellValue::Null, CellValue::Null) => Ordering::Equal,
        (CellValue::Null, _) => Ordering::Greater,
        (_, CellValue::Null) => Ordering::Less,
        (CellValue::Number(left), CellValue::Number(right)) => left
            .as_f64()
            .partial_cmp(&right.as_f64())
            .unwrap_or(Ordering::Equal),
        (CellValue::Bool(left), CellValue::Bool(right)) => left.cmp(right),
        (CellValue::String(left), CellValue::String(right)) => left
            .to_lowercase()
            .cmp(&right.to_lowercase())
            .then_with(|| left.cmp(right)),
        _ => display_value(left).cmp(&display_value(right)),
    }
}
