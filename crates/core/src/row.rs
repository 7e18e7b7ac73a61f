use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub type CellValue = serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(String);

impl RowId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RowId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Immutable snapshot of one result row. Edits produce a new row via
/// [`Row::with_cell`], so baseline and current snapshots can share storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    pub cells: BTreeMap<String, CellValue>,
}

impl Row {
    #[must_use]
    pub fn new(id: impl Into<RowId>) -> Self {
        Self {
            id: id.into(),
            cells: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, column_id: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.cells.insert(column_id.into(), value.into());
        self
    }

    /// Missing cells read as `Null`.
    #[must_use]
    pub fn get(&self, column_id: &str) -> &CellValue {
        self.cells.get(column_id).unwrap_or(&CellValue::Null)
    }

    #[must_use]
    pub fn with_cell(&self, column_id: &str, value: CellValue) -> Self {
        let mut cells = self.cells.clone();
        cells.insert(column_id.to_string(), value);
        Self {
            id: self.id.clone(),
            cells,
        }
    }
}

pub type SharedRow = Arc<Row>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellAddress {
    pub row_id: RowId,
    pub column_id: String,
}

impl CellAddress {
    #[must_use]
    pub fn new(row_id: impl Into<RowId>, column_id: impl Into<String>) -> Self {
        Self {
            row_id: row_id.into(),
            column_id: column_id.into(),
        }
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.row_id, self.column_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    #[default]
    Text,
    Number,
    Boolean,
    Date,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StickyEdge {
    Left,
    Right,
}

const DEFAULT_MIN_WIDTH: u16 = 48;
const DEFAULT_MAX_WIDTH: u16 = 640;
const DEFAULT_WIDTH: u16 = 160;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub header: String,
    #[serde(default)]
    pub kind: ColumnKind,
    #[serde(default)]
    pub editable: bool,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default = "default_min_width")]
    pub min_width: u16,
    #[serde(default = "default_max_width")]
    pub max_width: u16,
    #[serde(default = "default_width")]
    pub default_width: u16,
    #[serde(default = "default_true")]
    pub sortable: bool,
    #[serde(default = "default_true")]
    pub filterable: bool,
    #[serde(default)]
    pub sticky: Option<StickyEdge>,
}

impl Column {
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ColumnKind) -> Self {
        let id = id.into();
        Self {
            header: id.clone(),
            id,
            kind,
            editable: false,
            nullable: true,
            primary_key: false,
            min_width: DEFAULT_MIN_WIDTH,
            max_width: DEFAULT_MAX_WIDTH,
            default_width: DEFAULT_WIDTH,
            sortable: true,
            filterable: true,
            sticky: None,
        }
    }

    #[must_use]
    pub fn editable(mut self) -> Self {
        self.editable = true;
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.editable = false;
        self.nullable = false;
        self
    }

    #[must_use]
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    #[must_use]
    pub fn clamp_width(&self, width: u16) -> u16 {
        width.clamp(self.min_width, self.max_width.max(self.min_width))
    }
}

fn default_true() -> bool {
    true
}

fn default_min_width() -> u16 {
    DEFAULT_MIN_WIDTH
}

fn default_max_width() -> u16 {
    DEFAULT_MAX_WIDTH
}

fn default_width() -> u16 {
    DEFAULT_WIDTH
}
