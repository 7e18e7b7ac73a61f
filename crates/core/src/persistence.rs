use async_trait::async_trait;
use thiserror::Error;

use crate::row::{CellValue, RowId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PersistenceError {
    message: String,
}

impl PersistenceError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellChange {
    pub column_id: String,
    /// Value the cell returns to if this save fails.
    pub previous: CellValue,
    pub value: CellValue,
}

/// One outstanding save, carrying the values as they were when it was issued.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveTicket {
    pub id: u64,
    pub row_id: RowId,
    pub changes: Vec<CellChange>,
}

/// Writes committed cells back to storage. Implementations must tolerate the
/// caller retrying the same change set.
#[async_trait]
pub trait RowPersistence {
    async fn save_row(&self, row_id: &RowId, changes: &[CellChange])
        -> Result<(), PersistenceError>;
}
