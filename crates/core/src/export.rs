use std::path::PathBuf;

use thiserror::Error;

use crate::row::{Column, SharedRow};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write export file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize JSON export: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to encode delimited export: {0}")]
    Delimited(String),
}

/// Pure transform from rows to an encoded byte stream.
pub trait Exporter {
    fn format_name(&self) -> &'static str;

    fn file_extension(&self) -> &'static str;

    fn export(&self, columns: &[&Column], rows: &[SharedRow]) -> Result<Vec<u8>, ExportError>;
}
