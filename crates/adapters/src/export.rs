use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use sqlgrid_core::export::{ExportError, Exporter};
use sqlgrid_core::row::{Column, SharedRow};
use sqlgrid_core::validation::display_value;
use tracing::info;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// CSV/TSV style output. The BOM lets spreadsheet tools detect UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimitedExporter {
    pub delimiter: u8,
    pub include_header: bool,
    pub utf8_bom: bool,
}

impl DelimitedExporter {
    #[must_use]
    pub fn csv() -> Self {
        Self {
            delimiter: b',',
            include_header: true,
            utf8_bom: true,
        }
    }

    #[must_use]
    pub fn tsv() -> Self {
        Self {
            delimiter: b'\t',
            include_header: true,
            utf8_bom: false,
        }
    }
}

impl Default for DelimitedExporter {
    fn default() -> Self {
        Self::csv()
    }
}

impl Exporter for DelimitedExporter {
    fn format_name(&self) -> &'static str {
        if self.delimiter == b'\t' {
            "tsv"
        } else {
            "csv"
        }
    }

    fn file_extension(&self) -> &'static str {
        self.format_name()
    }

    fn export(&self, columns: &[&Column], rows: &[SharedRow]) -> Result<Vec<u8>, ExportError> {
        let mut buffer = Vec::new();
        if self.utf8_bom {
            buffer.extend_from_slice(UTF8_BOM);
        }
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(buffer);

        if self.include_header {
            writer
                .write_record(columns.iter().map(|column| column.header.as_str()))
                .map_err(delimited_error)?;
        }
        for row in rows {
            writer
                .write_record(columns.iter().map(|column| display_value(row.get(&column.id))))
                .map_err(delimited_error)?;
        }

        writer
            .into_inner()
            .map_err(|error| ExportError::Delimited(error.to_string()))
    }
}

/// Array of objects keyed by column id, values kept as typed JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonExporter {
    pub pretty: bool,
}

impl Exporter for JsonExporter {
    fn format_name(&self) -> &'static str {
        "json"
    }

    fn file_extension(&self) -> &'static str {
        "json"
    }

    fn export(&self, columns: &[&Column], rows: &[SharedRow]) -> Result<Vec<u8>, ExportError> {
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut object = Map::with_capacity(columns.len());
            for column in columns {
                object.insert(column.id.clone(), row.get(&column.id).clone());
            }
            records.push(Value::Object(object));
        }

        let payload = if self.pretty {
            serde_json::to_vec_pretty(&records)?
        } else {
            serde_json::to_vec(&records)?
        };
        Ok(payload)
    }
}

pub fn write_export(path: &Path, bytes: &[u8]) -> Result<usize, ExportError> {
    fs::write(path, bytes).map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), bytes = bytes.len(), "export written");
    Ok(bytes.len())
}

fn delimited_error(error: csv::Error) -> ExportError {
    ExportError::Delimited(error.to_string())
}
