use std::io::Cursor;

use plotwise_common::api::ColumnInfo;
use polars::prelude::*;

/// Rows inspected when inferring column types.
const INFER_SCHEMA_ROWS: usize = 100;
/// Data lines (after the header) included in the prompt preview.
const PREVIEW_ROWS: usize = 20;
/// Hard cap on the preview, whatever the row width.
const PREVIEW_MAX_CHARS: usize = 4000;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("No sample data was provided")]
    Empty,

    #[error("Sample data is not valid CSV: {0}")]
    Parse(String),
}

/// A column name with its type, declared by the client or inferred.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSummary {
    pub name: String,
    pub dtype: String,
}

/// The request's sample data, parsed once and shared with every tool call.
#[derive(Clone, Debug)]
pub struct Dataset {
    csv: String,
    columns: Vec<ColumnSummary>,
    row_count: usize,
}

fn dtype_label(dtype: &DataType) -> &'static str {
    match dtype {
        DataType::Boolean => "boolean",
        DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64 => "integer",
        DataType::Float32 | DataType::Float64 => "number",
        DataType::Utf8 => "string",
        DataType::Date => "date",
        DataType::Datetime(_, _) => "datetime",
        DataType::Time => "time",
        _ => "unknown",
    }
}

impl Dataset {
    /// Parse CSV text (header row required). Types from `columns_info` win
    /// over inferred ones for columns they name.
    pub fn from_csv(csv: &str, columns_info: Option<&[ColumnInfo]>) -> Result<Self, DatasetError> {
        if csv.trim().is_empty() {
            return Err(DatasetError::Empty);
        }

        let df = CsvReader::new(Cursor::new(csv.as_bytes()))
            .infer_schema(Some(INFER_SCHEMA_ROWS))
            .has_header(true)
            .finish()
            .map_err(|e| DatasetError::Parse(e.to_string()))?;

        if df.height() == 0 {
            return Err(DatasetError::Empty);
        }

        let columns = df
            .get_columns()
            .iter()
            .map(|series| {
                let name = series.name().to_string();
                let declared = columns_info
                    .and_then(|info| info.iter().find(|c| c.name == name))
                    .map(|c| c.column_type.clone());
                ColumnSummary {
                    dtype: declared.unwrap_or_else(|| dtype_label(series.dtype()).to_string()),
                    name,
                }
            })
            .collect();

        tracing::debug!(rows = df.height(), columns = df.width(), "Parsed sample data");

        Ok(Self {
            csv: csv.to_string(),
            columns,
            row_count: df.height(),
        })
    }

    pub fn csv(&self) -> &str {
        &self.csv
    }

    pub fn columns(&self) -> &[ColumnSummary] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// `name (type)` pairs, comma separated.
    pub fn describe_columns(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{} ({})", c.name, c.dtype))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Header plus the first rows of the raw CSV, bounded in size.
    pub fn preview(&self) -> String {
        let mut preview = String::new();
        for line in self.csv.lines().take(PREVIEW_ROWS + 1) {
            if preview.len() + line.len() + 1 > PREVIEW_MAX_CHARS {
                break;
            }
            preview.push_str(line);
            preview.push('\n');
        }
        if self.row_count > PREVIEW_ROWS {
            preview.push_str(&format!("... ({} rows total)\n", self.row_count));
        }
        preview
    }
}
