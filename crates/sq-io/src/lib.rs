#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use csv::{ReaderBuilder, WriterBuilder};
use log::debug;
use sq_columnar::{Column, ColumnError};
use sq_frame::{FrameError, Table};
use sq_types::{CoerceOptions, DataType, Value, coerce_value, infer_type};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error("declared type names unknown column `{name}`")]
    UnknownColumn { name: String },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Upload-side configuration: declared column types win over inference.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub types: BTreeMap<String, DataType>,
    pub coerce: CoerceOptions,
}

/// Parses delimited text into a typed table.
///
/// Cells empty after trimming become `Missing`. A column named in
/// `options.types` is coerced to that type (unparseable cells become
/// `Missing`); everything else gets the narrowest inferred type. Ragged
/// records are an error, never a short column.
pub fn read_csv_str(input: &str, options: &ReadOptions) -> Result<Table, IoError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(input.as_bytes());

    let headers = reader.headers().cloned().map_err(IoError::from)?;
    if headers.is_empty() {
        return Err(IoError::MissingHeaders);
    }

    for name in options.types.keys() {
        if !headers.iter().any(|header| header == name) {
            return Err(IoError::UnknownColumn { name: name.clone() });
        }
    }

    let header_count = headers.len();
    let row_hint = input.len() / (header_count * 8).max(1);
    let mut raw_columns: Vec<Vec<String>> = (0..header_count)
        .map(|_| Vec::with_capacity(row_hint))
        .collect();

    for row in reader.records() {
        let record = row?;
        for (idx, cells) in raw_columns.iter_mut().enumerate() {
            cells.push(record.get(idx).unwrap_or_default().trim().to_string());
        }
    }

    let mut columns = Vec::with_capacity(header_count);
    for (idx, cells) in raw_columns.into_iter().enumerate() {
        let name = headers.get(idx).unwrap_or_default().to_string();
        let target = options
            .types
            .get(&name)
            .copied()
            .unwrap_or_else(|| infer_type(cells.iter().map(String::as_str)));
        let values = cells
            .into_iter()
            .map(|cell| {
                if cell.is_empty() {
                    Value::Missing
                } else {
                    coerce_value(&Value::Text(cell), target, &options.coerce)
                }
            })
            .collect();
        columns.push(Column::new(name, target, values)?);
    }

    let table = Table::new(columns)?;
    debug!(
        "read csv: {} rows x {} columns",
        table.rows(),
        table.width()
    );
    Ok(table)
}

/// Serializes the table back to CSV. Headers keep table order; `Missing`
/// becomes the empty field; values use their canonical rendering.
pub fn write_csv_string(table: &Table) -> Result<String, IoError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());

    let headers: Vec<&str> = table.column_names().collect();
    writer.write_record(&headers)?;

    for row in 0..table.rows() {
        let record = table
            .columns()
            .iter()
            .map(|column| column.value(row).map_or_else(String::new, Value::render))
            .collect::<Vec<_>>();
        writer.write_record(&record)?;
    }

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    debug!("wrote csv: {} rows x {} columns", table.rows(), table.width());
    Ok(String::from_utf8(bytes)?)
}
