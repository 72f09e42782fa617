//! Snapshot blobs stored in the cells of a CSV table export (one snapshot
//! column per database row). Blob cells become decoded documents; every
//! other cell passes through as text.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use serde_json::{Map, Value};
use snapshot_export::writer::write_json;
use snapshot_export::{ExportError, JsonStyle, Pipeline};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::input::{self, InputEncoding, InputError};

/// Root offset plus file identifier.
pub const MIN_BLOB_LEN: usize = 8;
/// Tables at least this long report decoding progress on stderr.
pub const PROGRESS_MIN_ROWS: usize = 100;
const PROGRESS_EVERY: usize = 1000;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("Column(s) not found in CSV: [{missing}]. Available columns: [{available}]")]
    MissingColumns { missing: String, available: String },
    #[error("failed to read csv: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    /// Blob columns; detected from the first row when empty.
    pub columns: Vec<String>,
    pub encoding: InputEncoding,
    pub root: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTable {
    pub rows: Vec<Map<String, Value>>,
    pub blob_columns: Vec<String>,
    /// Blob cells that failed to decode.
    pub errors: usize,
}

/// Decode every blob cell of a CSV table with a header row. Values are
/// trimmed; columns keep the header's order.
pub fn decode_table<R: Read>(
    source: R,
    pipeline: &Pipeline,
    options: &TableOptions,
) -> Result<DecodedTable, TableError> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(source);
    let headers = reader.headers()?.clone();
    let records = reader.records().collect::<Result<Vec<_>, _>>()?;
    info!(
        target: "snapshot_cli::table",
        columns = headers.len(),
        rows = records.len(),
        "table.read"
    );

    let blob_columns = if options.columns.is_empty() {
        let detected = records
            .first()
            .map(|first| detect_blob_columns(&headers, first, options.encoding))
            .unwrap_or_default();
        if detected.is_empty() && !records.is_empty() {
            warn!(
                target: "snapshot_cli::table",
                encoding = ?options.encoding,
                "table.no_blob_columns"
            );
        }
        detected
    } else {
        named_columns(&headers, &options.columns)?
    };
    let is_blob: Vec<bool> = (0..headers.len())
        .map(|index| blob_columns.contains(&index))
        .collect();

    let progress = records.len() >= PROGRESS_MIN_ROWS;
    if progress {
        eprintln!("Decoding {} rows...", records.len());
    }
    let mut rows = Vec::with_capacity(records.len());
    let mut errors = 0usize;
    for (index, record) in records.iter().enumerate() {
        let line = index + 1;
        let mut row = Map::with_capacity(headers.len());
        for (column, (header, cell)) in headers.iter().zip(record.iter()).enumerate() {
            if !is_blob[column] || cell.is_empty() {
                row.insert(header.to_string(), Value::String(cell.to_string()));
                continue;
            }
            let value = match blob_bytes(cell, options.encoding) {
                Ok(bytes) => match pipeline.document(&bytes, options.root.as_deref()) {
                    Ok(document) => document,
                    Err(err) => {
                        warn!(
                            target: "snapshot_cli::table",
                            row = line,
                            column = header,
                            error = %err,
                            "table.decode_failed"
                        );
                        errors += 1;
                        error_cell(&err)
                    }
                },
                Err(err) => {
                    warn!(
                        target: "snapshot_cli::table",
                        row = line,
                        column = header,
                        error = %err,
                        "table.blob_kept_as_text"
                    );
                    Value::String(cell.to_string())
                }
            };
            row.insert(header.to_string(), value);
        }
        rows.push(row);
        if progress && line % PROGRESS_EVERY == 0 {
            eprintln!("  {line} / {} rows decoded...", records.len());
        }
    }
    if progress {
        eprintln!("  {0} / {0} rows decoded.", records.len());
    }

    Ok(DecodedTable {
        rows,
        blob_columns: blob_columns
            .iter()
            .filter_map(|&index| headers.get(index).map(str::to_string))
            .collect(),
        errors,
    })
}

/// Pretty and compact output is one JSON array; ndjson is one row per line.
pub fn write_table<W: Write>(
    rows: Vec<Map<String, Value>>,
    style: JsonStyle,
    mut sink: W,
) -> Result<(), ExportError> {
    match style {
        JsonStyle::Pretty | JsonStyle::Compact => {
            let rows = Value::Array(rows.into_iter().map(Value::Object).collect());
            write_json(&rows, style, sink)
        }
        JsonStyle::Ndjson => {
            for row in rows {
                write_json(&Value::Object(row), style, &mut sink)?;
            }
            Ok(())
        }
    }
}

fn error_cell(err: &ExportError) -> Value {
    Value::String(format!("<decode error: {err}>"))
}

fn named_columns(headers: &StringRecord, columns: &[String]) -> Result<Vec<usize>, TableError> {
    let missing: Vec<&str> = columns
        .iter()
        .map(String::as_str)
        .filter(|column| !headers.iter().any(|header| header == *column))
        .collect();
    if !missing.is_empty() {
        return Err(TableError::MissingColumns {
            missing: missing.join(", "),
            available: headers.iter().collect::<Vec<_>>().join(", "),
        });
    }
    Ok(headers
        .iter()
        .enumerate()
        .filter(|(_, header)| columns.iter().any(|column| column == header))
        .map(|(index, _)| index)
        .collect())
}

/// Columns whose first-row cell decodes (and inflates) to something long
/// enough to hold a FlatBuffer header.
fn detect_blob_columns(
    headers: &StringRecord,
    first: &StringRecord,
    encoding: InputEncoding,
) -> Vec<usize> {
    let detected: Vec<usize> = first
        .iter()
        .enumerate()
        .filter(|(_, cell)| !cell.is_empty())
        .filter(|(_, cell)| {
            blob_bytes(cell, encoding).is_ok_and(|bytes| bytes.len() >= MIN_BLOB_LEN)
        })
        .map(|(index, _)| index)
        .collect();
    debug!(
        target: "snapshot_cli::table",
        columns = ?detected
            .iter()
            .filter_map(|&index| headers.get(index))
            .collect::<Vec<_>>(),
        "table.blob_columns_detected"
    );
    detected
}

/// Bytes of one cell. Raw cells map each character to one Latin-1 byte,
/// with `?` for characters outside that range.
fn blob_bytes(cell: &str, encoding: InputEncoding) -> Result<Vec<u8>, InputError> {
    let raw = match encoding {
        InputEncoding::Raw => cell
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect(),
        InputEncoding::Base64 | InputEncoding::Hex => cell.as_bytes().to_vec(),
    };
    input::prepare(raw, encoding)
}

/// Open a table file, failing the same way snapshot inputs do.
pub fn open(path: &Path) -> Result<File, InputError> {
    File::open(path).map_err(|source| InputError::Read {
        path: path.display().to_string(),
        source,
    })
}
