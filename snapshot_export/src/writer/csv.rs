use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::io::Write;

use ::csv::{Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::flatten::FlatRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineEnding {
    #[default]
    Crlf,
    Lf,
}

impl LineEnding {
    fn terminator(self) -> Terminator {
        match self {
            LineEnding::Crlf => Terminator::CRLF,
            LineEnding::Lf => Terminator::Any(b'\n'),
        }
    }
}

/// Where the header row comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderStrategy {
    /// Union of the paths seen across all rows, first-seen order.
    #[default]
    Observed,
    /// Every column the schema can produce, fixed before any row is seen.
    Schema,
}

/// Resolved header for one write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsvHeader {
    Observed,
    Fixed(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub line_ending: LineEnding,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            line_ending: LineEnding::Crlf,
        }
    }
}

pub fn observed_columns(rows: &[FlatRow]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for path in rows.iter().flat_map(FlatRow::paths) {
        if seen.insert(path) {
            columns.push(path.to_string());
        }
    }
    columns
}

/// Write a header and one record per row, padding absent paths with empty
/// cells. Writes nothing at all when there are no columns.
///
/// With a fixed header, null cells at unknown paths are dropped and any other
/// unknown path fails with [`ExportError::UnexpectedColumn`].
pub fn write_csv<W: Write>(
    rows: &[FlatRow],
    header: &CsvHeader,
    options: &CsvOptions,
    sink: W,
) -> Result<(), ExportError> {
    let columns = match header {
        CsvHeader::Observed => observed_columns(rows),
        CsvHeader::Fixed(columns) => columns.clone(),
    };
    if columns.is_empty() {
        return Ok(());
    }
    let index: HashMap<&str, usize> = columns
        .iter()
        .enumerate()
        .map(|(position, column)| (column.as_str(), position))
        .collect();

    let mut writer = WriterBuilder::new()
        .delimiter(options.delimiter)
        .terminator(options.line_ending.terminator())
        .from_writer(sink);
    writer.write_record(&columns)?;

    let mut record: Vec<Cow<'_, str>> = vec![Cow::Borrowed(""); columns.len()];
    for row in rows {
        record.fill(Cow::Borrowed(""));
        for (path, value) in row.iter() {
            match index.get(path) {
                Some(&position) => record[position] = value.to_cell(),
                None if value.is_null() => {}
                None => return Err(ExportError::UnexpectedColumn(path.to_string())),
            }
        }
        writer.write_record(record.iter().map(|cell| cell.as_bytes()))?;
    }
    writer.flush()?;
    Ok(())
}
