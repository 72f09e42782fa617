use std::io::Write;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonStyle {
    #[default]
    Pretty,
    Compact,
    /// One compact document per line, for appending snapshots to a log.
    Ndjson,
}

/// Serialize `document` followed by a newline.
pub fn write_json<W: Write>(document: &Value, style: JsonStyle, mut sink: W) -> Result<(), ExportError> {
    match style {
        JsonStyle::Pretty => serde_json::to_writer_pretty(&mut sink, document)?,
        JsonStyle::Compact | JsonStyle::Ndjson => serde_json::to_writer(&mut sink, document)?,
    }
    sink.write_all(b"\n")?;
    sink.flush()?;
    Ok(())
}
