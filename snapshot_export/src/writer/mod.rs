//! Serializers for flattened snapshots.

mod csv;
mod json;

pub use self::csv::{observed_columns, write_csv, CsvHeader, CsvOptions, HeaderStrategy, LineEnding};
pub use self::json::{write_json, JsonStyle};
