//! Decode FlatBuffers game-state snapshots against a declarative schema and
//! export them as CSV rows or JSON documents.
//!
//! Data flows one way: [`BufferView`] reads, [`Decoder`] builds a
//! [`RecordNode`] tree, [`flatten`] projects it, and the [`writer`] module
//! serializes the result. [`Pipeline`] runs the whole chain for one buffer.

pub mod buffer;
pub mod config;
pub mod decoder;
pub mod error;
pub mod flatten;
pub mod pipeline;
pub mod record;
pub mod writer;

pub use buffer::{BufferView, TableRef, VectorRef};
pub use config::{
    load_export_config, load_export_config_from_env, ExportConfig, ExportConfigError,
    EXPORT_CONFIG_ENV,
};
pub use decoder::{DecodeOptions, Decoder, UnionTagPolicy};
pub use error::{DecodeError, ErrorKind, ExportError};
pub use flatten::{
    flatten, flatten_rows, schema_columns, to_document, FanoutKind, FanoutPolicy, FlatRow,
    FlatValue, FlattenMode, FlattenOptions, Flattened,
};
pub use pipeline::{ExportOptions, ExportSummary, ExportTarget, Pipeline, Rendered, TYPE_FIELD};
pub use record::{RecordNode, ScalarValue};
pub use writer::{CsvHeader, CsvOptions, HeaderStrategy, JsonStyle, LineEnding};
