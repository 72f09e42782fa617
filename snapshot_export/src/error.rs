use std::io;

use thiserror::Error;

/// Failures while walking a buffer. Every variant is a deterministic function
/// of the buffer and the schema, so none of them is worth retrying.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("read of {width} bytes at offset {offset} is outside the {len}-byte buffer")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },
    #[error("buffer is {len} bytes, at least {needed} are needed for the root header")]
    Truncated { len: usize, needed: usize },
    #[error("buffer of {len} bytes exceeds the FlatBuffers size limit")]
    BufferTooLarge { len: usize },
    #[error(
        "schema {schema} v{version} expects identifier {expected:?} but the buffer carries {found:?}"
    )]
    SchemaMismatch {
        schema: String,
        version: u32,
        expected: String,
        found: String,
    },
    #[error("required field {path} is absent")]
    MissingField { path: String },
    #[error("field {path}: tag {tag} is not a variant of union {union}")]
    UnknownUnionTag {
        path: String,
        union: String,
        tag: u8,
    },
    #[error("nesting deeper than {limit} tables at {path}")]
    DepthLimitExceeded { path: String, limit: usize },
    #[error("schema does not describe {path}: {detail}")]
    InvalidSchema { path: String, detail: String },
}

/// Failure class of an export, used by callers that branch on the cause
/// (the CLI maps each class to its own exit status).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SchemaMismatch,
    OutOfBounds,
    MissingField,
    UnknownUnionTag,
    Io,
    Other,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("no schema matches buffer identifier {identifier:?}. Known schemas:\n{known}")]
    NoMatchingSchema { identifier: String, known: String },
    #[error("no schema or root table named {0}")]
    UnknownRoot(String),
    #[error("record expands to more than {limit} rows")]
    RowLimitExceeded { limit: usize },
    #[error("column {0} is not part of the schema-derived header")]
    UnexpectedColumn(String),
    #[error("csv output failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("json output failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
}

impl ExportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::Decode(err) => match err {
                DecodeError::OutOfBounds { .. }
                | DecodeError::Truncated { .. }
                | DecodeError::BufferTooLarge { .. }
                | DecodeError::DepthLimitExceeded { .. } => ErrorKind::OutOfBounds,
                DecodeError::SchemaMismatch { .. } | DecodeError::InvalidSchema { .. } => {
                    ErrorKind::SchemaMismatch
                }
                DecodeError::MissingField { .. } => ErrorKind::MissingField,
                DecodeError::UnknownUnionTag { .. } => ErrorKind::UnknownUnionTag,
            },
            ExportError::NoMatchingSchema { .. } | ExportError::UnknownRoot(_) => {
                ErrorKind::SchemaMismatch
            }
            ExportError::Io(_) => ErrorKind::Io,
            ExportError::Csv(err) if err.is_io_error() => ErrorKind::Io,
            ExportError::Json(err) if err.is_io() => ErrorKind::Io,
            ExportError::RowLimitExceeded { .. }
            | ExportError::UnexpectedColumn(_)
            | ExportError::Csv(_)
            | ExportError::Json(_) => ErrorKind::Other,
        }
    }
}
