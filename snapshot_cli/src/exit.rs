//! Process exit statuses, one per failure class.

use std::io;
use std::process::ExitCode;

use color_eyre::eyre::Report;
use snapshot_export::{ErrorKind, ExportConfigError, ExportError};
use snapshot_schema::SchemaError;

use crate::input::InputError;
use crate::table::TableError;

pub const FAILURE: u8 = 1;
/// Reserved for clap usage errors, which exit on their own.
pub const USAGE: u8 = 2;
pub const SCHEMA_MISMATCH: u8 = 3;
pub const OUT_OF_BOUNDS: u8 = 4;
pub const MISSING_FIELD: u8 = 5;
pub const UNKNOWN_UNION_TAG: u8 = 6;
pub const IO: u8 = 7;

pub fn status_for_kind(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::SchemaMismatch => SCHEMA_MISMATCH,
        ErrorKind::OutOfBounds => OUT_OF_BOUNDS,
        ErrorKind::MissingField => MISSING_FIELD,
        ErrorKind::UnknownUnionTag => UNKNOWN_UNION_TAG,
        ErrorKind::Io => IO,
        ErrorKind::Other => FAILURE,
    }
}

/// Status for a failed run, taken from the first recognised error in the
/// report's cause chain.
pub fn status_for_report(report: &Report) -> u8 {
    for cause in report.chain() {
        if let Some(err) = cause.downcast_ref::<ExportError>() {
            return status_for_kind(err.kind());
        }
        if let Some(err) = cause.downcast_ref::<InputError>() {
            return match err {
                InputError::Read { .. } => IO,
                InputError::Base64(_) | InputError::Hex(_) => FAILURE,
            };
        }
        if let Some(err) = cause.downcast_ref::<TableError>() {
            return match err {
                TableError::Csv(err) if err.is_io_error() => IO,
                TableError::Csv(_) | TableError::MissingColumns { .. } => FAILURE,
            };
        }
        if let Some(SchemaError::Read { .. }) = cause.downcast_ref::<SchemaError>() {
            return IO;
        }
        if let Some(ExportConfigError::Read { .. }) = cause.downcast_ref::<ExportConfigError>() {
            return IO;
        }
        if cause.downcast_ref::<io::Error>().is_some() {
            return IO;
        }
    }
    FAILURE
}

pub fn exit_code(status: u8) -> ExitCode {
    ExitCode::from(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::WrapErr;
    use snapshot_export::DecodeError;

    fn report_for(err: ExportError) -> Report {
        Err::<(), _>(err)
            .wrap_err("decoding snapshot.bin")
            .expect_err("wrapped error")
    }

    #[test]
    fn export_errors_map_to_their_class() {
        let cases = [
            (
                ExportError::from(DecodeError::SchemaMismatch {
                    schema: "player_profile".into(),
                    version: 2,
                    expected: "FBPP".into(),
                    found: "ZZZZ".into(),
                }),
                SCHEMA_MISMATCH,
            ),
            (
                ExportError::from(DecodeError::Truncated { len: 2, needed: 4 }),
                OUT_OF_BOUNDS,
            ),
            (
                ExportError::from(DecodeError::MissingField {
                    path: "name".into(),
                }),
                MISSING_FIELD,
            ),
            (
                ExportError::from(DecodeError::UnknownUnionTag {
                    path: "last_event".into(),
                    union: "Event".into(),
                    tag: 9,
                }),
                UNKNOWN_UNION_TAG,
            ),
            (
                ExportError::from(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
                IO,
            ),
            (ExportError::RowLimitExceeded { limit: 10 }, FAILURE),
        ];
        for (err, expected) in cases {
            let message = err.to_string();
            assert_eq!(status_for_report(&report_for(err)), expected, "{message}");
        }
    }

    #[test]
    fn input_and_io_failures_exit_with_io_status() {
        let report = Report::new(InputError::Read {
            path: "missing.bin".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        });
        assert_eq!(status_for_report(&report), IO);

        let report = Report::new(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        assert_eq!(status_for_report(&report), IO);

        let report = Report::new(TableError::MissingColumns {
            missing: "state".into(),
            available: "id, blob".into(),
        });
        assert_eq!(status_for_report(&report), FAILURE);

        let report = color_eyre::eyre::eyre!("something else");
        assert_eq!(status_for_report(&report), FAILURE);
    }
}
