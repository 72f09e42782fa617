//! Export settings shared by the CLI and library callers.
//!
//! Loaded from a JSON file named by `SNAPSHOT_EXPORT_CONFIG`, falling back to
//! the builtin `data/export_config.json`. Command-line flags override
//! individual values after loading.

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decoder::{DecodeOptions, UnionTagPolicy, DEFAULT_MAX_DEPTH};
use crate::flatten::{
    FanoutKind, FanoutPolicy, FlattenOptions, DEFAULT_JOIN_DELIMITER, DEFAULT_MAX_ROWS_PER_RECORD,
};
use crate::pipeline::ExportOptions;
use crate::writer::{CsvOptions, HeaderStrategy, JsonStyle, LineEnding};

pub const BUILTIN_EXPORT_CONFIG: &str = include_str!("data/export_config.json");

/// Environment variable naming an override config file.
pub const EXPORT_CONFIG_ENV: &str = "SNAPSHOT_EXPORT_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Fan-out for CSV output. There is no implicit policy: CSV exports fail
    /// to start when neither this nor `--fanout` is given.
    pub fanout: Option<FanoutKind>,
    pub join_delimiter: String,
    pub unknown_union_tags: UnionTagPolicy,
    /// Emit the root table name as a leading `_type` column/key.
    pub type_field: bool,
    pub max_rows_per_record: usize,
    pub max_depth: usize,
    pub size_prefixed: bool,
    pub csv: CsvConfig,
    pub json: JsonConfig,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            fanout: None,
            join_delimiter: DEFAULT_JOIN_DELIMITER.to_string(),
            unknown_union_tags: UnionTagPolicy::Fail,
            type_field: true,
            max_rows_per_record: DEFAULT_MAX_ROWS_PER_RECORD,
            max_depth: DEFAULT_MAX_DEPTH,
            size_prefixed: false,
            csv: CsvConfig::default(),
            json: JsonConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvConfig {
    /// Single ASCII character.
    pub delimiter: String,
    pub line_ending: LineEnding,
    pub header: HeaderStrategy,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: ",".to_string(),
            line_ending: LineEnding::Crlf,
            header: HeaderStrategy::Observed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonConfig {
    pub style: JsonStyle,
}

#[derive(Debug, Error)]
pub enum ExportConfigError {
    #[error("failed to parse export config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read export config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid export config: {0}")]
    Invalid(String),
}

impl ExportConfig {
    pub fn builtin() -> Self {
        Self::from_json_str(BUILTIN_EXPORT_CONFIG).unwrap_or_else(|err| {
            tracing::error!(
                target: "snapshot_export::config",
                error = %err,
                "export_config.builtin_invalid"
            );
            Self::default()
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, ExportConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ExportConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = ExportConfig::from_json_str(&contents)?;
        Ok(config)
    }

    /// The configured fan-out policy, if any.
    pub fn fanout_policy(&self) -> Option<FanoutPolicy> {
        self.fanout
            .map(|kind| kind.into_policy(&self.join_delimiter))
    }

    pub fn to_options(&self) -> Result<ExportOptions, ExportConfigError> {
        let delimiter = match self.csv.delimiter.as_bytes() {
            [byte] if byte.is_ascii() => *byte,
            _ => {
                return Err(ExportConfigError::Invalid(format!(
                    "csv.delimiter must be one ASCII character, got {:?}",
                    self.csv.delimiter
                )))
            }
        };
        if self.max_rows_per_record == 0 {
            return Err(ExportConfigError::Invalid(
                "max_rows_per_record must be at least 1".to_string(),
            ));
        }
        if self.max_depth == 0 {
            return Err(ExportConfigError::Invalid(
                "max_depth must be at least 1".to_string(),
            ));
        }
        Ok(ExportOptions {
            decode: DecodeOptions {
                unknown_union_tags: self.unknown_union_tags,
                max_depth: self.max_depth,
            },
            flatten: FlattenOptions {
                max_rows_per_record: self.max_rows_per_record,
            },
            csv: CsvOptions {
                delimiter,
                line_ending: self.csv.line_ending,
            },
            header: self.csv.header,
            json_style: self.json.style,
            type_field: self.type_field,
            size_prefixed: self.size_prefixed,
        })
    }
}

/// Load the config named by [`EXPORT_CONFIG_ENV`], or the builtin one.
pub fn load_export_config_from_env() -> (ExportConfig, Option<PathBuf>) {
    let override_path = env::var_os(EXPORT_CONFIG_ENV).map(PathBuf::from);
    load_export_config(override_path)
}

/// Load `path` if given, falling back to the builtin config when it is
/// missing or unreadable. Returns the path that was actually used.
pub fn load_export_config(path: Option<PathBuf>) -> (ExportConfig, Option<PathBuf>) {
    if let Some(path) = path {
        match ExportConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "snapshot_export::config",
                    path = %path.display(),
                    "export_config.loaded=file"
                );
                return (config, Some(path));
            }
            Err(err) => {
                tracing::warn!(
                    target: "snapshot_export::config",
                    path = %path.display(),
                    error = %err,
                    "export_config.load_failed"
                );
            }
        }
    }

    let config = ExportConfig::builtin();
    tracing::info!(
        target: "snapshot_export::config",
        "export_config.loaded=builtin"
    );
    (config, None)
}
