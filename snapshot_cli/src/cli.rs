use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use snapshot_export::{ExportConfig, FanoutKind, HeaderStrategy, JsonStyle, LineEnding, UnionTagPolicy};

use crate::input::InputEncoding;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Export FlatBuffers game-state snapshots to CSV or JSON",
    long_about = None
)]
pub struct Cli {
    /// Log at debug level instead of honouring RUST_LOG.
    #[arg(long, short, global = true)]
    pub verbose: bool,
    /// Export config file. Defaults to $SNAPSHOT_EXPORT_CONFIG, then the builtin settings.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Export a single snapshot.
    Decode(DecodeArgs),
    /// Export many snapshots in parallel, one output file each.
    Batch(BatchArgs),
    /// Decode snapshot blobs held in the columns of a CSV table export.
    Table(TableArgs),
    /// List the schemas found at a path.
    Schemas {
        /// Schema file or directory of `*.json` schema files.
        #[arg(long, value_name = "FILE|DIR")]
        schema: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Snapshot file, or `-` for stdin.
    #[arg(long, short, value_name = "PATH")]
    pub input: PathBuf,
    /// Destination file; stdout when omitted.
    #[arg(long, short, value_name = "PATH")]
    pub output: Option<PathBuf>,
    #[command(flatten)]
    pub export: ExportArgs,
}

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Directory receiving `<input stem>.<format>` files.
    #[arg(long, value_name = "DIR")]
    pub out_dir: PathBuf,
    #[command(flatten)]
    pub export: ExportArgs,
    /// Snapshot files.
    #[arg(required = true, value_name = "INPUT")]
    pub inputs: Vec<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TableArgs {
    /// CSV file with a header row.
    #[arg(long, short, value_name = "PATH")]
    pub csv: PathBuf,
    /// Column holding snapshot blobs; repeatable. Detected from the first row when omitted.
    #[arg(long = "column", value_name = "NAME")]
    pub columns: Vec<String>,
    /// Schema file or directory of `*.json` schema files.
    #[arg(long, value_name = "FILE|DIR")]
    pub schema: PathBuf,
    /// Schema or root table to decode with, bypassing identifier matching.
    #[arg(long)]
    pub root: Option<String>,
    /// How blobs are written in the cells.
    #[arg(long, value_enum, default_value_t = InputEncoding::Base64)]
    pub encoding: InputEncoding,
    #[arg(long, value_enum)]
    pub json_style: Option<JsonStyleArg>,
    #[arg(long, value_enum)]
    pub unknown_union_tags: Option<UnionTagArg>,
    /// Omit the `_type` key of decoded blobs.
    #[arg(long)]
    pub no_type_field: bool,
    /// Destination file; stdout when omitted.
    #[arg(long, short, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

impl TableArgs {
    pub fn apply(&self, config: &mut ExportConfig) {
        if let Some(style) = self.json_style {
            config.json.style = style.into();
        }
        if let Some(policy) = self.unknown_union_tags {
            config.unknown_union_tags = policy.into();
        }
        if self.no_type_field {
            config.type_field = false;
        }
    }
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Schema file or directory of `*.json` schema files.
    #[arg(long, value_name = "FILE|DIR")]
    pub schema: PathBuf,
    #[arg(long, value_enum)]
    pub format: Format,
    /// How vectors become CSV rows. Required for CSV unless the config names one.
    #[arg(long, value_enum)]
    pub fanout: Option<FanoutArg>,
    /// Schema or root table to decode with, bypassing identifier matching.
    #[arg(long)]
    pub root: Option<String>,
    #[arg(long, value_enum, default_value_t)]
    pub encoding: InputEncoding,
    #[arg(long, value_enum)]
    pub json_style: Option<JsonStyleArg>,
    #[arg(long, value_enum)]
    pub header: Option<HeaderArg>,
    /// CSV field delimiter (one ASCII character).
    #[arg(long)]
    pub delimiter: Option<String>,
    #[arg(long, value_enum)]
    pub line_ending: Option<LineEndingArg>,
    /// Separator used by `--fanout join`.
    #[arg(long)]
    pub join_delimiter: Option<String>,
    #[arg(long, value_enum)]
    pub unknown_union_tags: Option<UnionTagArg>,
    /// Omit the leading `_type` column/key.
    #[arg(long)]
    pub no_type_field: bool,
    /// Inputs start with a u32 length prefix.
    #[arg(long)]
    pub size_prefixed: bool,
}

impl ExportArgs {
    /// Layer command-line values over the loaded config.
    pub fn apply(&self, config: &mut ExportConfig) {
        if let Some(fanout) = self.fanout {
            config.fanout = Some(fanout.into());
        }
        if let Some(delimiter) = &self.join_delimiter {
            config.join_delimiter = delimiter.clone();
        }
        if let Some(style) = self.json_style {
            config.json.style = style.into();
        }
        if let Some(header) = self.header {
            config.csv.header = header.into();
        }
        if let Some(delimiter) = &self.delimiter {
            config.csv.delimiter = delimiter.clone();
        }
        if let Some(line_ending) = self.line_ending {
            config.csv.line_ending = line_ending.into();
        }
        if let Some(policy) = self.unknown_union_tags {
            config.unknown_union_tags = policy.into();
        }
        if self.no_type_field {
            config.type_field = false;
        }
        if self.size_prefixed {
            config.size_prefixed = true;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Csv,
    Json,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FanoutArg {
    /// One row per combination of vector elements.
    Cartesian,
    /// First element of every vector only.
    First,
    /// Join scalar vectors into one cell.
    Join,
}

impl From<FanoutArg> for FanoutKind {
    fn from(arg: FanoutArg) -> Self {
        match arg {
            FanoutArg::Cartesian => FanoutKind::Cartesian,
            FanoutArg::First => FanoutKind::First,
            FanoutArg::Join => FanoutKind::Join,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JsonStyleArg {
    Pretty,
    Compact,
    Ndjson,
}

impl From<JsonStyleArg> for JsonStyle {
    fn from(arg: JsonStyleArg) -> Self {
        match arg {
            JsonStyleArg::Pretty => JsonStyle::Pretty,
            JsonStyleArg::Compact => JsonStyle::Compact,
            JsonStyleArg::Ndjson => JsonStyle::Ndjson,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HeaderArg {
    /// Columns seen in the rows, first-seen order.
    Observed,
    /// Every column the schema can produce.
    Schema,
}

impl From<HeaderArg> for HeaderStrategy {
    fn from(arg: HeaderArg) -> Self {
        match arg {
            HeaderArg::Observed => HeaderStrategy::Observed,
            HeaderArg::Schema => HeaderStrategy::Schema,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LineEndingArg {
    Crlf,
    Lf,
}

impl From<LineEndingArg> for LineEnding {
    fn from(arg: LineEndingArg) -> Self {
        match arg {
            LineEndingArg::Crlf => LineEnding::Crlf,
            LineEndingArg::Lf => LineEnding::Lf,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UnionTagArg {
    Fail,
    Skip,
}

impl From<UnionTagArg> for UnionTagPolicy {
    fn from(arg: UnionTagArg) -> Self {
        match arg {
            UnionTagArg::Fail => UnionTagPolicy::Fail,
            UnionTagArg::Skip => UnionTagPolicy::Skip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "snapshot-export",
            "decode",
            "--input",
            "in.bin",
            "--schema",
            "schemas",
            "--format",
            "csv",
            "--fanout",
            "join",
            "--join-delimiter",
            "|",
            "--line-ending",
            "lf",
            "--no-type-field",
        ])
        .expect("arguments parse");
        let Command::Decode(args) = cli.command else {
            panic!("expected decode");
        };
        let mut config = ExportConfig::default();
        args.export.apply(&mut config);
        assert_eq!(config.fanout, Some(FanoutKind::Join));
        assert_eq!(config.join_delimiter, "|");
        assert_eq!(config.csv.line_ending, LineEnding::Lf);
        assert!(!config.type_field);
        assert_eq!(args.export.encoding, InputEncoding::Raw);
        assert!(args.output.is_none());
    }

    #[test]
    fn table_mode_defaults_to_base64_and_detection() {
        let cli = Cli::try_parse_from([
            "snapshot-export",
            "table",
            "--csv",
            "export.csv",
            "--schema",
            "schemas",
            "--json-style",
            "ndjson",
        ])
        .expect("arguments parse");
        let Command::Table(args) = cli.command else {
            panic!("expected table");
        };
        assert_eq!(args.encoding, InputEncoding::Base64);
        assert!(args.columns.is_empty());
        let mut config = ExportConfig::default();
        args.apply(&mut config);
        assert_eq!(config.json.style, JsonStyle::Ndjson);

        let cli = Cli::try_parse_from([
            "snapshot-export",
            "table",
            "-c",
            "export.csv",
            "--schema",
            "schemas",
            "--column",
            "state",
            "--column",
            "history",
            "--encoding",
            "hex",
        ])
        .expect("arguments parse");
        let Command::Table(args) = cli.command else {
            panic!("expected table");
        };
        assert_eq!(args.columns, vec!["state".to_string(), "history".to_string()]);
        assert_eq!(args.encoding, InputEncoding::Hex);
    }

    #[test]
    fn batch_needs_inputs() {
        let err = Cli::try_parse_from([
            "snapshot-export",
            "batch",
            "--out-dir",
            "out",
            "--schema",
            "schemas",
            "--format",
            "json",
        ])
        .expect_err("inputs are required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
