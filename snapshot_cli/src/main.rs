use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use color_eyre::eyre::{Result, WrapErr};
use snapshot_export::{
    load_export_config_from_env, ExportConfig, ExportTarget, Pipeline,
};
use snapshot_schema::SchemaRegistry;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod cli;
mod exit;
mod input;
mod output;
mod table;

use cli::{BatchArgs, Cli, Command, DecodeArgs, Format, TableArgs};
use input::InputSource;
use table::TableOptions;

fn main() -> ExitCode {
    if let Err(err) = color_eyre::install() {
        eprintln!("failed to install error reporting: {err}");
    }
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(status) => exit::exit_code(status),
        Err(report) => {
            eprintln!("Error: {report:?}");
            exit::exit_code(exit::status_for_report(&report))
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .compact()
        .init();
}

fn run(cli: Cli) -> Result<u8> {
    match cli.command {
        Command::Schemas { schema } => {
            let registry = load_registry(&schema)?;
            print!("{}", registry.format_schema_list());
            Ok(0)
        }
        Command::Decode(args) => {
            let mut config = load_config(cli.config.as_deref())?;
            args.export.apply(&mut config);
            let Some(target) = export_target(args.export.format, &config) else {
                return Ok(missing_fanout());
            };
            decode(&args, &config, &target)
        }
        Command::Batch(args) => {
            let mut config = load_config(cli.config.as_deref())?;
            args.export.apply(&mut config);
            let Some(target) = export_target(args.export.format, &config) else {
                return Ok(missing_fanout());
            };
            batch(&args, &config, &target)
        }
        Command::Table(args) => {
            let mut config = load_config(cli.config.as_deref())?;
            args.apply(&mut config);
            export_table(&args, &config)
        }
    }
}

/// An explicit `--config` must load; otherwise fall back through the
/// environment to the builtin settings. Callers apply flags on top.
fn load_config(path: Option<&Path>) -> Result<ExportConfig> {
    match path {
        Some(path) => ExportConfig::from_file(path)
            .wrap_err_with(|| format!("loading export config {}", path.display())),
        None => Ok(load_export_config_from_env().0),
    }
}

fn export_target(format: Format, config: &ExportConfig) -> Option<ExportTarget> {
    match format {
        Format::Json => Some(ExportTarget::Json),
        Format::Csv => config
            .fanout_policy()
            .map(|fanout| ExportTarget::Csv { fanout }),
    }
}

fn missing_fanout() -> u8 {
    let err = Cli::command().error(
        clap::error::ErrorKind::MissingRequiredArgument,
        "CSV output needs a fan-out policy: pass --fanout <cartesian|first|join> or set `fanout` in the config",
    );
    let _ = err.print();
    exit::USAGE
}

fn load_registry(path: &Path) -> Result<SchemaRegistry> {
    SchemaRegistry::load_path(path)
        .wrap_err_with(|| format!("loading schemas from {}", path.display()))
}

fn pipeline(schema: &Path, config: &ExportConfig) -> Result<Pipeline> {
    let options = config.to_options().wrap_err("applying export config")?;
    let registry = load_registry(schema)?;
    Ok(Pipeline::new(Arc::new(registry), options))
}

fn decode(args: &DecodeArgs, config: &ExportConfig, target: &ExportTarget) -> Result<u8> {
    let pipeline = pipeline(&args.export.schema, config)?;
    let source = InputSource::from_arg(&args.input);
    let bytes = input::load(&source, args.export.encoding)?;
    let rendered = pipeline
        .render(&bytes, args.export.root.as_deref(), target)
        .wrap_err_with(|| format!("exporting {}", source.display()))?;
    output::write_output(args.output.as_deref(), &rendered.bytes).wrap_err_with(|| {
        match &args.output {
            Some(path) => format!("writing {}", path.display()),
            None => "writing to stdout".to_string(),
        }
    })?;
    info!(
        target: "snapshot_cli",
        input = %source.display(),
        schema = %rendered.summary.schema,
        rows = ?rendered.summary.rows,
        bytes = rendered.summary.bytes,
        "export.written"
    );
    Ok(0)
}

fn batch(args: &BatchArgs, config: &ExportConfig, target: &ExportTarget) -> Result<u8> {
    let pipeline = pipeline(&args.export.schema, config)?;
    let destinations = output_paths(&args.inputs, &args.out_dir, args.export.format.extension());
    let encoding = args.export.encoding;

    let results = pipeline.export_batch_with(
        &args.inputs,
        args.export.root.as_deref(),
        target,
        |path: &PathBuf| -> Result<Vec<u8>> {
            Ok(input::load(&InputSource::File(path.clone()), encoding)?)
        },
        |index, rendered| {
            let destination = &destinations[index];
            output::write_output(Some(destination), &rendered.bytes)
                .wrap_err_with(|| format!("writing {}", destination.display()))
        },
    );

    let mut status = 0;
    let mut exported = 0usize;
    for (input, result) in args.inputs.iter().zip(results) {
        match result {
            Ok(_) => exported += 1,
            Err(report) => {
                let report = report.wrap_err(format!("exporting {}", input.display()));
                error!(target: "snapshot_cli", input = %input.display(), "batch.export_failed");
                eprintln!("Error: {report:?}");
                status = first_failure(status, exit::status_for_report(&report));
            }
        }
    }
    eprintln!(
        "exported {exported} of {} snapshots to {}",
        args.inputs.len(),
        args.out_dir.display()
    );
    Ok(status)
}

fn export_table(args: &TableArgs, config: &ExportConfig) -> Result<u8> {
    let pipeline = pipeline(&args.schema, config)?;
    let file = table::open(&args.csv)?;
    let options = TableOptions {
        columns: args.columns.clone(),
        encoding: args.encoding,
        root: args.root.clone(),
    };
    let decoded = table::decode_table(file, &pipeline, &options)
        .wrap_err_with(|| format!("reading {}", args.csv.display()))?;
    if decoded.rows.is_empty() {
        eprintln!("No rows found in CSV.");
        return Ok(0);
    }

    let rows = decoded.rows.len();
    let mut out = Vec::new();
    table::write_table(decoded.rows, config.json.style, &mut out)
        .wrap_err("serializing decoded rows")?;
    output::write_output(args.output.as_deref(), &out).wrap_err_with(|| {
        match &args.output {
            Some(path) => format!("writing {}", path.display()),
            None => "writing to stdout".to_string(),
        }
    })?;
    info!(
        target: "snapshot_cli",
        input = %args.csv.display(),
        rows,
        blob_columns = ?decoded.blob_columns,
        errors = decoded.errors,
        "table.written"
    );
    if decoded.errors > 0 {
        eprintln!("{} decode error(s) encountered. See log for details.", decoded.errors);
    }
    Ok(0)
}

fn first_failure(current: u8, next: u8) -> u8 {
    if current == 0 {
        next
    } else {
        current
    }
}

/// `<out_dir>/<stem>.<extension>`, with `-<n>` appended to repeated stems.
fn output_paths(inputs: &[PathBuf], out_dir: &Path, extension: &str) -> Vec<PathBuf> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    inputs
        .iter()
        .map(|input| {
            let stem = input
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "snapshot".to_string());
            let count = seen.entry(stem.clone()).or_insert(0);
            let name = if *count == 0 {
                format!("{stem}.{extension}")
            } else {
                format!("{stem}-{count}.{extension}")
            };
            *count += 1;
            out_dir.join(name)
        })
        .collect()
}
