//! sdf2pg CLI - Export SQL Server Compact attendance databases to PostgreSQL scripts.

mod prompts;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use sdf2pg::discovery::{auto_detect, list_tables, raw_schema};
#[cfg(not(feature = "odbc"))]
use sdf2pg::engine::{DriverError, DriverErrorKind};
use sdf2pg::engine::SdfDriver;
use sdf2pg::writer::{PgScriptWriter, SourceMetadata};
use sdf2pg::{pipeline, ConnectionOpener, ExportError, OpenedSource};
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "sdf2pg")]
#[command(about = "Export SQL Server Compact (.sdf) attendance databases to PostgreSQL scripts")]
#[command(version)]
struct Cli {
    /// Path to the source .sdf file
    source: PathBuf,

    /// Output .sql file [default: source name with .sql extension]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Export these tables raw (every column) instead of the semantic
    /// attendance export; repeatable
    #[arg(long)]
    table: Vec<String>,

    /// List the tables in the source file and exit
    #[arg(long)]
    list: bool,

    /// Database password (prompted for when needed and not given)
    #[arg(long, env = "SDF2PG_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Target PostgreSQL schema
    #[arg(long, default_value = "public")]
    schema: String,

    /// Target table name [default: checkinout, or the source table name
    /// lowercased for raw exports]
    #[arg(long)]
    target_table: Option<String>,

    /// Consent to an in-place format upgrade without prompting
    #[arg(long, short = 'y')]
    yes: bool,

    /// ODBC driver name used to open the file
    #[arg(long, default_value = "Microsoft SQL Server Compact Edition")]
    driver: String,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

fn run() -> Result<(), ExportError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    if cli.output.is_some() && cli.table.len() > 1 {
        return Err(ExportError::invalid_arguments(
            "--output cannot be combined with multiple --table flags; \
             per-table files are derived from the source name",
        ));
    }

    let driver = make_driver(&cli.driver)?;
    let opener = ConnectionOpener::new(driver.as_ref());

    let mut passwords = prompts::PasswordPrompt;
    let mut consent = prompts::UpgradePrompt { assume_yes: cli.yes };
    let opened = opener.open(&cli.source, cli.password.clone(), &mut passwords, &mut consent)?;

    if let Some(ref backup) = opened.backup_path {
        info!("Backup of the original file kept at {}", backup.display());
    }

    if cli.list {
        return print_inventory(&opened);
    }

    if cli.table.is_empty() {
        export_attendance(&cli, &opened)
    } else {
        export_raw_tables(&cli, &opened)
    }
}

/// Semantic attendance export: auto-detect the table and map its columns.
fn export_attendance(cli: &Cli, opened: &OpenedSource) -> Result<(), ExportError> {
    let resolved = auto_detect(&*opened.connection)?;
    info!(
        "Exporting {} ({} rows, {} mapped columns)",
        resolved.table,
        resolved.row_count,
        resolved.mappings.len()
    );

    let target_table = cli.target_table.clone().unwrap_or_else(|| "checkinout".to_string());
    let writer = PgScriptWriter::new(&cli.schema, &target_table);
    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.source.with_extension("sql"));
    let meta = SourceMetadata {
        source_file: cli.source.display().to_string(),
        source_table: resolved.table.clone(),
        row_count: resolved.row_count,
    };

    let sink = BufWriter::new(File::create(&output)?);
    let mut progress = progress_sink(cli.progress);
    let outcome = pipeline::export_semantic(
        &*opened.connection,
        &resolved,
        sink,
        &writer,
        &meta,
        progress.as_mut().map(|p| p as &mut dyn FnMut(u64)),
    )?;

    report_outcome(cli, &resolved.table, &output, &outcome)
}

/// Raw export of explicitly named tables, one script per table.
fn export_raw_tables(cli: &Cli, opened: &OpenedSource) -> Result<(), ExportError> {
    for table in &cli.table {
        let raw = raw_schema(&*opened.connection, table)?;
        let target_table = cli
            .target_table
            .clone()
            .filter(|_| cli.table.len() == 1)
            .unwrap_or_else(|| table.to_lowercase());
        let writer = PgScriptWriter::new(&cli.schema, &target_table);
        let output = match (&cli.output, cli.table.len()) {
            (Some(path), 1) => path.clone(),
            _ => derived_output(&cli.source, table),
        };
        let meta = SourceMetadata {
            source_file: cli.source.display().to_string(),
            source_table: table.clone(),
            row_count: opened.connection.row_count(table)?,
        };

        info!("Exporting table {} ({} rows)", table, meta.row_count);

        let sink = BufWriter::new(File::create(&output)?);
        let mut progress = progress_sink(cli.progress);
        let outcome = pipeline::export_table_streaming(
            &*opened.connection,
            &raw,
            sink,
            &writer,
            &meta,
            progress.as_mut().map(|p| p as &mut dyn FnMut(u64)),
        )?;

        report_outcome(cli, table, &output, &outcome)?;
    }
    Ok(())
}

fn print_inventory(opened: &OpenedSource) -> Result<(), ExportError> {
    let tables = list_tables(&*opened.connection)?;
    if tables.is_empty() {
        println!("No user tables found.");
        return Ok(());
    }
    for table in &tables {
        println!("{:<32} {:>10} rows", table.name, table.row_count);
    }
    Ok(())
}

fn report_outcome(
    cli: &Cli,
    source_table: &str,
    output: &Path,
    outcome: &pipeline::ExportOutcome,
) -> Result<(), ExportError> {
    for warning in &outcome.warnings {
        warn!("{warning}");
    }

    if cli.output_json {
        println!("{}", serde_json::to_string_pretty(outcome).map_err(std::io::Error::other)?);
    } else {
        println!("\nExport completed!");
        println!("  Source table: {}", source_table);
        println!(
            "  Records: {} written, {} skipped",
            outcome.records_written, outcome.records_skipped
        );
        println!("  Batches: {}", outcome.batch_count);
        println!("  Output: {} ({} bytes)", output.display(), outcome.bytes_written);
        if !outcome.warnings.is_empty() {
            println!("  Warnings: {} (see log)", outcome.warnings.len());
        }
    }
    Ok(())
}

fn derived_output(source: &Path, table: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());
    source.with_file_name(format!("{}_{}.sql", stem, table.to_lowercase()))
}

fn progress_sink(enabled: bool) -> Option<impl FnMut(u64)> {
    enabled.then(|| |rows: u64| eprintln!("{{\"rows_processed\":{rows}}}"))
}

#[cfg(feature = "odbc")]
fn make_driver(driver_name: &str) -> Result<Box<dyn SdfDriver>, ExportError> {
    Ok(Box::new(sdf2pg::engine::odbc::OdbcDriver::new(driver_name)?))
}

#[cfg(not(feature = "odbc"))]
fn make_driver(_driver_name: &str) -> Result<Box<dyn SdfDriver>, ExportError> {
    Err(DriverError::new(
        DriverErrorKind::Other,
        "this build has no database engine; rebuild with the `odbc` feature enabled",
    )
    .into())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
