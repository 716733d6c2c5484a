pub mod cli;
pub mod columns;
pub mod config;
pub mod data;
pub mod db;
pub mod detect;
pub mod dialect;
pub mod error;
pub mod filename;
pub mod job;
pub mod prepare;
pub mod rows;
pub mod schema;
pub mod sync;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};
use serde_json::json;

use crate::{
    cli::{Cli, Commands},
    config::SyncConfig,
    detect::{SampleTypeDetector, TypeDetector},
    prepare::PrepareOptions,
    rows::{CsvRowSource, RowBatch, RowSource, resolve_encoding, resolve_input_delimiter},
    sync::{DryRunSummary, ReapOutcome, SyncReport},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("crump", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => handle_sync(&args),
        Commands::Prepare(args) => handle_prepare(&args),
        Commands::Inspect(args) => handle_inspect(&args),
    }
}

fn handle_sync(args: &cli::SyncArgs) -> Result<()> {
    let config = SyncConfig::load(&args.config)
        .with_context(|| format!("Loading config from {:?}", args.config))?;
    let job = config.require_job(&args.job)?;
    let filename_values = filename::extract_for_job(job, &args.file, true)?;
    if let Some(values) = &filename_values {
        debug!("Filename values for {:?}: {:?}", args.file, values);
    }

    let encoding = resolve_encoding(args.input_encoding.as_deref())?;
    let delimiter = resolve_input_delimiter(&args.file, args.delimiter);
    info!(
        "Reading '{}' with delimiter '{}' for job '{}'",
        args.file.display(),
        printable_delimiter(delimiter),
        job.name
    );
    let mut source = CsvRowSource::open(&args.file, Some(delimiter), encoding)
        .with_context(|| format!("Opening input file {:?}", args.file))?;
    let detector = SampleTypeDetector {
        sample_rows: args.sample_rows,
    };
    let batch = RowBatch::build(job, &mut source, &detector, filename_values.as_ref())
        .with_context(|| format!("Reading rows from {:?}", args.file))?;

    let mut db = db::connect(&args.db_url).context("Connecting to database")?;
    if args.dry_run {
        let summary = sync::dry_run_sync(&batch, job, db.as_mut(), filename_values.as_ref())?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_dry_run(&summary);
        }
    } else {
        let report = sync::sync(&batch, job, db.as_mut(), filename_values.as_ref())?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
        } else {
            print_report(&report);
        }
    }
    Ok(())
}

fn report_json(report: &SyncReport) -> serde_json::Value {
    let new_columns: Vec<&str> = report
        .plan
        .columns_to_add
        .iter()
        .filter(|_| !report.plan.create_table)
        .map(|column| column.name.as_str())
        .collect();
    let new_indexes: Vec<&str> = report
        .plan
        .indexes_to_add
        .iter()
        .map(|index| index.name.as_str())
        .collect();
    json!({
        "table_name": report.table,
        "table_created": report.plan.create_table,
        "new_columns": new_columns,
        "new_indexes": new_indexes,
        "rows_synced": report.rows_synced,
        "reap": report.reap,
        "rows_deleted": report.reap.deleted(),
    })
}

fn print_report(report: &SyncReport) {
    println!("Synced {} row(s) into '{}'", report.rows_synced, report.table);
    if report.plan.create_table {
        println!("Created table '{}'", report.table);
    } else {
        for column in &report.plan.columns_to_add {
            println!("Added column '{}'", column.name);
        }
    }
    for index in &report.plan.indexes_to_add {
        println!("Created index '{}'", index.name);
    }
    match report.reap {
        ReapOutcome::Disabled => {}
        ReapOutcome::Skipped(reason) => println!("Stale row cleanup skipped ({reason:?})"),
        ReapOutcome::Deleted(count) => println!("Deleted {count} stale row(s)"),
    }
}

fn print_dry_run(summary: &DryRunSummary) {
    println!("Dry run for table '{}'", summary.table_name);
    if !summary.table_exists {
        println!("  Table would be created");
    }
    for column in &summary.new_columns {
        println!("  New column: {} ({})", column.name, column.sql_type);
    }
    for index in &summary.new_indexes {
        println!("  New index: {index}");
    }
    println!("  Rows to sync: {}", summary.rows_to_sync);
    println!("  Stale rows to delete: {}", summary.rows_to_delete);
    if !summary.has_changes() {
        println!("  No changes");
    }
}

fn handle_prepare(args: &cli::PrepareArgs) -> Result<()> {
    let encoding = resolve_encoding(args.input_encoding.as_deref())?;
    let options = PrepareOptions {
        table: args.table.clone(),
        id_columns: args.id_columns.clone(),
        force: args.force,
    };
    let detector = SampleTypeDetector {
        sample_rows: args.sample_rows,
    };
    let job = prepare::prepare_csv(
        &args.file,
        &args.config,
        &args.job,
        &options,
        args.delimiter,
        encoding,
        &detector,
    )
    .with_context(|| format!("Preparing job '{}' from {:?}", args.job, args.file))?;
    println!(
        "Job '{}' for table '{}' written to {}",
        job.name,
        job.target_table,
        args.config.display()
    );
    Ok(())
}

fn handle_inspect(args: &cli::InspectArgs) -> Result<()> {
    let encoding = resolve_encoding(args.input_encoding.as_deref())?;
    let mut source = CsvRowSource::open(&args.file, args.delimiter, encoding)
        .with_context(|| format!("Opening input file {:?}", args.file))?;
    let headers = source.headers().to_vec();
    let rows = source
        .read_all()
        .with_context(|| format!("Reading rows from {:?}", args.file))?;
    let detected = SampleTypeDetector {
        sample_rows: args.sample_rows,
    }
    .detect(&headers, &rows);
    println!("{} row(s), {} column(s)", rows.len(), detected.len());
    for (name, column) in detected.iter() {
        let nullability = if column.nullable { "nullable" } else { "not null" };
        println!("  {name}: {} ({nullability})", column.data_type);
    }
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
