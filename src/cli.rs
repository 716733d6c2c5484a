use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Sync CSV data files into PostgreSQL or SQLite tables", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Upsert a CSV file into the table configured for a job
    Sync(SyncArgs),
    /// Generate a job configuration from a sample CSV file
    Prepare(PrepareArgs),
    /// Show the columns of a CSV file with their detected types
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// CSV file to sync
    pub file: PathBuf,
    /// YAML configuration file holding the job
    pub config: PathBuf,
    /// Name of the job to run
    pub job: String,
    /// Database URL (sqlite:///path.db, sqlite::memory:, postgres://...)
    #[arg(long = "db-url", env = "DATABASE_URL")]
    pub db_url: String,
    /// Report what would change without touching the database
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
    /// Number of rows to sample when detecting types (0 means full scan)
    #[arg(long, default_value_t = 0)]
    pub sample_rows: usize,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct PrepareArgs {
    /// Sample CSV file to analyse
    pub file: PathBuf,
    /// YAML configuration file to create or update
    pub config: PathBuf,
    /// Name of the job to write
    pub job: String,
    /// Target table name (defaults to the job name)
    #[arg(long)]
    pub table: Option<String>,
    /// Identity column; repeat for a compound key
    #[arg(long = "id-column", action = clap::ArgAction::Append)]
    pub id_columns: Vec<String>,
    /// Overwrite an existing job of the same name
    #[arg(long)]
    pub force: bool,
    /// Number of rows to sample when detecting types (0 means full scan)
    #[arg(long, default_value_t = 0)]
    pub sample_rows: usize,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// CSV file to inspect
    pub file: PathBuf,
    /// Number of rows to sample when detecting types (0 means full scan)
    #[arg(long, default_value_t = 0)]
    pub sample_rows: usize,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "pipe" | "|" => Ok(b'|'),
        "semicolon" | ";" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
