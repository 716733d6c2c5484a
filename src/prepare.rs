use std::path::Path;

use anyhow::{Context, Result, bail};
use log::info;

use crate::{
    config::SyncConfig,
    data::DataType,
    detect::{DetectedColumns, TypeDetector},
    job::{ColumnMapping, IndexDefinition, Job, SortDirection},
    rows::{CsvRowSource, RowSource},
};

pub const DEFAULT_ID_MATCHERS: &[&str] = &["id", "uuid", "key", "code"];

#[derive(Debug, Clone, Default)]
pub struct PrepareOptions {
    /// Target table; defaults to the job name.
    pub table: Option<String>,
    /// Explicit identity columns, in key order.
    pub id_columns: Vec<String>,
    pub force: bool,
}

/// Picks the identity column: first matcher that names a column
/// (case-insensitive), else the first `*_id` column, else the first column.
pub fn suggest_id_column(columns: &[String], matchers: Option<&[String]>) -> Option<String> {
    let defaults: Vec<String> = DEFAULT_ID_MATCHERS.iter().map(|m| m.to_string()).collect();
    let matchers = matchers.unwrap_or(&defaults);
    for matcher in matchers {
        if let Some(found) = columns
            .iter()
            .find(|column| column.eq_ignore_ascii_case(matcher))
        {
            return Some(found.clone());
        }
    }
    columns
        .iter()
        .find(|column| column.to_ascii_lowercase().ends_with("_id"))
        .or_else(|| columns.first())
        .cloned()
}

/// Descending indexes on date/datetime columns, ascending ones on `*_id` and
/// `*_key` columns. Identity columns are skipped.
pub fn suggest_indexes(detected: &DetectedColumns, id_columns: &[String]) -> Vec<IndexDefinition> {
    detected
        .iter()
        .filter(|(name, _)| !id_columns.iter().any(|id| id.as_str() == *name))
        .filter_map(|(name, column)| {
            let lower = name.to_ascii_lowercase();
            let direction = match column.data_type {
                DataType::Date | DataType::DateTime => SortDirection::Desc,
                _ if lower.ends_with("_id") || lower.ends_with("_key") => SortDirection::Asc,
                _ => return None,
            };
            Some(IndexDefinition::new(format!("idx_{name}")).column(name, direction))
        })
        .collect()
}

/// Builds a job for a file with the given detected columns.
pub fn build_job(
    name: &str,
    detected: &DetectedColumns,
    matchers: Option<&[String]>,
    options: &PrepareOptions,
) -> Result<Job> {
    let headers: Vec<String> = detected.names().map(str::to_string).collect();
    if headers.is_empty() {
        bail!("No columns found in input file");
    }

    let (id_columns, key_mapping) = if options.id_columns.is_empty() {
        let Some(id_column) = suggest_id_column(&headers, matchers) else {
            bail!("Could not choose an ID column");
        };
        let clashes = headers
            .iter()
            .any(|header| header != &id_column && header.eq_ignore_ascii_case("id"));
        let dest = if clashes { id_column.as_str() } else { "id" };
        let mapping = typed_mapping(detected, &id_column, dest);
        (vec![id_column], vec![mapping])
    } else {
        let mut mappings = Vec::with_capacity(options.id_columns.len());
        for id_column in &options.id_columns {
            if !detected.contains(id_column) {
                bail!("ID column '{id_column}' not found in input file");
            }
            mappings.push(typed_mapping(detected, id_column, id_column));
        }
        (options.id_columns.clone(), mappings)
    };

    let columns: Vec<ColumnMapping> = headers
        .iter()
        .filter(|header| !id_columns.contains(*header))
        .map(|header| typed_mapping(detected, header, header))
        .collect();
    let table = options.table.clone().unwrap_or_else(|| name.to_string());
    let mut job = Job::new(name, table, key_mapping);
    if !columns.is_empty() {
        job = job.with_columns(columns);
    }
    for index in suggest_indexes(detected, &id_columns) {
        job = job.with_index(index);
    }
    job.validate()?;
    Ok(job)
}

fn typed_mapping(detected: &DetectedColumns, source: &str, dest: &str) -> ColumnMapping {
    let mut mapping = ColumnMapping::new(source, dest);
    if let Some(column) = detected.get(source) {
        mapping = mapping
            .with_type(column.data_type)
            .with_nullable(column.nullable);
    }
    mapping
}

/// Samples `input`, builds a job named `job_name` and stores it in the
/// configuration at `config_path`, creating the file when needed.
pub fn prepare(
    input: &Path,
    config_path: &Path,
    job_name: &str,
    options: &PrepareOptions,
    source: &mut dyn RowSource,
    detector: &dyn TypeDetector,
) -> Result<Job> {
    let headers = source.headers().to_vec();
    let rows = source
        .read_all()
        .with_context(|| format!("Reading rows from {input:?}"))?;
    let detected = detector.detect(&headers, &rows);
    info!(
        "Detected {} column(s) across {} row(s) in {:?}",
        detected.len(),
        rows.len(),
        input
    );

    let mut config = SyncConfig::load_or_default(config_path)?;
    let job = build_job(
        job_name,
        &detected,
        config.id_column_matchers.as_deref(),
        options,
    )?;
    config.add_or_update_job(job.clone(), options.force)?;
    config
        .save(config_path)
        .with_context(|| format!("Writing config to {config_path:?}"))?;
    info!(
        "Job '{}' written to {:?} with {} index suggestion(s)",
        job.name,
        config_path,
        job.indexes.len()
    );
    Ok(job)
}

/// Opens `input` as CSV and runs [`prepare`] on it.
pub fn prepare_csv(
    input: &Path,
    config_path: &Path,
    job_name: &str,
    options: &PrepareOptions,
    delimiter: Option<u8>,
    encoding: &'static encoding_rs::Encoding,
    detector: &dyn TypeDetector,
) -> Result<Job> {
    let mut source = CsvRowSource::open(input, delimiter, encoding)?;
    prepare(input, config_path, job_name, options, &mut source, detector)
}
