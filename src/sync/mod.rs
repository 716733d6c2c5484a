pub mod dry_run;
pub mod reap;
pub mod upsert;

use std::collections::BTreeMap;

use log::{info, warn};

use crate::{
    columns::{ColumnRole, ResolvedColumn, resolve_columns},
    data::parse_typed_value,
    db::Database,
    dialect::SqlColumn,
    error::{DbError, Phase, SyncError, SyncResult},
    filename::FilenameValues,
    job::Job,
    rows::{Record, RowBatch},
    schema::{MigrationPlan, SchemaSnapshot, apply_plan, effective_types, inspect, plan_for},
};

pub use dry_run::{ColumnSummary, DryRunSummary};
pub use reap::{PartitionValues, ReapOutcome, SkipReason};
pub use upsert::KeyTuple;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub table: String,
    /// Records submitted, including any that collapsed onto the same key.
    pub rows_synced: usize,
    pub plan: MigrationPlan,
    pub reap: ReapOutcome,
}

/// Everything derived from the inputs before any database access.
struct Prepared<'a> {
    resolved: Vec<ResolvedColumn>,
    keys: Vec<&'a str>,
    records: Vec<&'a Record>,
    current_keys: Vec<KeyTuple>,
    partition: PartitionValues,
}

fn prepare<'a>(
    batch: &'a RowBatch,
    job: &'a Job,
    filename_values: Option<&FilenameValues>,
) -> SyncResult<Prepared<'a>> {
    job.validate()?;
    let resolved = resolve_columns(job, &batch.detected)?;
    for column in &batch.columns {
        if !resolved.iter().any(|candidate| &candidate.name == column) {
            return Err(SyncError::Input(format!(
                "Batch column '{column}' is not synced by job '{}'",
                job.name
            )));
        }
    }
    let keys = job.key_columns();
    upsert::validate_keys(&batch.records, &keys)?;
    let records = upsert::dedupe_by_key(&batch.records, &keys);
    let current_keys = records
        .iter()
        .map(|record| upsert::key_tuple(record, &keys))
        .collect();
    let partition = partition_values(&resolved, job, filename_values)?;
    Ok(Prepared {
        resolved,
        keys,
        records,
        current_keys,
        partition,
    })
}

fn partition_values(
    resolved: &[ResolvedColumn],
    job: &Job,
    filename_values: Option<&FilenameValues>,
) -> SyncResult<PartitionValues> {
    let mut partition = PartitionValues::new();
    let Some(values) = filename_values else {
        return Ok(partition);
    };
    for column in job.delete_scope_columns() {
        let Some(raw) = values.get(&column.name) else {
            continue;
        };
        let Some(resolved) = resolved
            .iter()
            .find(|c| c.role == ColumnRole::Filename && c.name == column.dest)
        else {
            continue;
        };
        let value = parse_typed_value(raw, &resolved.data_type).map_err(|err| {
            SyncError::Input(format!(
                "Filename value '{raw}' for column '{}': {err:#}",
                column.dest
            ))
        })?;
        if let Some(value) = value {
            partition.insert(column.dest.clone(), value);
        }
    }
    Ok(partition)
}

fn database_error(job: &Job, phase: Phase) -> impl FnOnce(DbError) -> SyncError + '_ {
    move |source| SyncError::Database {
        job: job.name.clone(),
        table: job.target_table.clone(),
        phase,
        source,
    }
}

fn batch_columns(batch: &RowBatch, types: &BTreeMap<String, String>) -> Vec<SqlColumn> {
    batch
        .columns
        .iter()
        .map(|name| {
            let sql_type = types.get(name).cloned().unwrap_or_else(|| "TEXT".to_string());
            SqlColumn::new(name.clone(), sql_type)
        })
        .collect()
}

/// Upserts `batch` into the job's table, reconciling the schema first and
/// reaping stale rows afterwards. `filename_values` supplies the partition
/// for reaping; `None` skips it.
pub fn sync(
    batch: &RowBatch,
    job: &Job,
    db: &mut dyn Database,
    filename_values: Option<&FilenameValues>,
) -> SyncResult<SyncReport> {
    let prepared = prepare(batch, job, filename_values)?;
    let snapshot =
        inspect(db, &job.target_table).map_err(database_error(job, Phase::Snapshot))?;
    let plan = plan_for(&snapshot, job, &prepared.resolved);
    let types = effective_types(db.dialect(), &snapshot, &prepared.resolved);
    let columns = batch_columns(batch, &types);

    let transactional_ddl = db.dialect().transactional_ddl();
    if !transactional_ddl {
        apply_plan(db, &plan).map_err(database_error(job, Phase::Reconcile))?;
    }
    db.begin().map_err(database_error(job, Phase::Reconcile))?;
    let written = write_phases(
        db,
        job,
        &plan,
        transactional_ddl,
        &columns,
        &prepared,
        &types,
    );
    let reap = match written {
        Ok(outcome) => outcome,
        Err(err) => {
            if let Err(rollback_err) = db.rollback() {
                warn!("Rollback after failed sync of '{}' failed: {rollback_err}", job.name);
            }
            return Err(err);
        }
    };
    db.commit().map_err(database_error(job, Phase::Commit))?;

    info!(
        "Synced {} row(s) into '{}' for job '{}'",
        batch.len(),
        job.target_table,
        job.name
    );
    Ok(SyncReport {
        table: job.target_table.clone(),
        rows_synced: batch.len(),
        plan,
        reap,
    })
}

fn write_phases(
    db: &mut dyn Database,
    job: &Job,
    plan: &MigrationPlan,
    apply_ddl: bool,
    columns: &[SqlColumn],
    prepared: &Prepared<'_>,
    types: &BTreeMap<String, String>,
) -> SyncResult<ReapOutcome> {
    if apply_ddl {
        apply_plan(db, plan).map_err(database_error(job, Phase::Reconcile))?;
    }
    upsert::upsert(
        db,
        &job.target_table,
        columns,
        &prepared.keys,
        &prepared.records,
    )
    .map_err(database_error(job, Phase::Upsert))?;
    reap::reap(
        db,
        job,
        &prepared.partition,
        &prepared.current_keys,
        types,
    )
    .map_err(database_error(job, Phase::Reap))
}

/// Computes what [`sync`] would do for the same inputs without changing the
/// database. Input errors surface exactly as they would for a real run.
pub fn dry_run_sync(
    batch: &RowBatch,
    job: &Job,
    db: &mut dyn Database,
    filename_values: Option<&FilenameValues>,
) -> SyncResult<DryRunSummary> {
    let prepared = prepare(batch, job, filename_values)?;
    let snapshot =
        inspect(db, &job.target_table).map_err(database_error(job, Phase::Snapshot))?;
    let plan = plan_for(&snapshot, job, &prepared.resolved);
    let rows_to_delete = if staleness_checkable(&snapshot, job) {
        let types = effective_types(db.dialect(), &snapshot, &prepared.resolved);
        reap::count_stale(
            db,
            job,
            &prepared.partition,
            &prepared.current_keys,
            &types,
        )
        .map_err(database_error(job, Phase::Project))?
    } else {
        0
    };
    Ok(DryRunSummary::new(
        db.dialect(),
        &snapshot,
        &plan,
        batch.len(),
        rows_to_delete,
    ))
}

/// A missing table, key column or scope column means no persisted row can
/// match the staleness predicate yet.
fn staleness_checkable(snapshot: &SchemaSnapshot, job: &Job) -> bool {
    snapshot.exists
        && job
            .key_columns()
            .iter()
            .all(|key| snapshot.has_column(key))
        && job
            .delete_scope_columns()
            .iter()
            .all(|column| snapshot.has_column(&column.dest))
}
