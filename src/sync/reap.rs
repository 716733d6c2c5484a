use std::collections::BTreeMap;

use log::{debug, info};
use serde::Serialize;

use crate::{
    data::Value,
    db::{Database, DbResult},
    dialect::SqlColumn,
    job::Job,
    sync::upsert::KeyTuple,
};

/// Delete-scoping destination column to its typed value for this file.
pub type PartitionValues = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The file name yielded no value for at least one delete-scoping column.
    NoPartitionValues,
    /// Nothing was written, so every row in the partition would look stale.
    NoCurrentKeys,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReapOutcome {
    /// The job marks no delete-scoping column.
    Disabled,
    Skipped(SkipReason),
    Deleted(u64),
}

impl ReapOutcome {
    pub fn deleted(self) -> u64 {
        match self {
            ReapOutcome::Deleted(count) => count,
            _ => 0,
        }
    }
}

/// Session-local table the current key tuples are staged in before the
/// staleness statement runs.
pub const STAGED_KEYS_TABLE: &str = "crump_staged_keys";

/// Columns and scope parameters for one staleness statement.
#[derive(Debug, Clone, PartialEq)]
pub struct StalenessQuery {
    pub keys: Vec<SqlColumn>,
    pub scope: Vec<SqlColumn>,
    pub params: Vec<Option<Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Staleness {
    NotApplicable(ReapOutcome),
    Query(StalenessQuery),
}

/// Decides whether reaping applies and, if so, binds the partition values.
/// `types` maps destination columns to SQL types.
pub fn staleness(
    job: &Job,
    partition: &PartitionValues,
    current_keys: &[KeyTuple],
    types: &BTreeMap<String, String>,
) -> Staleness {
    let scope_columns = job.delete_scope_columns();
    if scope_columns.is_empty() {
        return Staleness::NotApplicable(ReapOutcome::Disabled);
    }
    let mut scope = Vec::with_capacity(scope_columns.len());
    let mut params = Vec::with_capacity(scope_columns.len());
    for column in scope_columns {
        let Some(value) = partition.get(&column.dest) else {
            return Staleness::NotApplicable(ReapOutcome::Skipped(SkipReason::NoPartitionValues));
        };
        scope.push(typed_column(&column.dest, types));
        params.push(Some(value.clone()));
    }
    if current_keys.is_empty() {
        return Staleness::NotApplicable(ReapOutcome::Skipped(SkipReason::NoCurrentKeys));
    }
    let keys = job
        .key_columns()
        .into_iter()
        .map(|name| typed_column(name, types))
        .collect();
    Staleness::Query(StalenessQuery {
        keys,
        scope,
        params,
    })
}

fn typed_column(name: &str, types: &BTreeMap<String, String>) -> SqlColumn {
    let sql_type = types
        .get(name)
        .cloned()
        .unwrap_or_else(|| "TEXT".to_string());
    SqlColumn::new(name, sql_type)
}

/// Creates the staged key table and fills it in chunks that stay under the
/// dialect's bind parameter limit. Must run inside a transaction so a
/// failure leaves no table behind.
fn stage_keys(
    db: &mut dyn Database,
    keys: &[SqlColumn],
    current_keys: &[KeyTuple],
) -> DbResult<()> {
    let create = db.dialect().build_key_table(STAGED_KEYS_TABLE, keys);
    db.execute_batch(&create)?;
    let names: Vec<&str> = keys.iter().map(|key| key.name.as_str()).collect();
    let tuples_per_statement = (db.dialect().max_bind_params() / keys.len().max(1)).max(1);
    for chunk in current_keys.chunks(tuples_per_statement) {
        let sql = db
            .dialect()
            .build_upsert(STAGED_KEYS_TABLE, keys, &names, chunk.len());
        let params: Vec<Option<Value>> = chunk
            .iter()
            .flat_map(|tuple| tuple.iter().cloned().map(Some))
            .collect();
        db.execute(&sql, &params)?;
    }
    debug!(
        "Staged {} key tuple(s) in '{STAGED_KEYS_TABLE}'",
        current_keys.len()
    );
    Ok(())
}

fn drop_staged_keys(db: &mut dyn Database) -> DbResult<()> {
    let sql = format!("DROP TABLE {}", db.dialect().quote_ident(STAGED_KEYS_TABLE));
    db.execute_batch(&sql)
}

/// Deletes stale rows in the file's partition. Runs inside the caller's
/// transaction.
pub fn reap(
    db: &mut dyn Database,
    job: &Job,
    partition: &PartitionValues,
    current_keys: &[KeyTuple],
    types: &BTreeMap<String, String>,
) -> DbResult<ReapOutcome> {
    let query = match staleness(job, partition, current_keys, types) {
        Staleness::NotApplicable(outcome) => {
            if let ReapOutcome::Skipped(reason) = outcome {
                info!(
                    "Skipping stale row cleanup for '{}': {:?}",
                    job.target_table, reason
                );
            }
            return Ok(outcome);
        }
        Staleness::Query(query) => query,
    };
    stage_keys(db, &query.keys, current_keys)?;
    let sql = db.dialect().build_staleness_delete(
        &job.target_table,
        STAGED_KEYS_TABLE,
        &query.keys,
        &query.scope,
    );
    let deleted = db.execute(&sql, &query.params)?;
    drop_staged_keys(db)?;
    info!(
        "Deleted {deleted} stale row(s) from '{}'",
        job.target_table
    );
    Ok(ReapOutcome::Deleted(deleted))
}

/// Counts the rows [`reap`] would delete. The staged keys live in a
/// transaction of its own that is always rolled back, so nothing persists.
pub fn count_stale(
    db: &mut dyn Database,
    job: &Job,
    partition: &PartitionValues,
    current_keys: &[KeyTuple],
    types: &BTreeMap<String, String>,
) -> DbResult<u64> {
    let Staleness::Query(query) = staleness(job, partition, current_keys, types) else {
        return Ok(0);
    };
    db.begin()?;
    let counted = stage_keys(db, &query.keys, current_keys).and_then(|()| {
        let sql = db.dialect().build_staleness_count(
            &job.target_table,
            STAGED_KEYS_TABLE,
            &query.keys,
            &query.scope,
        );
        db.query_count(&sql, &query.params)
    });
    let rolled_back = db.rollback();
    let count = counted?;
    rolled_back?;
    Ok(count)
}
