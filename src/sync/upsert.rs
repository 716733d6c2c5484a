use std::collections::HashMap;

use log::{debug, info};

use crate::{
    data::Value,
    db::{Database, DbResult},
    dialect::SqlColumn,
    error::{SyncError, SyncResult},
    rows::Record,
};

/// Key tuple in key-column order.
pub type KeyTuple = Vec<Value>;

/// Every record must carry a non-null value for every key column. The first
/// offending row fails the whole batch.
pub fn validate_keys(records: &[Record], keys: &[&str]) -> SyncResult<()> {
    for (row, record) in records.iter().enumerate() {
        for key in keys {
            if !matches!(record.get(*key), Some(Some(_))) {
                return Err(SyncError::MissingKey {
                    row,
                    column: key.to_string(),
                });
            }
        }
    }
    Ok(())
}

pub fn key_tuple(record: &Record, keys: &[&str]) -> KeyTuple {
    keys.iter()
        .filter_map(|key| record.get(*key).cloned().flatten())
        .collect()
}

/// Collapses records sharing a key tuple; the last occurrence wins and keeps
/// the position of the first.
pub fn dedupe_by_key<'a>(records: &'a [Record], keys: &[&str]) -> Vec<&'a Record> {
    let mut positions: HashMap<Vec<String>, usize> = HashMap::new();
    let mut unique: Vec<&Record> = Vec::with_capacity(records.len());
    for record in records {
        let identity: Vec<String> = key_tuple(record, keys)
            .iter()
            .map(Value::as_display)
            .collect();
        match positions.get(&identity) {
            Some(&position) => unique[position] = record,
            None => {
                positions.insert(identity, unique.len());
                unique.push(record);
            }
        }
    }
    unique
}

/// Writes `records` with one multi-row statement per chunk, sized so no
/// statement exceeds the dialect's bind parameter limit. Returns the number
/// of records written.
pub fn upsert(
    db: &mut dyn Database,
    table: &str,
    columns: &[SqlColumn],
    keys: &[&str],
    records: &[&Record],
) -> DbResult<u64> {
    if records.is_empty() || columns.is_empty() {
        return Ok(0);
    }
    let rows_per_statement = (db.dialect().max_bind_params() / columns.len()).max(1);
    let mut written = 0u64;
    for chunk in records.chunks(rows_per_statement) {
        let sql = db.dialect().build_upsert(table, columns, keys, chunk.len());
        let params: Vec<Option<Value>> = chunk
            .iter()
            .flat_map(|record| {
                columns
                    .iter()
                    .map(|column| record.get(&column.name).cloned().flatten())
            })
            .collect();
        debug!(
            "Upserting {} row(s) into '{table}' ({} parameters)",
            chunk.len(),
            params.len()
        );
        db.execute(&sql, &params)?;
        written += chunk.len() as u64;
    }
    info!("Upserted {written} row(s) into '{table}'");
    Ok(written)
}
