use std::collections::BTreeMap;

use log::info;
use serde::Serialize;

use crate::{
    columns::{ResolvedColumn, resolve_columns},
    data::DataType,
    db::{Database, DbResult, ExistingColumn},
    detect::DetectedColumns,
    dialect::{Dialect, SqlColumn},
    error::SyncResult,
    job::{IndexDefinition, Job},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSnapshot {
    pub table: String,
    pub exists: bool,
    pub columns: Vec<ExistingColumn>,
    pub indexes: Vec<String>,
}

impl SchemaSnapshot {
    pub fn absent(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            exists: false,
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ExistingColumn> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes
            .iter()
            .any(|index| index.eq_ignore_ascii_case(name))
    }
}

/// Reads the current state of `table`. Never cached; every sync call takes
/// its own snapshot.
pub fn inspect(db: &mut dyn Database, table: &str) -> DbResult<SchemaSnapshot> {
    if !db.table_exists(table)? {
        return Ok(SchemaSnapshot::absent(table));
    }
    Ok(SchemaSnapshot {
        table: table.to_string(),
        exists: true,
        columns: db.existing_columns(table)?,
        indexes: db.existing_indexes(table)?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedColumn {
    pub name: String,
    pub data_type: DataType,
    pub key: bool,
    pub not_null: bool,
}

impl PlannedColumn {
    fn from_resolved(column: &ResolvedColumn) -> Self {
        Self {
            name: column.name.clone(),
            data_type: column.data_type,
            key: column.is_key(),
            not_null: column.is_key() || column.nullable == Some(false),
        }
    }

    pub fn sql_column(&self, dialect: &dyn Dialect) -> SqlColumn {
        SqlColumn::new(self.name.clone(), dialect.sql_type(self.data_type)).not_null(self.not_null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub table: String,
    pub create_table: bool,
    /// Every job column when the table is created, otherwise only the ones
    /// missing from the snapshot. Key columns come first.
    pub columns_to_add: Vec<PlannedColumn>,
    pub key_columns: Vec<String>,
    pub indexes_to_add: Vec<IndexDefinition>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        !self.create_table && self.columns_to_add.is_empty() && self.indexes_to_add.is_empty()
    }
}

/// Computes the additive plan that brings `snapshot` up to what `job` needs
/// for a source file with the `detected` columns. Pure.
pub fn reconcile(
    snapshot: &SchemaSnapshot,
    job: &Job,
    detected: &DetectedColumns,
) -> SyncResult<MigrationPlan> {
    let resolved = resolve_columns(job, detected)?;
    Ok(plan_for(snapshot, job, &resolved))
}

pub(crate) fn plan_for(
    snapshot: &SchemaSnapshot,
    job: &Job,
    resolved: &[ResolvedColumn],
) -> MigrationPlan {
    let create_table = !snapshot.exists;
    let columns_to_add = resolved
        .iter()
        .filter(|column| create_table || !snapshot.has_column(&column.name))
        .map(PlannedColumn::from_resolved)
        .collect();
    let indexes_to_add = job
        .indexes
        .iter()
        .filter(|index| create_table || !snapshot.has_index(&index.name))
        .cloned()
        .collect();
    MigrationPlan {
        table: job.target_table.clone(),
        create_table,
        columns_to_add,
        key_columns: job.key_mapping.iter().map(|m| m.dest.clone()).collect(),
        indexes_to_add,
    }
}

/// Issues the plan's DDL. An empty plan is a no-op.
pub fn apply_plan(db: &mut dyn Database, plan: &MigrationPlan) -> DbResult<()> {
    let statements = plan_statements(db.dialect(), plan);
    for sql in &statements {
        db.execute(sql, &[])?;
    }
    if plan.create_table {
        info!(
            "Created table '{}' with {} column(s)",
            plan.table,
            plan.columns_to_add.len()
        );
    } else if !plan.columns_to_add.is_empty() {
        info!(
            "Added {} column(s) to '{}'",
            plan.columns_to_add.len(),
            plan.table
        );
    }
    if !plan.indexes_to_add.is_empty() {
        info!(
            "Created {} index(es) on '{}'",
            plan.indexes_to_add.len(),
            plan.table
        );
    }
    Ok(())
}

fn plan_statements(dialect: &dyn Dialect, plan: &MigrationPlan) -> Vec<String> {
    let mut statements = Vec::new();
    if plan.create_table {
        let columns: Vec<SqlColumn> = plan
            .columns_to_add
            .iter()
            .map(|column| column.sql_column(dialect))
            .collect();
        let keys: Vec<&str> = plan.key_columns.iter().map(String::as_str).collect();
        statements.push(dialect.build_create_table(&plan.table, &columns, &keys));
    } else {
        for column in &plan.columns_to_add {
            statements.push(dialect.build_add_column(&plan.table, &column.sql_column(dialect)));
        }
    }
    for index in &plan.indexes_to_add {
        statements.push(dialect.build_create_index(&plan.table, index));
    }
    statements
}

/// SQL type per destination column: the database's own type when the column
/// already exists, otherwise the type the plan would create.
pub fn effective_types(
    dialect: &dyn Dialect,
    snapshot: &SchemaSnapshot,
    resolved: &[ResolvedColumn],
) -> BTreeMap<String, String> {
    resolved
        .iter()
        .map(|column| {
            let sql_type = match snapshot.column(&column.name) {
                Some(existing) if !existing.sql_type.trim().is_empty() => existing.sql_type.clone(),
                _ => dialect.sql_type(column.data_type),
            };
            (column.name.clone(), sql_type)
        })
        .collect()
}
