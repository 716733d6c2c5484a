use itertools::Itertools;

use crate::{data::DataType, job::IndexDefinition};

/// A destination column together with the SQL type text used for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlColumn {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
}

impl SqlColumn {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
        }
    }

    pub fn not_null(mut self, not_null: bool) -> Self {
        self.not_null = not_null;
        self
    }
}

pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn sql_type(&self, data_type: DataType) -> String;

    /// Bind marker for the 1-based `position`, targeting a column of
    /// `column_type`.
    fn placeholder(&self, position: usize, column_type: &str) -> String;

    fn max_bind_params(&self) -> usize;

    /// Whether DDL can share a transaction with the DML that follows it.
    fn transactional_ddl(&self) -> bool {
        true
    }

    fn build_create_table(&self, table: &str, columns: &[SqlColumn], keys: &[&str]) -> String {
        let mut parts: Vec<String> = columns
            .iter()
            .map(|column| {
                let mut definition =
                    format!("{} {}", self.quote_ident(&column.name), column.sql_type);
                if column.not_null {
                    definition.push_str(" NOT NULL");
                }
                definition
            })
            .collect();
        parts.push(format!(
            "PRIMARY KEY ({})",
            keys.iter().map(|key| self.quote_ident(key)).join(", ")
        ));
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.quote_ident(table),
            parts.join(", ")
        )
    }

    /// Added columns are always nullable; existing rows have no value.
    fn build_add_column(&self, table: &str, column: &SqlColumn) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.quote_ident(table),
            self.quote_ident(&column.name),
            column.sql_type
        )
    }

    fn build_create_index(&self, table: &str, index: &IndexDefinition) -> String {
        let columns = index
            .columns
            .iter()
            .map(|column| {
                format!(
                    "{} {}",
                    self.quote_ident(&column.column),
                    column.direction.as_sql()
                )
            })
            .join(", ");
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            self.quote_ident(&index.name),
            self.quote_ident(table),
            columns
        )
    }

    /// Multi-row insert of `row_count` rows that overwrites every non-key
    /// column when all key columns collide. Parameters are row-major.
    fn build_upsert(
        &self,
        table: &str,
        columns: &[SqlColumn],
        keys: &[&str],
        row_count: usize,
    ) -> String {
        let mut position = 0;
        let rows = (0..row_count)
            .map(|_| {
                let values = columns
                    .iter()
                    .map(|column| {
                        position += 1;
                        self.placeholder(position, &column.sql_type)
                    })
                    .join(", ");
                format!("({values})")
            })
            .join(", ");
        let updates = columns
            .iter()
            .filter(|column| !keys.iter().any(|key| key.eq_ignore_ascii_case(&column.name)))
            .map(|column| {
                let ident = self.quote_ident(&column.name);
                format!("{ident} = excluded.{ident}")
            })
            .join(", ");
        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {updates}")
        };
        format!(
            "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) {}",
            self.quote_ident(table),
            columns
                .iter()
                .map(|column| self.quote_ident(&column.name))
                .join(", "),
            rows,
            keys.iter().map(|key| self.quote_ident(key)).join(", "),
            action
        )
    }

    /// Session-local table holding the key tuples of the current write set.
    fn build_key_table(&self, name: &str, keys: &[SqlColumn]) -> String {
        let columns = keys
            .iter()
            .map(|key| format!("{} {}", self.quote_ident(&key.name), key.sql_type))
            .join(", ");
        format!(
            "CREATE TEMP TABLE {} ({columns}, PRIMARY KEY ({}))",
            self.quote_ident(name),
            keys.iter().map(|key| self.quote_ident(&key.name)).join(", ")
        )
    }

    /// `WHERE` body shared by the staleness delete and count: rows inside the
    /// scope whose key is absent from `staged`. Parameters are the scope
    /// values in order.
    fn staleness_predicate(
        &self,
        table: &str,
        staged: &str,
        keys: &[SqlColumn],
        scope: &[SqlColumn],
    ) -> String {
        let target = self.quote_ident(table);
        let staged = self.quote_ident(staged);
        let matches = keys
            .iter()
            .map(|key| {
                let ident = self.quote_ident(&key.name);
                format!("{staged}.{ident} = {target}.{ident}")
            })
            .join(" AND ");
        let mut conditions: Vec<String> = scope
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                format!(
                    "{} = {}",
                    self.quote_ident(&column.name),
                    self.placeholder(idx + 1, &column.sql_type)
                )
            })
            .collect();
        conditions.push(format!(
            "NOT EXISTS (SELECT 1 FROM {staged} WHERE {matches})"
        ));
        conditions.join(" AND ")
    }

    fn build_staleness_delete(
        &self,
        table: &str,
        staged: &str,
        keys: &[SqlColumn],
        scope: &[SqlColumn],
    ) -> String {
        format!(
            "DELETE FROM {} WHERE {}",
            self.quote_ident(table),
            self.staleness_predicate(table, staged, keys, scope)
        )
    }

    fn build_staleness_count(
        &self,
        table: &str,
        staged: &str,
        keys: &[SqlColumn],
        scope: &[SqlColumn],
    ) -> String {
        format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            self.quote_ident(table),
            self.staleness_predicate(table, staged, keys, scope)
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn sql_type(&self, data_type: DataType) -> String {
        match data_type {
            DataType::Integer => "INTEGER".to_string(),
            DataType::Float => "DOUBLE PRECISION".to_string(),
            DataType::Date => "DATE".to_string(),
            DataType::DateTime => "TIMESTAMP".to_string(),
            DataType::Text => "TEXT".to_string(),
            DataType::Varchar(len) => format!("VARCHAR({len})"),
        }
    }

    /// Values travel as text and are cast server-side to the column type.
    fn placeholder(&self, position: usize, column_type: &str) -> String {
        format!("CAST(${position}::TEXT AS {column_type})")
    }

    fn max_bind_params(&self) -> usize {
        65_535
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn sql_type(&self, data_type: DataType) -> String {
        match data_type {
            DataType::Integer => "INTEGER",
            DataType::Float => "REAL",
            DataType::Date | DataType::DateTime | DataType::Text | DataType::Varchar(_) => "TEXT",
        }
        .to_string()
    }

    fn placeholder(&self, position: usize, _column_type: &str) -> String {
        format!("?{position}")
    }

    fn max_bind_params(&self) -> usize {
        32_766
    }
}
