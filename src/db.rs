use log::debug;
use postgres::{NoTls, types::ToSql};
use rusqlite::types::Value as SqliteValue;

use crate::{
    data::Value,
    dialect::{Dialect, PostgresDialect, SqliteDialect},
    error::DbError,
};

pub type DbResult<T> = std::result::Result<T, DbError>;

/// A column as reported by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingColumn {
    pub name: String,
    pub sql_type: String,
}

pub trait Database {
    fn dialect(&self) -> &dyn Dialect;

    fn table_exists(&mut self, table: &str) -> DbResult<bool>;

    /// Columns of `table` in ordinal order; empty when the table is absent.
    fn existing_columns(&mut self, table: &str) -> DbResult<Vec<ExistingColumn>>;

    fn existing_indexes(&mut self, table: &str) -> DbResult<Vec<String>>;

    /// Runs one statement and returns the affected row count.
    fn execute(&mut self, sql: &str, params: &[Option<Value>]) -> DbResult<u64>;

    /// Runs a `SELECT COUNT(*)` style statement.
    fn query_count(&mut self, sql: &str, params: &[Option<Value>]) -> DbResult<u64>;

    fn execute_batch(&mut self, sql: &str) -> DbResult<()>;

    fn begin(&mut self) -> DbResult<()> {
        self.execute_batch("BEGIN")
    }

    fn commit(&mut self) -> DbResult<()> {
        self.execute_batch("COMMIT")
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.execute_batch("ROLLBACK")
    }
}

/// Opens a handle for `sqlite://<path>`, `sqlite:///<path>`,
/// `sqlite::memory:` or `postgres(ql)://...`.
pub fn connect(url: &str) -> DbResult<Box<dyn Database>> {
    let trimmed = url.trim();
    if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
        return Ok(Box::new(PostgresDatabase::connect(trimmed)?));
    }
    if trimmed == "sqlite::memory:" {
        return Ok(Box::new(SqliteDatabase::open_in_memory()?));
    }
    let path = trimmed
        .strip_prefix("sqlite:///")
        .or_else(|| trimmed.strip_prefix("sqlite://"))
        .ok_or_else(|| DbError::UnsupportedUrl(url.to_string()))?;
    if path.is_empty() {
        return Err(DbError::UnsupportedUrl(url.to_string()));
    }
    if path == ":memory:" {
        return Ok(Box::new(SqliteDatabase::open_in_memory()?));
    }
    Ok(Box::new(SqliteDatabase::open(path)?))
}

pub struct SqliteDatabase {
    conn: rusqlite::Connection,
    dialect: SqliteDialect,
}

impl SqliteDatabase {
    pub fn open(path: &str) -> DbResult<Self> {
        debug!("Opening SQLite database at {path}");
        Ok(Self::from_connection(rusqlite::Connection::open(path)?))
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self::from_connection(rusqlite::Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: rusqlite::Connection) -> Self {
        Self {
            conn,
            dialect: SqliteDialect,
        }
    }

    pub fn connection(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

fn sqlite_params(params: &[Option<Value>]) -> Vec<SqliteValue> {
    params
        .iter()
        .map(|value| match value {
            None => SqliteValue::Null,
            Some(Value::Integer(i)) => SqliteValue::Integer(*i),
            Some(Value::Float(f)) => SqliteValue::Real(*f),
            Some(other) => SqliteValue::Text(other.as_display()),
        })
        .collect()
}

impl Database for SqliteDatabase {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn table_exists(&mut self, table: &str) -> DbResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND lower(name) = lower(?1)",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn existing_columns(&mut self, table: &str) -> DbResult<Vec<ExistingColumn>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
        let columns = stmt
            .query_map([table], |row| {
                Ok(ExistingColumn {
                    name: row.get(0)?,
                    sql_type: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    fn existing_indexes(&mut self, table: &str) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND lower(tbl_name) = lower(?1)",
        )?;
        let names = stmt
            .query_map([table], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn execute(&mut self, sql: &str, params: &[Option<Value>]) -> DbResult<u64> {
        debug!("sqlite execute ({} params): {sql}", params.len());
        let affected = self
            .conn
            .execute(sql, rusqlite::params_from_iter(sqlite_params(params)))?;
        Ok(affected as u64)
    }

    fn query_count(&mut self, sql: &str, params: &[Option<Value>]) -> DbResult<u64> {
        debug!("sqlite count ({} params): {sql}", params.len());
        let count: i64 = self.conn.query_row(
            sql,
            rusqlite::params_from_iter(sqlite_params(params)),
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn execute_batch(&mut self, sql: &str) -> DbResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

pub struct PostgresDatabase {
    client: postgres::Client,
    dialect: PostgresDialect,
}

impl PostgresDatabase {
    pub fn connect(url: &str) -> DbResult<Self> {
        let client = postgres::Client::connect(url, NoTls)?;
        Ok(Self {
            client,
            dialect: PostgresDialect,
        })
    }
}

/// Every value is sent as text; the SQL casts it to the column type.
fn postgres_params(params: &[Option<Value>]) -> Vec<Option<String>> {
    params
        .iter()
        .map(|value| value.as_ref().map(Value::as_display))
        .collect()
}

fn as_sql_refs(values: &[Option<String>]) -> Vec<&(dyn ToSql + Sync)> {
    values
        .iter()
        .map(|value| value as &(dyn ToSql + Sync))
        .collect()
}

impl Database for PostgresDatabase {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn table_exists(&mut self, table: &str) -> DbResult<bool> {
        let row = self.client.query_one(
            "SELECT COUNT(*) FROM pg_catalog.pg_class c \
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = current_schema() AND c.relkind IN ('r', 'p') \
             AND lower(c.relname) = lower($1)",
            &[&table],
        )?;
        let count: i64 = row.try_get(0)?;
        Ok(count > 0)
    }

    fn existing_columns(&mut self, table: &str) -> DbResult<Vec<ExistingColumn>> {
        let rows = self.client.query(
            "SELECT a.attname::TEXT, format_type(a.atttypid, a.atttypmod) \
             FROM pg_catalog.pg_attribute a \
             JOIN pg_catalog.pg_class c ON c.oid = a.attrelid \
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = current_schema() AND lower(c.relname) = lower($1) \
             AND a.attnum > 0 AND NOT a.attisdropped \
             ORDER BY a.attnum",
            &[&table],
        )?;
        rows.iter()
            .map(|row| -> DbResult<ExistingColumn> {
                Ok(ExistingColumn {
                    name: row.try_get(0)?,
                    sql_type: row.try_get(1)?,
                })
            })
            .collect()
    }

    fn existing_indexes(&mut self, table: &str) -> DbResult<Vec<String>> {
        let rows = self.client.query(
            "SELECT i.relname::TEXT FROM pg_catalog.pg_index x \
             JOIN pg_catalog.pg_class i ON i.oid = x.indexrelid \
             JOIN pg_catalog.pg_class t ON t.oid = x.indrelid \
             JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace \
             WHERE n.nspname = current_schema() AND lower(t.relname) = lower($1)",
            &[&table],
        )?;
        rows.iter()
            .map(|row| -> DbResult<String> { Ok(row.try_get(0)?) })
            .collect()
    }

    fn execute(&mut self, sql: &str, params: &[Option<Value>]) -> DbResult<u64> {
        debug!("postgres execute ({} params): {sql}", params.len());
        let values = postgres_params(params);
        Ok(self.client.execute(sql, &as_sql_refs(&values))?)
    }

    fn query_count(&mut self, sql: &str, params: &[Option<Value>]) -> DbResult<u64> {
        debug!("postgres count ({} params): {sql}", params.len());
        let values = postgres_params(params);
        let row = self.client.query_one(sql, &as_sql_refs(&values))?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    fn execute_batch(&mut self, sql: &str) -> DbResult<()> {
        self.client.batch_execute(sql)?;
        Ok(())
    }
}
