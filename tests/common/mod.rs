#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crump::db::SqliteDatabase;
use crump::detect::SampleTypeDetector;
use crump::filename::FilenameValues;
use crump::job::Job;
use crump::rows::{CsvRowSource, RowBatch};
use encoding_rs::UTF_8;
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// SQLite URL for a database file inside the workspace.
    pub fn sqlite_url(&self, name: &str) -> String {
        format!("sqlite:///{}", self.path().join(name).display())
    }
}

/// Parses CSV text into a typed batch for `job`.
pub fn batch(job: &Job, csv: &str, values: Option<&FilenameValues>) -> RowBatch {
    let mut source =
        CsvRowSource::from_reader(csv.as_bytes(), b',', UTF_8).expect("csv headers");
    RowBatch::build(job, &mut source, &SampleTypeDetector::default(), values)
        .expect("build batch")
}

pub fn values(pairs: &[(&str, &str)]) -> FilenameValues {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

pub fn count(db: &SqliteDatabase, table: &str) -> i64 {
    db.connection()
        .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
            row.get(0)
        })
        .expect("count rows")
}

/// Runs a single-column query and renders every value as text.
pub fn column_values(db: &SqliteDatabase, sql: &str) -> Vec<String> {
    let mut statement = db.connection().prepare(sql).expect("prepare query");
    statement
        .query_map([], |row| row.get::<_, rusqlite::types::Value>(0))
        .expect("run query")
        .map(|value| match value.expect("read value") {
            rusqlite::types::Value::Null => "NULL".to_string(),
            rusqlite::types::Value::Integer(i) => i.to_string(),
            rusqlite::types::Value::Real(f) => f.to_string(),
            rusqlite::types::Value::Text(s) => s,
            rusqlite::types::Value::Blob(_) => "<blob>".to_string(),
        })
        .collect()
}
