use std::fmt;

use thiserror::Error;

/// Engine state in which a database failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Snapshot,
    Reconcile,
    Upsert,
    Reap,
    Project,
    Commit,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Snapshot => "snapshot",
            Phase::Reconcile => "reconcile",
            Phase::Upsert => "upsert",
            Phase::Reap => "reap",
            Phase::Project => "project",
            Phase::Commit => "commit",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures raised by a [`crate::db::Database`] backend.
#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Postgres(#[from] postgres::Error),
    #[error("unsupported database URL '{0}' (expected sqlite:// or postgres://)")]
    UnsupportedUrl(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Input(String),
    #[error("row {row}: missing value for key column '{column}'")]
    MissingKey { row: usize, column: String },
    #[error("row {row}, column '{column}': {message}")]
    InvalidValue {
        row: usize,
        column: String,
        message: String,
    },
    #[error("job '{job}': {message}")]
    Config { job: String, message: String },
    #[error("job '{job}', table '{table}', {phase} phase: {source}")]
    Database {
        job: String,
        table: String,
        phase: Phase,
        #[source]
        source: DbError,
    },
}

impl SyncError {
    pub fn config(job: &str, message: impl Into<String>) -> Self {
        SyncError::Config {
            job: job.to_string(),
            message: message.into(),
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(
            self,
            SyncError::Input(_) | SyncError::MissingKey { .. } | SyncError::InvalidValue { .. }
        )
    }

    pub fn is_config(&self) -> bool {
        matches!(self, SyncError::Config { .. })
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            SyncError::Database { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
