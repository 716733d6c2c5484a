use std::{collections::HashSet, fmt, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::{
    data::DataType,
    error::{SyncError, SyncResult},
    filename::PatternExtractor,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub source: String,
    pub dest: String,
    pub data_type: Option<DataType>,
    pub nullable: Option<bool>,
}

impl ColumnMapping {
    pub fn new(source: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            data_type: None,
            nullable: None,
        }
    }

    /// Maps a source column onto a destination column of the same name.
    pub fn same(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(name.clone(), name)
    }

    pub fn with_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilenamePattern {
    /// `[name]` placeholders within otherwise literal text.
    Template(String),
    /// A regular expression with named capture groups.
    Regex(String),
}

impl FilenamePattern {
    pub fn as_str(&self) -> &str {
        match self {
            FilenamePattern::Template(raw) | FilenamePattern::Regex(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameColumn {
    /// Capture name inside the pattern.
    pub name: String,
    pub dest: String,
    pub data_type: Option<DataType>,
    /// Participates in the stale-record partition conjunction.
    pub delete_scope: bool,
}

impl FilenameColumn {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            dest: name.clone(),
            name,
            data_type: None,
            delete_scope: false,
        }
    }

    pub fn with_dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = dest.into();
        self
    }

    pub fn with_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn scoping_deletes(mut self) -> Self {
        self.delete_scope = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameExtraction {
    pub pattern: FilenamePattern,
    pub columns: Vec<FilenameColumn>,
}

impl FilenameExtraction {
    pub fn delete_scope_columns(&self) -> impl Iterator<Item = &FilenameColumn> {
        self.columns.iter().filter(|column| column.delete_scope)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

impl SortDirection {
    pub fn is_ascending(self) -> bool {
        matches!(self, SortDirection::Asc)
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for SortDirection {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(anyhow!("Index order must be 'ASC' or 'DESC', got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<IndexColumn>,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.columns.push(IndexColumn {
            column: column.into(),
            direction,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub target_table: String,
    pub key_mapping: Vec<ColumnMapping>,
    /// `None` syncs every non-key source column under its own name.
    pub column_mapping: Option<Vec<ColumnMapping>>,
    pub filename_extraction: Option<FilenameExtraction>,
    pub indexes: Vec<IndexDefinition>,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        target_table: impl Into<String>,
        key_mapping: Vec<ColumnMapping>,
    ) -> Self {
        Self {
            name: name.into(),
            target_table: target_table.into(),
            key_mapping,
            column_mapping: None,
            filename_extraction: None,
            indexes: Vec::new(),
        }
    }

    pub fn with_columns(mut self, columns: Vec<ColumnMapping>) -> Self {
        self.column_mapping = Some(columns);
        self
    }

    pub fn with_filename_extraction(mut self, extraction: FilenameExtraction) -> Self {
        self.filename_extraction = Some(extraction);
        self
    }

    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn key_columns(&self) -> Vec<&str> {
        self.key_mapping.iter().map(|m| m.dest.as_str()).collect()
    }

    pub fn delete_scope_columns(&self) -> Vec<&FilenameColumn> {
        self.filename_extraction
            .as_ref()
            .map(|extraction| extraction.delete_scope_columns().collect())
            .unwrap_or_default()
    }

    /// Stale-record reaping runs only when a filename column scopes deletes.
    pub fn reaping_enabled(&self) -> bool {
        !self.delete_scope_columns().is_empty()
    }

    /// Destination names the job declares explicitly. `None` when the
    /// column set depends on the source file's headers.
    pub fn declared_dest_columns(&self) -> Option<Vec<&str>> {
        let columns = self.column_mapping.as_ref()?;
        let mut names: Vec<&str> = self.key_mapping.iter().map(|m| m.dest.as_str()).collect();
        names.extend(columns.iter().map(|m| m.dest.as_str()));
        if let Some(extraction) = &self.filename_extraction {
            names.extend(extraction.columns.iter().map(|c| c.dest.as_str()));
        }
        Some(names)
    }

    pub fn validate(&self) -> SyncResult<()> {
        let fail = |message: String| Err(SyncError::config(&self.name, message));

        if self.name.trim().is_empty() {
            return fail("job name must not be empty".to_string());
        }
        if self.target_table.trim().is_empty() {
            return fail("target_table must not be empty".to_string());
        }
        if self.key_mapping.is_empty() {
            return fail("id_mapping must have at least one column".to_string());
        }

        let mut seen = HashSet::new();
        let mappings = self
            .key_mapping
            .iter()
            .chain(self.column_mapping.iter().flatten());
        for mapping in mappings {
            if mapping.source.trim().is_empty() || mapping.dest.trim().is_empty() {
                return fail("column mappings need both a source and a destination".to_string());
            }
            if !seen.insert(mapping.dest.to_ascii_lowercase()) {
                return fail(format!(
                    "destination column '{}' is mapped more than once",
                    mapping.dest
                ));
            }
        }

        if let Some(extraction) = &self.filename_extraction {
            if extraction.columns.is_empty() {
                return fail("filename_to_column must declare at least one column".to_string());
            }
            let extractor = PatternExtractor::compile(&extraction.pattern)
                .map_err(|err| SyncError::config(&self.name, format!("{err:#}")))?;
            for column in &extraction.columns {
                if !extractor.has_capture(&column.name) {
                    return fail(format!(
                        "filename column '{}' is not a capture in pattern '{}'",
                        column.name,
                        extraction.pattern.as_str()
                    ));
                }
                if !seen.insert(column.dest.to_ascii_lowercase()) {
                    return fail(format!(
                        "destination column '{}' is mapped more than once",
                        column.dest
                    ));
                }
            }
        }

        let declared = self.declared_dest_columns();
        let mut index_names = HashSet::new();
        for index in &self.indexes {
            if index.name.trim().is_empty() {
                return fail("index name must not be empty".to_string());
            }
            if !index_names.insert(index.name.to_ascii_lowercase()) {
                return fail(format!("index '{}' is declared more than once", index.name));
            }
            if index.columns.is_empty() {
                return fail(format!("index '{}' must have at least one column", index.name));
            }
            if let Some(declared) = &declared {
                for column in &index.columns {
                    if !declared.iter().any(|d| d.eq_ignore_ascii_case(&column.column)) {
                        return fail(format!(
                            "index '{}' references undeclared column '{}'",
                            index.name, column.column
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_job() -> Job {
        Job::new("daily", "readings", vec![ColumnMapping::new("ID", "id")])
    }

    #[test]
    fn minimal_job_validates() {
        assert!(base_job().validate().is_ok());
    }

    #[test]
    fn empty_key_mapping_is_rejected() {
        let job = Job::new("daily", "readings", Vec::new());
        let err = job.validate().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("id_mapping"));
    }

    #[test]
    fn duplicate_destination_across_sections_is_rejected() {
        let job = base_job()
            .with_columns(vec![ColumnMapping::new("value", "v")])
            .with_filename_extraction(FilenameExtraction {
                pattern: FilenamePattern::Template("data_[v].csv".to_string()),
                columns: vec![FilenameColumn::new("v")],
            });
        let err = job.validate().unwrap_err();
        assert!(err.to_string().contains("mapped more than once"));
    }

    #[test]
    fn destination_names_compare_case_insensitively() {
        let job = base_job().with_columns(vec![ColumnMapping::new("other", "ID")]);
        assert!(job.validate().is_err());
    }

    #[test]
    fn index_on_undeclared_column_is_rejected_when_columns_are_explicit() {
        let job = base_job()
            .with_columns(vec![ColumnMapping::same("value")])
            .with_index(IndexDefinition::new("idx_ghost").column("ghost", SortDirection::Asc));
        let err = job.validate().unwrap_err();
        assert!(err.to_string().contains("undeclared column 'ghost'"));
    }

    #[test]
    fn index_check_is_deferred_when_all_columns_sync() {
        let job = base_job()
            .with_index(IndexDefinition::new("idx_value").column("value", SortDirection::Desc));
        assert!(job.validate().is_ok());
    }

    #[test]
    fn filename_column_must_be_a_pattern_capture() {
        let job = base_job().with_filename_extraction(FilenameExtraction {
            pattern: FilenamePattern::Template("data_[date].csv".to_string()),
            columns: vec![FilenameColumn::new("day").scoping_deletes()],
        });
        let err = job.validate().unwrap_err();
        assert!(err.to_string().contains("not a capture"));
    }

    #[test]
    fn reaping_follows_delete_scope_flags() {
        let mut job = base_job().with_filename_extraction(FilenameExtraction {
            pattern: FilenamePattern::Template("data_[date].csv".to_string()),
            columns: vec![FilenameColumn::new("date")],
        });
        assert!(!job.reaping_enabled());
        if let Some(extraction) = job.filename_extraction.as_mut() {
            extraction.columns[0].delete_scope = true;
        }
        assert!(job.reaping_enabled());
        assert_eq!(job.delete_scope_columns()[0].dest, "date");
    }

    #[test]
    fn sort_direction_parses_case_insensitively() {
        assert_eq!("desc".parse::<SortDirection>().unwrap(), SortDirection::Desc);
        assert_eq!("ASC".parse::<SortDirection>().unwrap(), SortDirection::Asc);
        assert!("up".parse::<SortDirection>().is_err());
    }
}
