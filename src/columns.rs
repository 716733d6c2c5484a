use crate::{
    data::DataType,
    detect::DetectedColumns,
    error::{SyncError, SyncResult},
    job::{ColumnMapping, Job},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Key,
    Data,
    Filename,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    /// Destination column name.
    pub name: String,
    /// Source header for key/data columns, capture name for filename columns.
    pub source: String,
    pub data_type: DataType,
    /// Whether `data_type` comes from the job rather than detection.
    pub declared: bool,
    pub nullable: Option<bool>,
    pub role: ColumnRole,
}

impl ResolvedColumn {
    pub fn is_key(&self) -> bool {
        self.role == ColumnRole::Key
    }
}

/// Key columns in declared order, then mapped columns (every remaining
/// header when the job maps none), then filename-derived columns.
pub fn resolve_columns(job: &Job, detected: &DetectedColumns) -> SyncResult<Vec<ResolvedColumn>> {
    let mut resolved = Vec::new();

    for mapping in &job.key_mapping {
        if !detected.contains(&mapping.source) {
            return Err(SyncError::Input(format!(
                "ID column '{}' not found in source file",
                mapping.source
            )));
        }
        resolved.push(from_mapping(mapping, detected, ColumnRole::Key));
    }

    match &job.column_mapping {
        Some(columns) => {
            for mapping in columns {
                if !detected.contains(&mapping.source) {
                    return Err(SyncError::Input(format!(
                        "Column '{}' not found in source file",
                        mapping.source
                    )));
                }
                resolved.push(from_mapping(mapping, detected, ColumnRole::Data));
            }
        }
        None => {
            for name in detected.names() {
                let used_by_key = job.key_mapping.iter().any(|m| m.source == name);
                let taken = resolved.iter().any(|c| c.name.eq_ignore_ascii_case(name));
                if used_by_key || taken {
                    continue;
                }
                let mapping = ColumnMapping::same(name);
                resolved.push(from_mapping(&mapping, detected, ColumnRole::Data));
            }
        }
    }

    if let Some(extraction) = &job.filename_extraction {
        for column in &extraction.columns {
            if resolved.iter().any(|c| c.name.eq_ignore_ascii_case(&column.dest)) {
                return Err(SyncError::config(
                    &job.name,
                    format!(
                        "filename column '{}' collides with a source column of the same name",
                        column.dest
                    ),
                ));
            }
            resolved.push(ResolvedColumn {
                name: column.dest.clone(),
                source: column.name.clone(),
                data_type: column.data_type.unwrap_or(DataType::Text),
                declared: column.data_type.is_some(),
                nullable: None,
                role: ColumnRole::Filename,
            });
        }
    }

    for index in &job.indexes {
        for column in &index.columns {
            if !resolved
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&column.column))
            {
                return Err(SyncError::config(
                    &job.name,
                    format!(
                        "index '{}' references column '{}' which this job does not sync",
                        index.name, column.column
                    ),
                ));
            }
        }
    }

    Ok(resolved)
}

fn from_mapping(mapping: &ColumnMapping, detected: &DetectedColumns, role: ColumnRole) -> ResolvedColumn {
    ResolvedColumn {
        name: mapping.dest.clone(),
        source: mapping.source.clone(),
        data_type: resolve_type(mapping.data_type, detected, &mapping.source),
        declared: mapping.data_type.is_some(),
        nullable: mapping.nullable,
        role,
    }
}

/// Declared type wins; a detected `varchar(N)` widens to text because the
/// length only describes the sampled file.
fn resolve_type(declared: Option<DataType>, detected: &DetectedColumns, source: &str) -> DataType {
    if let Some(declared) = declared {
        return declared;
    }
    match detected.get(source).map(|column| column.data_type) {
        Some(DataType::Varchar(_)) | None => DataType::Text,
        Some(other) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        detect::DetectedColumn,
        job::{FilenameColumn, FilenameExtraction, FilenamePattern, IndexDefinition, SortDirection},
    };

    fn detected(columns: &[(&str, DataType)]) -> DetectedColumns {
        columns
            .iter()
            .map(|(name, data_type)| {
                (
                    name.to_string(),
                    DetectedColumn {
                        data_type: *data_type,
                        nullable: false,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn keys_come_first_then_remaining_headers_then_filename_columns() {
        let job = Job::new("j", "t", vec![ColumnMapping::new("ID", "id")])
            .with_filename_extraction(FilenameExtraction {
                pattern: FilenamePattern::Template("data_[date].csv".to_string()),
                columns: vec![FilenameColumn::new("date").with_dest("day")],
            });
        let source = detected(&[
            ("value", DataType::Float),
            ("ID", DataType::Integer),
            ("label", DataType::Varchar(4)),
        ]);
        let resolved = resolve_columns(&job, &source).unwrap();
        let names: Vec<_> = resolved.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "value", "label", "day"]);
        assert_eq!(resolved[0].role, ColumnRole::Key);
        assert_eq!(resolved[0].data_type, DataType::Integer);
        assert_eq!(resolved[2].data_type, DataType::Text);
        assert_eq!(resolved[3].role, ColumnRole::Filename);
    }

    #[test]
    fn declared_types_take_precedence_over_detection() {
        let job = Job::new("j", "t", vec![ColumnMapping::same("id")]).with_columns(vec![
            ColumnMapping::new("amount", "total").with_type(DataType::Text),
            ColumnMapping::new("code", "code").with_type(DataType::Varchar(8)),
        ]);
        let source = detected(&[
            ("id", DataType::Integer),
            ("amount", DataType::Float),
            ("code", DataType::Integer),
            ("ignored", DataType::Integer),
        ]);
        let resolved = resolve_columns(&job, &source).unwrap();
        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[1].name, "total");
        assert_eq!(resolved[1].data_type, DataType::Text);
        assert_eq!(resolved[2].data_type, DataType::Varchar(8));
    }

    #[test]
    fn missing_key_source_is_an_input_error() {
        let job = Job::new("j", "t", vec![ColumnMapping::same("id")]);
        let err = resolve_columns(&job, &detected(&[("other", DataType::Text)])).unwrap_err();
        assert!(err.is_input());
    }

    #[test]
    fn missing_mapped_source_is_an_input_error() {
        let job = Job::new("j", "t", vec![ColumnMapping::same("id")])
            .with_columns(vec![ColumnMapping::same("absent")]);
        let err = resolve_columns(&job, &detected(&[("id", DataType::Text)])).unwrap_err();
        assert!(err.to_string().contains("absent"));
    }

    #[test]
    fn index_on_unsynced_column_is_a_config_error() {
        let job = Job::new("j", "t", vec![ColumnMapping::same("id")])
            .with_index(IndexDefinition::new("idx").column("nope", SortDirection::Asc));
        let err = resolve_columns(&job, &detected(&[("id", DataType::Text)])).unwrap_err();
        assert!(err.is_config());
    }
}
