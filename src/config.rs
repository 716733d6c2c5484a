use std::{
    fmt,
    fs::File,
    io::{Read, Write},
    marker::PhantomData,
    path::Path,
};

use anyhow::{Context, Result, anyhow, bail};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{MapAccess, Visitor},
    ser::SerializeMap,
};

use crate::{
    data::DataType,
    error::{SyncError, SyncResult},
    job::{
        ColumnMapping, FilenameColumn, FilenameExtraction, FilenamePattern, IndexColumn,
        IndexDefinition, Job, SortDirection,
    },
};

/// A YAML mapping kept in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(pub Vec<(String, V)>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    entries.push((key, value));
                }
                Ok(OrderedMap(entries))
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(OrderedMap(Vec::new()))
            }
        }

        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

/// `source: dest` or `source: {db_column, type, nullable}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MappingEntry {
    Simple(String),
    Extended {
        db_column: String,
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        data_type: Option<DataType>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nullable: Option<bool>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilenameColumnDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_column: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub use_to_delete_old_rows: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilenameDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default)]
    pub columns: OrderedMap<Option<FilenameColumnDocument>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexColumnDocument {
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<IndexColumnDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDocument {
    pub target_table: String,
    #[serde(default)]
    pub id_mapping: OrderedMap<MappingEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<OrderedMap<MappingEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename_to_column: Option<FilenameDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub jobs: OrderedMap<JobDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_column_matchers: Option<Vec<String>>,
}

fn mapping_from_entry(source: &str, entry: &MappingEntry) -> ColumnMapping {
    match entry {
        MappingEntry::Simple(dest) => ColumnMapping::new(source, dest.as_str()),
        MappingEntry::Extended {
            db_column,
            data_type,
            nullable,
        } => ColumnMapping {
            source: source.to_string(),
            dest: db_column.clone(),
            data_type: *data_type,
            nullable: *nullable,
        },
    }
}

fn entry_from_mapping(mapping: &ColumnMapping) -> (String, MappingEntry) {
    let entry = if mapping.data_type.is_none() && mapping.nullable.is_none() {
        MappingEntry::Simple(mapping.dest.clone())
    } else {
        MappingEntry::Extended {
            db_column: mapping.dest.clone(),
            data_type: mapping.data_type,
            nullable: mapping.nullable,
        }
    };
    (mapping.source.clone(), entry)
}

impl JobDocument {
    pub fn to_job(&self, name: &str) -> SyncResult<Job> {
        let key_mapping = self
            .id_mapping
            .0
            .iter()
            .map(|(source, entry)| mapping_from_entry(source, entry))
            .collect();
        let mut job = Job::new(name, self.target_table.clone(), key_mapping);
        if let Some(columns) = &self.columns {
            job.column_mapping = Some(
                columns
                    .0
                    .iter()
                    .map(|(source, entry)| mapping_from_entry(source, entry))
                    .collect(),
            );
        }
        if let Some(filename) = &self.filename_to_column {
            let pattern = match (&filename.template, &filename.regex) {
                (Some(template), None) => FilenamePattern::Template(template.clone()),
                (None, Some(regex)) => FilenamePattern::Regex(regex.clone()),
                (Some(_), Some(_)) => {
                    return Err(SyncError::config(
                        name,
                        "filename_to_column takes either 'template' or 'regex', not both",
                    ));
                }
                (None, None) => {
                    return Err(SyncError::config(
                        name,
                        "filename_to_column needs a 'template' or a 'regex'",
                    ));
                }
            };
            let columns = filename
                .columns
                .0
                .iter()
                .map(|(capture, document)| {
                    let document = document.clone().unwrap_or_default();
                    FilenameColumn {
                        name: capture.clone(),
                        dest: document.db_column.unwrap_or_else(|| capture.clone()),
                        data_type: document.data_type,
                        delete_scope: document.use_to_delete_old_rows,
                    }
                })
                .collect();
            job.filename_extraction = Some(FilenameExtraction { pattern, columns });
        }
        for index in &self.indexes {
            let mut definition = IndexDefinition::new(index.name.clone());
            for column in &index.columns {
                let direction = match &column.order {
                    Some(order) => order
                        .parse::<SortDirection>()
                        .map_err(|err| SyncError::config(name, err.to_string()))?,
                    None => SortDirection::Asc,
                };
                definition.columns.push(IndexColumn {
                    column: column.column.clone(),
                    direction,
                });
            }
            job.indexes.push(definition);
        }
        Ok(job)
    }

    pub fn from_job(job: &Job) -> Self {
        Self {
            target_table: job.target_table.clone(),
            id_mapping: OrderedMap(job.key_mapping.iter().map(entry_from_mapping).collect()),
            columns: job
                .column_mapping
                .as_ref()
                .map(|columns| OrderedMap(columns.iter().map(entry_from_mapping).collect())),
            filename_to_column: job.filename_extraction.as_ref().map(|extraction| {
                let (template, regex) = match &extraction.pattern {
                    FilenamePattern::Template(raw) => (Some(raw.clone()), None),
                    FilenamePattern::Regex(raw) => (None, Some(raw.clone())),
                };
                let columns = extraction
                    .columns
                    .iter()
                    .map(|column| {
                        let document = FilenameColumnDocument {
                            db_column: (column.dest != column.name).then(|| column.dest.clone()),
                            data_type: column.data_type,
                            use_to_delete_old_rows: column.delete_scope,
                        };
                        let document =
                            (document != FilenameColumnDocument::default()).then_some(document);
                        (column.name.clone(), document)
                    })
                    .collect();
                FilenameDocument {
                    template,
                    regex,
                    columns: OrderedMap(columns),
                }
            }),
            indexes: job
                .indexes
                .iter()
                .map(|index| IndexDocument {
                    name: index.name.clone(),
                    columns: index
                        .columns
                        .iter()
                        .map(|column| IndexColumnDocument {
                            column: column.column.clone(),
                            order: Some(column.direction.as_sql().to_string()),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Parsed and validated configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncConfig {
    pub jobs: Vec<Job>,
    pub id_column_matchers: Option<Vec<String>>,
}

fn read_to_string(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)
        .with_context(|| format!("Reading config file {path:?}"))?;
    Ok(buf)
}

fn write_string(path: &Path, contents: &str) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("Creating config file {path:?}"))?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(())
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = read_to_string(path)?;
        Self::from_yaml_str(&raw).with_context(|| format!("Loading config file {path:?}"))
    }

    /// Parses a document and validates every job in it.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let document: ConfigDocument = serde_yaml::from_str(raw)?;
        if document.jobs.0.is_empty() {
            bail!("Config file must contain a non-empty 'jobs' section");
        }
        let mut jobs = Vec::with_capacity(document.jobs.0.len());
        for (name, job_document) in &document.jobs.0 {
            let job = job_document.to_job(name)?;
            job.validate()?;
            jobs.push(job);
        }
        Ok(Self {
            jobs,
            id_column_matchers: document.id_column_matchers,
        })
    }

    /// Loads `path` when it exists, otherwise starts an empty configuration.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.name == name)
    }

    pub fn require_job(&self, name: &str) -> Result<&Job> {
        self.job(name).ok_or_else(|| {
            let known: Vec<&str> = self.jobs.iter().map(|job| job.name.as_str()).collect();
            anyhow!(
                "Job '{name}' not found in config (available: {})",
                known.join(", ")
            )
        })
    }

    /// Adds `job`, replacing a job of the same name only when `force` is set.
    pub fn add_or_update_job(&mut self, job: Job, force: bool) -> Result<()> {
        job.validate()?;
        match self.jobs.iter().position(|existing| existing.name == job.name) {
            Some(_) if !force => bail!(
                "Job '{}' already exists. Use --force to overwrite.",
                job.name
            ),
            Some(position) => self.jobs[position] = job,
            None => self.jobs.push(job),
        }
        Ok(())
    }

    pub fn to_document(&self) -> ConfigDocument {
        ConfigDocument {
            jobs: OrderedMap(
                self.jobs
                    .iter()
                    .map(|job| (job.name.clone(), JobDocument::from_job(job)))
                    .collect(),
            ),
            id_column_matchers: self.id_column_matchers.clone(),
        }
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.to_document())?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = self.to_yaml_string()?;
        write_string(path, &serialized)
    }
}
