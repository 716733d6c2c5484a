use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::{DecodeReaderBytes, DecodeReaderBytesBuilder};
use log::debug;

use crate::{
    columns::{ColumnRole, ResolvedColumn, resolve_columns},
    data::{Value, parse_typed_value},
    detect::{DetectedColumns, TypeDetector},
    error::{SyncError, SyncResult},
    filename::FilenameValues,
    job::Job,
};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

/// Raw cells in header order; an empty field is `None`.
pub type RawRow = Vec<Option<String>>;

/// Destination column to typed value.
pub type Record = BTreeMap<String, Option<Value>>;

pub trait RowSource {
    fn headers(&self) -> &[String];

    fn next_row(&mut self) -> Result<Option<RawRow>>;

    fn read_all(&mut self) -> Result<Vec<RawRow>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'")),
        None => Ok(UTF_8),
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub struct CsvRowSource<R: Read> {
    reader: csv::Reader<DecodeReaderBytes<R, Vec<u8>>>,
    headers: Vec<String>,
    record: csv::StringRecord,
}

impl CsvRowSource<BufReader<File>> {
    pub fn open(path: &Path, delimiter: Option<u8>, encoding: &'static Encoding) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
        let delimiter = resolve_input_delimiter(path, delimiter);
        Self::from_reader(BufReader::new(file), delimiter, encoding)
            .with_context(|| format!("Reading headers from {path:?}"))
    }
}

impl<R: Read> CsvRowSource<R> {
    pub fn from_reader(reader: R, delimiter: u8, encoding: &'static Encoding) -> Result<Self> {
        let decoded = DecodeReaderBytesBuilder::new()
            .encoding(Some(encoding))
            .build(reader);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .double_quote(true)
            .flexible(false)
            .from_reader(decoded);
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();
        if headers.is_empty() || headers.iter().all(|header| header.is_empty()) {
            return Err(anyhow!("Input has no header row"));
        }
        debug!("Read {} header(s): {:?}", headers.len(), headers);
        Ok(Self {
            reader,
            headers,
            record: csv::StringRecord::new(),
        })
    }
}

impl<R: Read> RowSource for CsvRowSource<R> {
    fn headers(&self) -> &[String] {
        &self.headers
    }

    fn next_row(&mut self) -> Result<Option<RawRow>> {
        if !self.reader.read_record(&mut self.record)? {
            return Ok(None);
        }
        let row = self
            .record
            .iter()
            .map(|field| {
                if field.is_empty() {
                    None
                } else {
                    Some(field.to_string())
                }
            })
            .collect();
        Ok(Some(row))
    }
}

/// Typed records for one sync call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    /// Source columns as seen by the type detector.
    pub detected: DetectedColumns,
    /// Destination columns carried by every record, in write order.
    pub columns: Vec<String>,
    pub records: Vec<Record>,
}

impl RowBatch {
    /// Reads every row from `source`, resolves the job's columns and types
    /// each value. Filename values apply to every record; a filename column
    /// without a value is left out of the batch entirely.
    pub fn build(
        job: &Job,
        source: &mut dyn RowSource,
        detector: &dyn TypeDetector,
        filename_values: Option<&FilenameValues>,
    ) -> SyncResult<Self> {
        let headers = source.headers().to_vec();
        let rows = source
            .read_all()
            .map_err(|err| SyncError::Input(format!("{err:#}")))?;
        let detected = detector.detect(&headers, &rows);
        let resolved = resolve_columns(job, &detected)?;

        let mut sourced: Vec<(&ResolvedColumn, usize)> = Vec::new();
        let mut fixed: Vec<(&ResolvedColumn, Option<Value>)> = Vec::new();
        for column in &resolved {
            match column.role {
                ColumnRole::Key | ColumnRole::Data => {
                    let position = headers
                        .iter()
                        .position(|header| header == &column.source)
                        .ok_or_else(|| {
                            SyncError::Input(format!(
                                "Column '{}' not found in source file",
                                column.source
                            ))
                        })?;
                    sourced.push((column, position));
                }
                ColumnRole::Filename => {
                    let Some(raw) = filename_values.and_then(|values| values.get(&column.source))
                    else {
                        continue;
                    };
                    let value = parse_typed_value(raw, &column.data_type).map_err(|err| {
                        SyncError::Input(format!(
                            "Filename value '{raw}' for column '{}': {err:#}",
                            column.name
                        ))
                    })?;
                    fixed.push((column, value));
                }
            }
        }

        let mut records = Vec::with_capacity(rows.len());
        for (row_index, row) in rows.iter().enumerate() {
            let mut record = Record::new();
            for (column, position) in &sourced {
                let value = match row.get(*position).and_then(|cell| cell.as_deref()) {
                    Some(raw) => match parse_typed_value(raw, &column.data_type) {
                        Ok(value) => value,
                        // Detection may have seen only a sample; the raw text
                        // goes through and the database decides.
                        Err(err) if !column.declared => {
                            debug!(
                                "Row {row_index}, column '{}': keeping '{raw}' as text ({err:#})",
                                column.name
                            );
                            Some(Value::String(raw.to_string()))
                        }
                        Err(err) => {
                            return Err(SyncError::InvalidValue {
                                row: row_index,
                                column: column.name.clone(),
                                message: format!("{err:#}"),
                            });
                        }
                    },
                    None => None,
                };
                record.insert(column.name.clone(), value);
            }
            for (column, value) in &fixed {
                record.insert(column.name.clone(), value.clone());
            }
            records.push(record);
        }

        let columns = sourced
            .iter()
            .map(|(column, _)| column.name.clone())
            .chain(fixed.iter().map(|(column, _)| column.name.clone()))
            .collect();
        Ok(Self {
            detected,
            columns,
            records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::DataType,
        detect::SampleTypeDetector,
        job::{ColumnMapping, FilenameColumn, FilenameExtraction, FilenamePattern},
    };

    fn source(csv_text: &str) -> CsvRowSource<&[u8]> {
        CsvRowSource::from_reader(csv_text.as_bytes(), b',', UTF_8).unwrap()
    }

    fn dated_job() -> Job {
        Job::new("j", "t", vec![ColumnMapping::same("id")]).with_filename_extraction(
            FilenameExtraction {
                pattern: FilenamePattern::Template("data_[date].csv".to_string()),
                columns: vec![
                    FilenameColumn::new("date")
                        .with_type(DataType::Date)
                        .scoping_deletes(),
                ],
            },
        )
    }

    #[test]
    fn csv_source_reports_headers_and_nulls() {
        let mut rows = source("id,name\n1,alpha\n2,\n");
        assert_eq!(rows.headers(), &["id".to_string(), "name".to_string()]);
        let all = rows.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1], vec![Some("2".to_string()), None]);
    }

    #[test]
    fn csv_source_without_headers_is_rejected() {
        assert!(CsvRowSource::from_reader(&b""[..], b',', UTF_8).is_err());
    }

    #[test]
    fn csv_source_decodes_legacy_encodings() {
        let encoding = resolve_encoding(Some("windows-1252")).unwrap();
        let bytes: &[u8] = b"id,name\n1,caf\xe9\n";
        let mut rows = CsvRowSource::from_reader(bytes, b',', encoding).unwrap();
        let row = rows.next_row().unwrap().unwrap();
        assert_eq!(row[1].as_deref(), Some("café"));
    }

    #[test]
    fn tsv_extension_selects_tab_delimiter() {
        assert_eq!(resolve_input_delimiter(Path::new("a.tsv"), None), b'\t');
        assert_eq!(resolve_input_delimiter(Path::new("a.csv"), None), b',');
        assert_eq!(resolve_input_delimiter(Path::new("a.tsv"), Some(b';')), b';');
    }

    #[test]
    fn build_types_values_and_applies_filename_values() {
        let mut values = FilenameValues::new();
        values.insert("date".to_string(), "2024-01-15".to_string());
        let batch = RowBatch::build(
            &dated_job(),
            &mut source("id,reading\n1,2.5\n2,\n"),
            &SampleTypeDetector::default(),
            Some(&values),
        )
        .unwrap();
        assert_eq!(batch.columns, vec!["id", "reading", "date"]);
        assert_eq!(batch.len(), 2);
        let first = &batch.records[0];
        assert_eq!(first["id"], Some(Value::Integer(1)));
        assert_eq!(first["reading"], Some(Value::Float(2.5)));
        assert_eq!(
            first["date"].as_ref().map(Value::as_display).as_deref(),
            Some("2024-01-15")
        );
        assert_eq!(batch.records[1]["reading"], None);
    }

    #[test]
    fn build_without_filename_values_omits_filename_columns() {
        let batch = RowBatch::build(
            &dated_job(),
            &mut source("id\n1\n"),
            &SampleTypeDetector::default(),
            None,
        )
        .unwrap();
        assert_eq!(batch.columns, vec!["id"]);
        assert!(!batch.records[0].contains_key("date"));
    }

    #[test]
    fn unparseable_value_reports_row_and_column() {
        let job = Job::new("j", "t", vec![ColumnMapping::same("id")])
            .with_columns(vec![ColumnMapping::same("n").with_type(DataType::Integer)]);
        let err = RowBatch::build(
            &job,
            &mut source("id,n\na,1\nb,x\n"),
            &SampleTypeDetector::default(),
            None,
        )
        .unwrap_err();
        match err {
            SyncError::InvalidValue { row, column, .. } => {
                assert_eq!(row, 1);
                assert_eq!(column, "n");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn values_past_the_sample_window_fall_back_to_text() {
        let job = Job::new("j", "t", vec![ColumnMapping::same("k")]);
        let batch = RowBatch::build(
            &job,
            &mut source("k,v\n1,10\n2,n/a\n"),
            &SampleTypeDetector { sample_rows: 1 },
            None,
        )
        .unwrap();
        assert_eq!(batch.detected.get("v").map(|c| c.data_type), Some(DataType::Integer));
        assert_eq!(batch.records[0]["v"], Some(Value::Integer(10)));
        assert_eq!(batch.records[1]["v"], Some(Value::String("n/a".to_string())));
    }

    #[test]
    fn declared_types_stay_strict_past_the_sample_window() {
        let job = Job::new("j", "t", vec![ColumnMapping::same("k")])
            .with_columns(vec![ColumnMapping::same("v").with_type(DataType::Integer)]);
        let err = RowBatch::build(
            &job,
            &mut source("k,v\n1,10\n2,n/a\n"),
            &SampleTypeDetector { sample_rows: 1 },
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::InvalidValue { row: 1, .. }));
    }

    #[test]
    fn unparseable_filename_value_is_an_input_error() {
        let mut values = FilenameValues::new();
        values.insert("date".to_string(), "yesterday".to_string());
        let err = RowBatch::build(
            &dated_job(),
            &mut source("id\n1\n"),
            &SampleTypeDetector::default(),
            Some(&values),
        )
        .unwrap_err();
        assert!(err.is_input());
    }
}
